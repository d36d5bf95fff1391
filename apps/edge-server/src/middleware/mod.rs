//! Middleware modules.

mod rate_limit;

pub use rate_limit::{CLIENT_ID_HEADER, RateLimitMiddleware, SESSION_COOKIE};
