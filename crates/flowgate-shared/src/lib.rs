//! # Flowgate Shared
//!
//! Wire types shared between the engine and its hosts: the rejection
//! payload, rate-limit header names, and error response bodies.

pub mod headers;
pub mod response;

pub use headers::{
    HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, HEADER_RETRY_AFTER, RateLimitHeaders,
};
pub use response::{ErrorResponse, RejectionBody};
