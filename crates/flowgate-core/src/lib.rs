//! # Flowgate Core
//!
//! The domain layer of Flowgate.
//! This crate contains the rate-limit decision logic with zero
//! infrastructure dependencies: identity resolution, limiter settings,
//! the decision engine, and the ports counter backends implement.

pub mod domain;
pub mod engine;
pub mod error;
pub mod handle;
pub mod ports;

pub use error::RateLimitError;
