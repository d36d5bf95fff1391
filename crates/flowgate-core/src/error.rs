//! Domain-level error types.

use thiserror::Error;

/// Rate limiting errors.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The request carried no usable identity source in any field.
    /// A check must never proceed against an empty key.
    #[error("request carries no usable identity source")]
    MissingIdentity,

    /// The shared counter backend failed or timed out. Interpreted by
    /// the engine's failure policy, never surfaced directly to callers.
    #[error("shared backend error: {0}")]
    Backend(String),

    #[error("invalid limiter settings: {0}")]
    InvalidSettings(String),
}
