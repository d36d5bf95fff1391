//! Decision result - produced fresh per request, never stored.

use chrono::{DateTime, Utc};

use super::identity::Dimension;

/// The merged outcome of one rate-limit evaluation.
#[derive(Debug, Clone)]
pub struct Decision {
    pub admitted: bool,
    /// Limit of the dimension the metadata refers to.
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Set on rejection: which dimension's limit was hit first.
    pub failed_dimension: Option<Dimension>,
    /// A session key generated during this decision. The host persists
    /// it (typically as a cookie); the engine never writes responses.
    pub minted_session_key: Option<String>,
}

impl Decision {
    /// Reset time as epoch seconds, the `X-RateLimit-Reset` convention.
    pub fn reset_epoch_secs(&self) -> i64 {
        self.reset_at.timestamp()
    }

    /// Seconds until the window resets, floored at 1 for `Retry-After`.
    pub fn retry_after_secs(&self) -> i64 {
        (self.reset_at - Utc::now()).num_seconds().max(1)
    }
}
