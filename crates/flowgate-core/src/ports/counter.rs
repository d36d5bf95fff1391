//! Counter ports - abstractions over local and shared counting backends.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::CountingMode;
use crate::error::RateLimitError;

/// Verdict from the in-process window counter.
#[derive(Debug, Clone, Copy)]
pub struct LocalVerdict {
    pub admitted: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Verdict from the shared counter store. `success` reflects cross-node
/// state and is authoritative when present.
#[derive(Debug, Clone, Copy)]
pub struct SharedVerdict {
    pub success: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// In-process, capacity-bounded window counter. Implementations must be
/// linearizable per key: two concurrent checks against a key at
/// `limit - 1` must not both be admitted.
#[async_trait]
pub trait WindowCounter: Send + Sync {
    /// Count one request against `key` and report the verdict.
    async fn check(&self, key: &str, limit: u32, window: Duration) -> LocalVerdict;

    /// Overwrite a key's record from a shared verdict, so local-only
    /// checks track the known-lower cross-node count.
    async fn sync_remaining(
        &self,
        key: &str,
        limit: u32,
        remaining: u32,
        reset_at: DateTime<Utc>,
    );

    /// Number of keys currently tracked.
    fn tracked_keys(&self) -> usize;
}

/// Network-accessible shared counter. One call is one round trip; any
/// store with atomic increment and expiry can implement this.
#[async_trait]
pub trait SharedCounter: Send + Sync {
    async fn increment_and_check(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        mode: CountingMode,
    ) -> Result<SharedVerdict, RateLimitError>;
}
