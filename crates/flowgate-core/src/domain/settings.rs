//! Limiter configuration - immutable once active.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RateLimitError;

/// Policy for a shared-backend failure: admit on the local verdict alone,
/// or treat the failure as a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    FailOpen,
    FailClosed,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::FailOpen
    }
}

/// Counting mode used by the shared backend. The local counter always
/// runs the fixed/refreshing-window algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountingMode {
    Fixed,
    Sliding,
}

/// The active limiter configuration. A changed value never patches the
/// running state: the holder rebuilds the counter/client pair and swaps
/// it in whole, so counts from different window semantics never mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Maximum requests per window, per dimension.
    pub limit: u32,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Maximum tracked keys in the local counter.
    pub capacity: usize,
    /// Consult the shared counter store after local admission.
    pub shared_mode_enabled: bool,
    pub shared_backend_url: Option<String>,
    pub shared_backend_token: Option<String>,
    /// Sliding-window counting on the shared backend.
    pub sliding_mode: bool,
    /// Emit one structured event per decision.
    pub analytics_enabled: bool,
    pub failure_policy: FailurePolicy,
    /// Upper bound on one shared-backend round trip.
    pub shared_timeout_ms: u64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            limit: 100,
            window_secs: 60,
            capacity: 10_000,
            shared_mode_enabled: false,
            shared_backend_url: None,
            shared_backend_token: None,
            sliding_mode: false,
            analytics_enabled: false,
            failure_policy: FailurePolicy::default(),
            shared_timeout_ms: 1_000,
        }
    }
}

impl LimiterSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn counting_mode(&self) -> CountingMode {
        if self.sliding_mode {
            CountingMode::Sliding
        } else {
            CountingMode::Fixed
        }
    }

    pub fn validate(&self) -> Result<(), RateLimitError> {
        if self.limit == 0 {
            return Err(RateLimitError::InvalidSettings(
                "limit must be greater than zero".into(),
            ));
        }
        if self.window_secs == 0 {
            return Err(RateLimitError::InvalidSettings(
                "window must be greater than zero".into(),
            ));
        }
        if self.capacity == 0 {
            return Err(RateLimitError::InvalidSettings(
                "capacity must be greater than zero".into(),
            ));
        }
        if self.shared_mode_enabled && self.shared_backend_url.is_none() {
            return Err(RateLimitError::InvalidSettings(
                "shared mode requires a backend url".into(),
            ));
        }
        Ok(())
    }
}
