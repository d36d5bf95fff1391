//! Application state - shared across all handlers.

use std::sync::Arc;

use flowgate_core::RateLimitError;
use flowgate_core::domain::LimiterSettings;
use flowgate_core::engine::DecisionEngine;
use flowgate_core::handle::LimiterHandle;
use flowgate_core::ports::SharedCounter;
use flowgate_infra::MemoryWindowCounter;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<LimiterHandle>,
}

impl AppState {
    /// Build the application state for the given limiter settings.
    pub async fn new(settings: LimiterSettings) -> Result<Self, RateLimitError> {
        settings.validate()?;
        let engine = build_engine(&settings).await?;
        Ok(Self {
            limiter: Arc::new(LimiterHandle::new(settings, engine)),
        })
    }

    /// Apply new settings: rebuild the counter/client pair and swap it
    /// in atomically. Unchanged settings are a no-op.
    pub async fn reconfigure(&self, settings: LimiterSettings) -> Result<bool, RateLimitError> {
        settings.validate()?;
        if self.limiter.is_active(&settings) {
            return Ok(false);
        }
        let engine = build_engine(&settings).await?;
        Ok(self.limiter.install(settings, engine))
    }
}

async fn build_engine(
    settings: &LimiterSettings,
) -> Result<Arc<DecisionEngine>, RateLimitError> {
    let local = Arc::new(MemoryWindowCounter::new(settings.capacity));
    let shared = shared_counter(settings).await?;
    Ok(Arc::new(DecisionEngine::from_settings(
        settings, local, shared,
    )))
}

#[cfg(feature = "redis")]
async fn shared_counter(
    settings: &LimiterSettings,
) -> Result<Option<Arc<dyn SharedCounter>>, RateLimitError> {
    use flowgate_core::domain::FailurePolicy;
    use flowgate_infra::{RedisCounterConfig, RedisSharedCounter};

    if !settings.shared_mode_enabled {
        return Ok(None);
    }
    let config = RedisCounterConfig::from_settings(settings)?;
    match RedisSharedCounter::connect(config).await {
        Ok(counter) => Ok(Some(Arc::new(counter))),
        Err(e) if settings.failure_policy == FailurePolicy::FailOpen => {
            tracing::warn!(
                "Shared counter store unreachable: {}. Running local-only.",
                e
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(not(feature = "redis"))]
async fn shared_counter(
    settings: &LimiterSettings,
) -> Result<Option<Arc<dyn SharedCounter>>, RateLimitError> {
    if settings.shared_mode_enabled {
        tracing::warn!("Built without the redis feature - shared mode disabled");
    }
    Ok(None)
}
