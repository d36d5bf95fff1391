//! Application configuration loaded from environment variables.

use std::env;

use flowgate_core::domain::{FailurePolicy, LimiterSettings};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub limiter: LimiterSettings,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            limiter: limiter_from_env(),
        }
    }
}

fn limiter_from_env() -> LimiterSettings {
    let defaults = LimiterSettings::default();
    LimiterSettings {
        limit: env_parse("RATE_LIMIT_MAX_REQUESTS", defaults.limit),
        window_secs: env_parse("RATE_LIMIT_WINDOW_SECS", defaults.window_secs),
        capacity: env_parse("RATE_LIMIT_CAPACITY", defaults.capacity),
        shared_mode_enabled: env_flag("RATE_LIMIT_SHARED", defaults.shared_mode_enabled),
        shared_backend_url: env::var("SHARED_BACKEND_URL").ok(),
        shared_backend_token: env::var("SHARED_BACKEND_TOKEN").ok(),
        sliding_mode: env_flag("RATE_LIMIT_SLIDING", defaults.sliding_mode),
        analytics_enabled: env_flag("RATE_LIMIT_ANALYTICS", defaults.analytics_enabled),
        failure_policy: if env_flag("RATE_LIMIT_FAIL_CLOSED", false) {
            FailurePolicy::FailClosed
        } else {
            FailurePolicy::FailOpen
        },
        shared_timeout_ms: env_parse("SHARED_BACKEND_TIMEOUT_MS", defaults.shared_timeout_ms),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}
