//! Redis shared counter client - fixed and sliding window modes.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo, Script};
use uuid::Uuid;

use flowgate_core::RateLimitError;
use flowgate_core::domain::{CountingMode, LimiterSettings};
use flowgate_core::ports::{SharedCounter, SharedVerdict};

/// Shared counter backend configuration.
#[derive(Debug, Clone)]
pub struct RedisCounterConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Backend token, applied as the connection password when set.
    pub token: Option<String>,
    /// Key prefix for counter keys.
    pub key_prefix: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Upper bound on one increment-and-check round trip.
    pub call_timeout: Duration,
}

impl Default for RedisCounterConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            token: None,
            key_prefix: "flowgate".to_string(),
            connect_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(1),
        }
    }
}

impl RedisCounterConfig {
    /// Derive the backend configuration from active limiter settings.
    pub fn from_settings(settings: &LimiterSettings) -> Result<Self, RateLimitError> {
        let url = settings.shared_backend_url.clone().ok_or_else(|| {
            RateLimitError::InvalidSettings("shared mode requires a backend url".into())
        })?;
        Ok(Self {
            url,
            token: settings.shared_backend_token.clone(),
            call_timeout: Duration::from_millis(settings.shared_timeout_ms),
            ..Default::default()
        })
    }
}

/// Redis-backed shared counter.
///
/// Fixed mode runs an atomic INCR with expiry-on-first-hit; sliding mode
/// keeps a sorted-set log of request timestamps trimmed to the trailing
/// window. Either way one check is one scripted round trip.
pub struct RedisSharedCounter {
    conn: ConnectionManager,
    config: RedisCounterConfig,
    fixed_script: Script,
    sliding_script: Script,
}

impl RedisSharedCounter {
    pub async fn connect(config: RedisCounterConfig) -> Result<Self, RateLimitError> {
        let mut info = config
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;
        if let Some(token) = &config.token {
            info.redis.password = Some(token.clone());
        }
        let client = Client::open(info).map_err(|e| RateLimitError::Backend(e.to_string()))?;

        // Use timeout to prevent hanging if Redis is unreachable
        let conn_manager_fut = ConnectionManager::new(client);
        let conn = tokio::time::timeout(config.connect_timeout, conn_manager_fut)
            .await
            .map_err(|_| RateLimitError::Backend("connection timed out".to_string()))?
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;

        // Atomic increment with TTL; returns [current_count, ttl_remaining]
        let fixed_script = Script::new(
            r#"
            local key = KEYS[1]
            local window_secs = tonumber(ARGV[2])

            local current = redis.call('INCR', key)
            if current == 1 then
                redis.call('EXPIRE', key, window_secs)
            end

            local ttl = redis.call('TTL', key)
            return {current, ttl}
            "#,
        );

        // Sorted-set log trimmed to the trailing window; returns
        // [admitted, count, oldest_entry_ms]
        let sliding_script = Script::new(
            r#"
            local key = KEYS[1]
            local limit = tonumber(ARGV[1])
            local window_ms = tonumber(ARGV[2])
            local now_ms = tonumber(ARGV[3])
            local member = ARGV[4]

            redis.call('ZREMRANGEBYSCORE', key, 0, now_ms - window_ms)
            local count = redis.call('ZCARD', key)
            local admitted = 0
            if count < limit then
                redis.call('ZADD', key, now_ms, member)
                count = count + 1
                admitted = 1
            end
            redis.call('PEXPIRE', key, window_ms)

            local oldest_ms = now_ms
            local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
            if oldest[2] then
                oldest_ms = tonumber(oldest[2])
            end
            return {admitted, count, oldest_ms}
            "#,
        );

        tracing::info!(url = %config.url, "connected to shared counter store");

        Ok(Self {
            conn,
            config,
            fixed_script,
            sliding_script,
        })
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    async fn check_fixed(
        &self,
        redis_key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<SharedVerdict, RateLimitError> {
        let mut conn = self.conn.clone();
        let result: Vec<i64> = self
            .fixed_script
            .key(redis_key)
            .arg(limit)
            .arg(window.as_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;

        let count = result.first().copied().unwrap_or(1).max(0) as u64;
        let ttl_secs = result
            .get(1)
            .copied()
            .unwrap_or(window.as_secs() as i64)
            .max(1);

        Ok(SharedVerdict {
            success: count <= u64::from(limit),
            remaining: u64::from(limit).saturating_sub(count) as u32,
            reset_at: Utc::now() + chrono::Duration::seconds(ttl_secs),
        })
    }

    async fn check_sliding(
        &self,
        redis_key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<SharedVerdict, RateLimitError> {
        let mut conn = self.conn.clone();
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = window.as_millis() as i64;
        // A unique member per request; two hits in the same millisecond
        // must both land in the log.
        let member = format!("{now_ms}-{}", Uuid::new_v4());

        let result: Vec<i64> = self
            .sliding_script
            .key(redis_key)
            .arg(limit)
            .arg(window_ms)
            .arg(now_ms)
            .arg(&member)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;

        let admitted = result.first().copied().unwrap_or(0) == 1;
        let count = result.get(1).copied().unwrap_or(0).max(0) as u64;
        let oldest_ms = result.get(2).copied().unwrap_or(now_ms);

        Ok(SharedVerdict {
            success: admitted,
            remaining: u64::from(limit).saturating_sub(count) as u32,
            reset_at: DateTime::from_timestamp_millis(oldest_ms + window_ms)
                .unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl SharedCounter for RedisSharedCounter {
    async fn increment_and_check(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        mode: CountingMode,
    ) -> Result<SharedVerdict, RateLimitError> {
        let redis_key = self.make_key(key);

        let call = async {
            match mode {
                CountingMode::Fixed => self.check_fixed(&redis_key, limit, window).await,
                CountingMode::Sliding => self.check_sliding(&redis_key, limit, window).await,
            }
        };

        tokio::time::timeout(self.config.call_timeout, call)
            .await
            .map_err(|_| RateLimitError::Backend("shared counter call timed out".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn get_test_counter() -> Option<RedisSharedCounter> {
        let config = RedisCounterConfig {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6389".to_string()),
            connect_timeout: Duration::from_secs(1),
            key_prefix: "test_flowgate".to_string(),
            ..Default::default()
        };

        RedisSharedCounter::connect(config).await.ok()
    }

    fn unique_key(tag: &str) -> String {
        format!("ip:{tag}-{}", Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_fixed_window_counting() {
        let counter = match get_test_counter().await {
            Some(c) => c,
            None => return,
        };
        let key = unique_key("fixed");
        let window = Duration::from_secs(1);

        let verdict = counter
            .increment_and_check(&key, 2, window, CountingMode::Fixed)
            .await
            .unwrap();
        assert!(verdict.success);
        assert_eq!(verdict.remaining, 1);

        let verdict = counter
            .increment_and_check(&key, 2, window, CountingMode::Fixed)
            .await
            .unwrap();
        assert!(verdict.success);
        assert_eq!(verdict.remaining, 0);

        let verdict = counter
            .increment_and_check(&key, 2, window, CountingMode::Fixed)
            .await
            .unwrap();
        assert!(!verdict.success);

        // Wait for reset
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let verdict = counter
            .increment_and_check(&key, 2, window, CountingMode::Fixed)
            .await
            .unwrap();
        assert!(verdict.success);
    }

    #[tokio::test]
    async fn test_sliding_window_counting() {
        let counter = match get_test_counter().await {
            Some(c) => c,
            None => return,
        };
        let key = unique_key("sliding");
        let window = Duration::from_secs(1);

        let verdict = counter
            .increment_and_check(&key, 2, window, CountingMode::Sliding)
            .await
            .unwrap();
        assert!(verdict.success);

        let verdict = counter
            .increment_and_check(&key, 2, window, CountingMode::Sliding)
            .await
            .unwrap();
        assert!(verdict.success);
        assert_eq!(verdict.remaining, 0);

        let verdict = counter
            .increment_and_check(&key, 2, window, CountingMode::Sliding)
            .await
            .unwrap();
        assert!(!verdict.success, "a full trailing window must reject");

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let verdict = counter
            .increment_and_check(&key, 2, window, CountingMode::Sliding)
            .await
            .unwrap();
        assert!(verdict.success, "entries outside the trailing window age out");
    }
}
