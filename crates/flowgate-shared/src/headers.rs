//! Rate-limit header conventions, mirrored onto both rejected and
//! forwarded responses.

pub static HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub static HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub static HEADER_RESET: &str = "X-RateLimit-Reset";
pub static HEADER_RETRY_AFTER: &str = "Retry-After";

/// Header values for one decision: limit, remaining quota, and the
/// reset time as epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: u32,
    pub remaining: u32,
    pub reset_epoch_secs: i64,
}

impl RateLimitHeaders {
    /// (name, value) pairs in emission order.
    pub fn pairs(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset_epoch_secs.to_string()),
        ]
    }
}
