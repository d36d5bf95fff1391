//! # Flowgate Infrastructure
//!
//! Concrete implementations of the counter ports defined in
//! `flowgate-core`: the in-memory window counter and the Redis-backed
//! shared counter client.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All backends enabled
//! - `minimal` - No external dependencies, in-memory only
//! - `redis` - Redis shared counter client

pub mod counter;

// Re-exports - In-Memory
pub use counter::MemoryWindowCounter;

// Re-exports - Redis
#[cfg(feature = "redis")]
pub use counter::{RedisCounterConfig, RedisSharedCounter};
