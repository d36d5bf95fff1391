//! Counter implementations.

mod memory;

pub use memory::MemoryWindowCounter;

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::{RedisCounterConfig, RedisSharedCounter};
