//! In-memory window counter - fixed/refreshing windows, strict capacity.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use flowgate_core::ports::{LocalVerdict, WindowCounter};

struct WindowRecord {
    count: u32,
    window_ends: Instant,
    /// Monotonic touch order, for exact least-recently-touched eviction.
    touched: u64,
}

struct Store {
    records: HashMap<String, WindowRecord>,
    clock: u64,
}

/// Capacity-bounded per-key window counter.
///
/// A record whose window has elapsed is reset in place on the next touch
/// and reclaimed by eviction otherwise, so an idle key's memory is freed
/// once its window passes. Tracked keys never exceed the configured
/// capacity: inserting past it purges elapsed windows first, then evicts
/// the least-recently-touched key.
///
/// Per-key linearizability comes from the store mutex: a check holds it
/// for one lookup-and-increment and never across an await point.
pub struct MemoryWindowCounter {
    store: Mutex<Store>,
    capacity: usize,
}

impl MemoryWindowCounter {
    pub fn new(capacity: usize) -> Self {
        Self {
            store: Mutex::new(Store {
                records: HashMap::new(),
                clock: 0,
            }),
            capacity,
        }
    }

    fn evict_over_capacity(store: &mut Store, capacity: usize, now: Instant) {
        if store.records.len() <= capacity {
            return;
        }
        store.records.retain(|_, record| record.window_ends > now);
        while store.records.len() > capacity {
            let Some(coldest) = store
                .records
                .iter()
                .min_by_key(|(_, record)| record.touched)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            store.records.remove(&coldest);
        }
    }
}

#[async_trait]
impl WindowCounter for MemoryWindowCounter {
    async fn check(&self, key: &str, limit: u32, window: Duration) -> LocalVerdict {
        let now = Instant::now();
        let mut store = self.store.lock();
        store.clock += 1;
        let clock = store.clock;

        let inserted = !store.records.contains_key(key);
        let record = store
            .records
            .entry(key.to_string())
            .or_insert_with(|| WindowRecord {
                count: 0,
                window_ends: now + window,
                touched: clock,
            });
        if record.window_ends <= now {
            record.count = 0;
            record.window_ends = now + window;
        }
        record.touched = clock;

        let admitted = record.count < limit;
        if admitted {
            record.count += 1;
        }
        let remaining = limit.saturating_sub(record.count);
        let until_reset = record.window_ends.saturating_duration_since(now);

        if inserted {
            Self::evict_over_capacity(&mut store, self.capacity, now);
        }

        LocalVerdict {
            admitted,
            remaining,
            reset_at: Utc::now() + chrono::Duration::from_std(until_reset).unwrap_or_default(),
        }
    }

    async fn sync_remaining(
        &self,
        key: &str,
        limit: u32,
        remaining: u32,
        reset_at: DateTime<Utc>,
    ) {
        let now = Instant::now();
        let until_reset = (reset_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let mut store = self.store.lock();
        store.clock += 1;
        let clock = store.clock;
        store.records.insert(
            key.to_string(),
            WindowRecord {
                count: limit.saturating_sub(remaining),
                window_ends: now + until_reset,
                touched: clock,
            },
        );
        Self::evict_over_capacity(&mut store, self.capacity, now);
    }

    fn tracked_keys(&self) -> usize {
        self.store.lock().records.len()
    }
}
