//! Counter stores backing the rate limiter.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::CounterStoreError;

/// An atomic counter with per-key expiry.
#[async_trait]
pub trait CounterStore: Send + Sync + Debug {
    /// Returns a short name for logs.
    fn name(&self) -> &'static str;

    /// Atomically increments `key` and returns the new count.
    ///
    /// The TTL is applied only when the increment creates the key.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, CounterStoreError>;

    /// Checks that the store is reachable.
    async fn health_check(&self) -> Result<(), CounterStoreError> {
        Ok(())
    }
}

#[derive(Debug)]
struct Counter {
    count: u64,
    expires_at: Instant,
}

/// Tracked counters below which expired entries are left in place.
const MIN_SWEEP_LEN: usize = 1024;

/// Counter map that sweeps expired windows as it grows.
///
/// Every window has its own key, so a key is never touched again once its
/// window has passed. Sweeping whenever the map reaches twice its size after
/// the previous sweep keeps it within `max(MIN_SWEEP_LEN, 2 * live)` entries.
#[derive(Debug)]
struct Counters {
    map: HashMap<String, Counter>,
    sweep_at_len: usize,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
            sweep_at_len: MIN_SWEEP_LEN,
        }
    }
}

impl Counters {
    fn sweep(&mut self, now: Instant) {
        self.map.retain(|_, c| c.expires_at > now);
        self.sweep_at_len = (self.map.len() * 2).max(MIN_SWEEP_LEN);
    }
}

/// Process-local counter store.
///
/// Suitable for a single instance and for tests. Counters are not shared
/// across processes.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: Mutex<Counters>,
    failing: AtomicBool,
}

impl InMemoryCounterStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail as if the store were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns the live count for `key`.
    pub fn get(&self, key: &str) -> Option<u64> {
        let counters = self.counters.lock();
        counters
            .map
            .get(key)
            .filter(|c| c.expires_at > Instant::now())
            .map(|c| c.count)
    }

    /// Returns the number of tracked counters, including expired ones not
    /// yet swept.
    pub fn len(&self) -> usize {
        self.counters.lock().map.len()
    }

    /// Returns `true` if no counters are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired counters.
    pub fn purge_expired(&self) {
        self.counters.lock().sweep(Instant::now());
    }

    fn check_available(&self) -> Result<(), CounterStoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CounterStoreError::Unavailable {
                message: "in-memory store marked as failing".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, CounterStoreError> {
        self.check_available()?;

        let now = Instant::now();
        let mut counters = self.counters.lock();
        if counters.map.len() >= counters.sweep_at_len {
            counters.sweep(now);
        }
        let counter = counters
            .map
            .entry(key.to_string())
            .and_modify(|c| {
                if c.expires_at <= now {
                    c.count = 0;
                    c.expires_at = now + ttl;
                }
            })
            .or_insert_with(|| Counter {
                count: 0,
                expires_at: now + ttl,
            });
        counter.count += 1;
        Ok(counter.count)
    }

    async fn health_check(&self) -> Result<(), CounterStoreError> {
        self.check_available()
    }
}
