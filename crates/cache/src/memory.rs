//! In-process size cache.

use crate::error::CacheResult;
use crate::traits::SizeCache;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    value: i64,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Size cache backed by a concurrent hash map.
///
/// With a TTL, every write restarts the entry's lifetime. Expired entries read
/// as absent and are dropped when next touched or by the next purge.
#[derive(Debug, Default)]
pub struct MemorySizeCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Option<Duration>,
}

impl MemorySizeCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    fn entry(&self, value: i64, now: Instant) -> CacheEntry {
        CacheEntry {
            value,
            expires_at: self.ttl.map(|ttl| now + ttl),
        }
    }

    fn live_value(&self, key: &str, now: Instant) -> Option<i64> {
        let value = self.entries.get(key).map(|entry| *entry)?;
        if value.is_expired(now) {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
            None
        } else {
            Some(value.value)
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SizeCache for MemorySizeCache {
    async fn get(&self, key: &str) -> CacheResult<Option<i64>> {
        Ok(self.live_value(key, Instant::now()))
    }

    async fn set(&self, key: &str, value: i64) -> CacheResult<()> {
        let entry = self.entry(value, Instant::now());
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn multi_get(&self, keys: &[String]) -> CacheResult<Vec<(String, i64)>> {
        let now = Instant::now();
        Ok(keys
            .iter()
            .filter_map(|key| self.live_value(key, now).map(|value| (key.clone(), value)))
            .collect())
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let now = Instant::now();
        let value = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let base = if current.is_expired(now) { 0 } else { current.value };
                let value = base.saturating_add(delta);
                if value == 0 {
                    occupied.remove();
                } else {
                    occupied.insert(self.entry(value, now));
                }
                value
            }
            Entry::Vacant(vacant) => {
                if delta != 0 {
                    vacant.insert(self.entry(delta, now));
                }
                delta
            }
        };
        Ok(value)
    }

    async fn purge_expired(&self) -> CacheResult<usize> {
        let now = Instant::now();
        let mut purged = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                purged += 1;
            }
            keep
        });
        Ok(purged)
    }
}
