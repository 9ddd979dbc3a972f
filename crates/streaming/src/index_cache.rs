use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use foundation::TileKey;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Capacity and expiry policy of a [`TileIndexCache`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries; inserting beyond it evicts the least
    /// recently used entry.
    pub max: usize,
    /// Entries not read within this many milliseconds are dropped by
    /// [`TileIndexCache::purge_stale`].
    pub ttl_ms: Option<u64>,
    /// Whether `get` refreshes an entry's age.
    pub update_age_on_get: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max: 1000,
            ttl_ms: None,
            update_age_on_get: false,
        }
    }
}

impl CacheConfig {
    pub fn with_max(max: usize) -> Self {
        Self {
            max,
            ..Self::default()
        }
    }

    pub fn with_ttl(max: usize, ttl_ms: u64) -> Self {
        Self {
            max,
            ttl_ms: Some(ttl_ms),
            update_age_on_get: true,
        }
    }

    fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

/// Called with every value that leaves the cache: LRU eviction, TTL purge,
/// replacement, `delete` and `clear`.
pub type Dispose<V> = Box<dyn FnMut(TileKey, V)>;

#[derive(Debug)]
struct Slot<V> {
    value: V,
    /// Recency tick; the smallest live tick is the eviction candidate.
    tick: u64,
    touched: Instant,
}

/// Bounded LRU keyed by [`TileKey`] with optional TTL.
///
/// Notes on determinism:
/// - Entries live in a `BTreeMap`, so `keys()` is in key order.
/// - Recency is a monotonically increasing tick, never wall-clock time, so
///   eviction order does not depend on timer resolution.
/// - Age (for TTL) uses `tokio::time::Instant`, which tests can pause.
pub struct TileIndexCache<V> {
    config: CacheConfig,
    tick: u64,
    slots: BTreeMap<TileKey, Slot<V>>,
    recency: BTreeMap<u64, TileKey>,
    dispose: Option<Dispose<V>>,
    evicted: u64,
    expired: u64,
}

impl<V> TileIndexCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        debug_assert!(config.max > 0, "cache capacity must be positive");
        Self {
            config,
            tick: 0,
            slots: BTreeMap::new(),
            recency: BTreeMap::new(),
            dispose: None,
            evicted: 0,
            expired: 0,
        }
    }

    pub fn with_dispose(config: CacheConfig, dispose: impl FnMut(TileKey, V) + 'static) -> Self {
        let mut cache = Self::new(config);
        cache.dispose = Some(Box::new(dispose));
        cache
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of entries dropped for capacity since construction.
    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }

    /// Number of entries dropped for age since construction.
    pub fn expired_count(&self) -> u64 {
        self.expired
    }

    pub fn keys(&self) -> impl Iterator<Item = TileKey> + '_ {
        self.slots.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileKey, &V)> + '_ {
        self.slots.iter().map(|(k, s)| (*k, &s.value))
    }

    /// Read an entry, marking it most recently used.
    ///
    /// A stale entry is purged on the spot and reported as absent.
    pub fn get(&mut self, key: TileKey) -> Option<&V> {
        let now = Instant::now();
        if self.slot_is_stale(key, now) {
            self.remove_and_dispose(key);
            self.expired += 1;
            return None;
        }

        self.tick += 1;
        let tick = self.tick;
        let refresh_age = self.config.update_age_on_get;
        let slot = self.slots.get_mut(&key)?;
        self.recency.remove(&slot.tick);
        self.recency.insert(tick, key);
        slot.tick = tick;
        if refresh_age {
            slot.touched = now;
        }
        Some(&slot.value)
    }

    /// Read an entry without touching recency or age.
    pub fn peek(&self, key: TileKey) -> Option<&V> {
        let slot = self.slots.get(&key)?;
        if self.is_stale(slot, Instant::now()) {
            return None;
        }
        Some(&slot.value)
    }

    /// Mutable access without touching recency or age.
    pub fn peek_mut(&mut self, key: TileKey) -> Option<&mut V> {
        let now = Instant::now();
        if self.slot_is_stale(key, now) {
            return None;
        }
        self.slots.get_mut(&key).map(|s| &mut s.value)
    }

    pub fn has(&self, key: TileKey) -> bool {
        self.peek(key).is_some()
    }

    /// Insert or replace `key`, then evict down to capacity.
    pub fn set(&mut self, key: TileKey, value: V) {
        self.tick += 1;
        let slot = Slot {
            value,
            tick: self.tick,
            touched: Instant::now(),
        };
        self.recency.insert(slot.tick, key);
        if let Some(old) = self.slots.insert(key, slot) {
            self.recency.remove(&old.tick);
            self.run_dispose(key, old.value);
        }

        while self.slots.len() > self.config.max.max(1) {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            if let Some(slot) = self.slots.remove(&oldest) {
                self.evicted += 1;
                self.run_dispose(oldest, slot.value);
            }
        }
    }

    /// Remove `key`, disposing its value. Returns whether it was present.
    pub fn delete(&mut self, key: TileKey) -> bool {
        self.remove_and_dispose(key)
    }

    pub fn clear(&mut self) {
        let slots = std::mem::take(&mut self.slots);
        self.recency.clear();
        for (key, slot) in slots {
            self.run_dispose(key, slot.value);
        }
    }

    /// Drop every entry older than the TTL. Returns how many were dropped.
    pub fn purge_stale(&mut self) -> usize {
        let now = Instant::now();
        let stale: Vec<TileKey> = self
            .slots
            .iter()
            .filter(|(_, slot)| self.is_stale(slot, now))
            .map(|(k, _)| *k)
            .collect();

        for key in &stale {
            self.remove_and_dispose(*key);
        }
        self.expired += stale.len() as u64;
        stale.len()
    }

    fn is_stale(&self, slot: &Slot<V>, now: Instant) -> bool {
        self.config
            .ttl()
            .is_some_and(|ttl| now.saturating_duration_since(slot.touched) > ttl)
    }

    fn slot_is_stale(&self, key: TileKey, now: Instant) -> bool {
        self.slots
            .get(&key)
            .is_some_and(|slot| self.is_stale(slot, now))
    }

    fn remove_and_dispose(&mut self, key: TileKey) -> bool {
        let Some(slot) = self.slots.remove(&key) else {
            return false;
        };
        self.recency.remove(&slot.tick);
        self.run_dispose(key, slot.value);
        true
    }

    fn run_dispose(&mut self, key: TileKey, value: V) {
        if let Some(dispose) = self.dispose.as_mut() {
            dispose(key, value);
        }
    }
}

impl<V> fmt::Debug for TileIndexCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileIndexCache")
            .field("config", &self.config)
            .field("len", &self.slots.len())
            .field("evicted", &self.evicted)
            .field("expired", &self.expired)
            .finish_non_exhaustive()
    }
}

impl<V> Drop for TileIndexCache<V> {
    fn drop(&mut self) {
        self.clear();
    }
}
