//! Bounded, time-expiring cache
//!
//! `ExpiringCache` pairs an [`LruStore`] with a tracked-key set. Every entry carries
//! an absolute expiry computed at insert time; expiry is enforced lazily, when an
//! entry is looked up, never by a background sweep. When the store overflows it
//! reports the evicted entry straight back to the cache, which drops the key from
//! the tracked set before `insert` returns.

mod clock;
mod lru;

pub use clock::{Clock, ManualClock, SystemClock};
pub use lru::LruStore;

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::trace;

use crate::error::{KeepError, Result};

/// Default entry lifetime (12 hours)
pub const DEFAULT_LIFETIME_SECS: i64 = 12 * 60 * 60;

/// Longest accepted entry lifetime (100 years)
pub const MAX_LIFETIME_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Default maximum number of entries
pub const DEFAULT_CAPACITY: usize = 50;

/// Callback invoked with the key of every capacity eviction
pub type EvictionListener<K> = Box<dyn Fn(&K) + Send + Sync>;

/// Sizing and lifetime of an [`ExpiringCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// How long an entry stays live after insertion
    pub lifetime: Duration,
    /// Hard ceiling on stored entries
    pub capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            lifetime: Duration::seconds(DEFAULT_LIFETIME_SECS),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl CacheOptions {
    pub fn new(lifetime: Duration, capacity: usize) -> Self {
        Self { lifetime, capacity }
    }

    /// Reject options that would make the cache unusable
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(KeepError::Config("cache capacity must be > 0".to_string()));
        }
        if self.lifetime <= Duration::zero() {
            return Err(KeepError::Config(format!(
                "cache lifetime must be positive, got {}s",
                self.lifetime.num_seconds()
            )));
        }
        if self.lifetime > Duration::seconds(MAX_LIFETIME_SECS) {
            return Err(KeepError::Config(format!(
                "cache lifetime must be at most {}s, got {}s",
                MAX_LIFETIME_SECS,
                self.lifetime.num_seconds()
            )));
        }
        Ok(())
    }
}

/// One serialized cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<K, V> {
    pub key: K,
    pub value: V,
    pub expiry: DateTime<Utc>,
}

/// The encoded form of a cache: its live entries, in no particular order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheSnapshot<K, V>(pub Vec<CacheEntry<K, V>>);

#[derive(Debug)]
struct Slot<V> {
    value: V,
    expiry: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner<K, V> {
    store: LruStore<K, Slot<V>>,
    tracked: HashSet<K>,
}

impl<K: Hash + Eq + Clone, V> Inner<K, V> {
    fn remove(&mut self, key: &K) -> Option<Slot<V>> {
        self.tracked.remove(key);
        self.store.remove(key)
    }

    /// Live slot for `key`, dropping it first if it has expired
    fn lookup(&mut self, key: &K, now: DateTime<Utc>) -> Option<&Slot<V>> {
        let expired = match self.store.get(key) {
            None => return None,
            Some(slot) => now >= slot.expiry,
        };
        if expired {
            trace!("Dropping expired cache entry");
            self.remove(key);
            return None;
        }
        self.store.peek(key)
    }
}

/// Thread-safe bounded map with per-entry expiry
pub struct ExpiringCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    clock: Arc<dyn Clock>,
    options: CacheOptions,
    on_evict: Option<EvictionListener<K>>,
}

impl<K, V> std::fmt::Debug for ExpiringCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<K: Hash + Eq + Clone, V: Clone> Default for ExpiringCache<K, V> {
    fn default() -> Self {
        Self::build(CacheOptions::default(), Arc::new(SystemClock))
    }
}

impl<K: Hash + Eq + Clone, V: Clone> ExpiringCache<K, V> {
    /// Create a cache driven by the system clock
    pub fn new(options: CacheOptions) -> Result<Self> {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Create a cache with an injected time source
    pub fn with_clock(options: CacheOptions, clock: Arc<dyn Clock>) -> Result<Self> {
        options.validate()?;
        Ok(Self::build(options, clock))
    }

    fn build(options: CacheOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                store: LruStore::new(options.capacity),
                tracked: HashSet::with_capacity(options.capacity),
            }),
            clock,
            options,
            on_evict: None,
        }
    }

    /// Rebuild a cache from a snapshot, keeping each entry's original expiry
    pub fn restore(
        snapshot: CacheSnapshot<K, V>,
        options: CacheOptions,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let cache = Self::with_clock(options, clock)?;
        for entry in snapshot.0 {
            cache.insert_with_expiry(entry.key, entry.value, entry.expiry);
        }
        Ok(cache)
    }

    /// Register a listener for capacity evictions
    ///
    /// The listener runs after the cache lock is released, so it may call back
    /// into the cache.
    pub fn on_evict(mut self, listener: impl Fn(&K) + Send + Sync + 'static) -> Self {
        self.on_evict = Some(Box::new(listener));
        self
    }

    pub fn options(&self) -> CacheOptions {
        self.options
    }

    pub fn capacity(&self) -> usize {
        self.options.capacity
    }

    pub fn lifetime(&self) -> Duration {
        self.options.lifetime
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a value that expires one lifetime from now
    ///
    /// An expiry past the last representable instant is clamped to it.
    pub fn insert(&self, key: K, value: V) {
        let expiry = self
            .clock
            .now()
            .checked_add_signed(self.options.lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.insert_with_expiry(key, value, expiry);
    }

    fn insert_with_expiry(&self, key: K, value: V, expiry: DateTime<Utc>) {
        let evicted = {
            let mut inner = self.lock();
            let evicted = inner.store.insert(key.clone(), Slot { value, expiry });
            if let Some((evicted_key, _)) = &evicted {
                inner.tracked.remove(evicted_key);
            }
            inner.tracked.insert(key);
            evicted
        };

        if let Some((evicted_key, _)) = evicted {
            trace!(capacity = self.options.capacity, "Evicted cache entry");
            if let Some(listener) = &self.on_evict {
                listener(&evicted_key);
            }
        }
    }

    /// Value for `key` if it is present and not yet expired
    ///
    /// An expired entry is removed as a side effect.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.lookup(key, now).map(|slot| slot.value.clone())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.lookup(key, now).is_some()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().remove(key).map(|slot| slot.value)
    }

    pub fn remove_all(&self) {
        let mut inner = self.lock();
        inner.store.clear();
        inner.tracked.clear();
    }

    /// All live values, in tracked-key order
    ///
    /// Expired entries met along the way are dropped.
    pub fn values(&self) -> Vec<V> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let keys: Vec<K> = inner.tracked.iter().cloned().collect();
        keys.iter()
            .filter_map(|key| inner.lookup(key, now).map(|slot| slot.value.clone()))
            .collect()
    }

    /// Keys the cache currently tracks, including expired ones not yet looked up
    pub fn keys(&self) -> Vec<K> {
        self.lock().tracked.iter().cloned().collect()
    }

    /// Number of tracked entries, including expired ones not yet looked up
    pub fn len(&self) -> usize {
        self.lock().tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entries with their expiry, for encoding
    pub fn snapshot(&self) -> CacheSnapshot<K, V> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let keys: Vec<K> = inner.tracked.iter().cloned().collect();
        let entries = keys
            .into_iter()
            .filter_map(|key| {
                let slot = inner.lookup(&key, now)?;
                Some(CacheEntry {
                    value: slot.value.clone(),
                    expiry: slot.expiry,
                    key,
                })
            })
            .collect();
        CacheSnapshot(entries)
    }
}

impl<K, V> Serialize for ExpiringCache<K, V>
where
    K: Hash + Eq + Clone + Serialize,
    V: Clone + Serialize,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de, K, V> Deserialize<'de> for ExpiringCache<K, V>
where
    K: Hash + Eq + Clone + Deserialize<'de>,
    V: Clone + Deserialize<'de>,
{
    /// Restores into a system-clock cache with default options
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let snapshot = CacheSnapshot::deserialize(deserializer)?;
        Self::restore(snapshot, CacheOptions::default(), Arc::new(SystemClock))
            .map_err(serde::de::Error::custom)
    }
}
