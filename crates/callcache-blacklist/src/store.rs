//! Bounded, expiring, lock-striped key/value store.
//!
//! # Design
//! - Entries live in LRU shards; the shard count follows the concurrency hint
//!   so unrelated keys rarely contend on the same lock.
//! - Each entry remembers when it was last written and reads past the TTL
//!   behave as if the entry were absent.
//! - Read-modify-write happens under the shard lock, so concurrent writers to
//!   one key observe last-write-wins.

use std::hash::{BuildHasher, Hash, RandomState};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::{BlacklistError, BlacklistResult};

const MAX_SHARDS: usize = 64;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    written_at: Instant,
}

/// Thread-safe LRU store whose entries expire a fixed time after their last write.
pub struct ExpiringStore<K, V> {
    shards: Vec<Mutex<LruCache<K, Entry<V>>>>,
    hasher: RandomState,
    ttl: Duration,
}

impl<K, V> ExpiringStore<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    /// Build a store holding roughly `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns [`BlacklistError::InvalidBound`] if `capacity` or `concurrency`
    /// is zero.
    pub fn new(
        store: &'static str,
        capacity: usize,
        concurrency: usize,
        ttl: Duration,
    ) -> BlacklistResult<Self> {
        if capacity == 0 {
            return Err(BlacklistError::InvalidBound {
                store,
                field: "size",
            });
        }
        if concurrency == 0 {
            return Err(BlacklistError::InvalidBound {
                store,
                field: "concurrency",
            });
        }

        let shard_count = concurrency.min(capacity).min(MAX_SHARDS);
        let per_shard =
            NonZeroUsize::new(capacity.div_ceil(shard_count)).unwrap_or(NonZeroUsize::MIN);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruCache::new(per_shard)))
            .collect();

        Ok(Self {
            shards,
            hasher: RandomState::new(),
            ttl,
        })
    }

    fn shard(&self, key: &K) -> &Mutex<LruCache<K, Entry<V>>> {
        let count = u64::try_from(self.shards.len()).unwrap_or(1);
        let index = usize::try_from(self.hasher.hash_one(key) % count).unwrap_or(0);
        &self.shards[index]
    }

    fn live<'a>(&self, cache: &'a mut LruCache<K, Entry<V>>, key: &K) -> Option<&'a V> {
        let expired = cache
            .peek(key)
            .is_some_and(|entry| entry.written_at.elapsed() >= self.ttl);
        if expired {
            cache.pop(key);
            return None;
        }
        cache.get(key).map(|entry| &entry.value)
    }

    /// Current value, if present and not expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut cache = self.shard(key).lock();
        self.live(&mut cache, key).cloned()
    }

    /// Write `value`, resetting the entry's lifetime.
    pub fn insert(&self, key: K, value: V) {
        let mut cache = self.shard(&key).lock();
        cache.put(
            key,
            Entry {
                value,
                written_at: Instant::now(),
            },
        );
    }

    /// Atomically derive a new value from the current one.
    ///
    /// `update` sees the live value (or `None`) and returns the value to write,
    /// or `None` to leave the entry untouched. Returns the value seen.
    pub fn compute<F>(&self, key: K, update: F) -> Option<V>
    where
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        let mut cache = self.shard(&key).lock();
        let previous = self.live(&mut cache, &key).cloned();
        if let Some(value) = update(previous.as_ref()) {
            cache.put(
                key,
                Entry {
                    value,
                    written_at: Instant::now(),
                },
            );
        }
        previous
    }

    /// Return the live value or insert the one produced by `init`.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `init`; nothing is inserted then.
    pub fn get_or_try_insert_with<F, E>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let mut cache = self.shard(&key).lock();
        if let Some(value) = self.live(&mut cache, &key) {
            return Ok(value.clone());
        }
        let value = init()?;
        cache.put(
            key,
            Entry {
                value: value.clone(),
                written_at: Instant::now(),
            },
        );
        Ok(value)
    }

    /// Number of stored entries, including ones that expired but were not yet read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().is_empty())
    }
}
