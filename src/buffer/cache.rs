//! Reference-counted resource cache.
//!
//! The cache hands out shared `Arc<T>` values keyed by a 64-bit id and keeps
//! an explicit reference count per key. A key stays resident until every
//! `get` has been matched by a `release`, at which point the value is handed
//! to the loader's `evict` hook (write-back) and dropped.
//!
//! Misses are loaded outside the cache lock so loads of different keys run
//! concurrently. A key being loaded is marked in-flight; callers asking for
//! it block on a condition variable until the load finishes.

use crate::error::{Result, StorageError};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Strategy plugged into a [`ResourceCache`]
pub trait CacheLoader: Send + Sync {
    /// The cached value type
    type Item: Send + Sync;

    /// Load the value for a key that is not resident
    fn load_miss(&self, key: u64) -> Result<Arc<Self::Item>>;

    /// Write back a value whose reference count reached zero
    fn evict(&self, key: u64, item: &Arc<Self::Item>) -> Result<()>;
}

struct CacheEntry<T> {
    value: Arc<T>,
    refs: usize,
}

struct CacheState<T> {
    entries: HashMap<u64, CacheEntry<T>>,
    /// Keys whose loader is currently running
    loading: HashSet<u64>,
    /// Resident plus in-flight keys
    count: usize,
}

/// Generic reference-counting cache engine
pub struct ResourceCache<L: CacheLoader> {
    loader: L,
    state: Mutex<CacheState<L::Item>>,
    loaded: Condvar,
    /// Maximum resident keys, 0 for unbounded
    max_resident: usize,
}

impl<L: CacheLoader> ResourceCache<L> {
    /// Create a cache bounded to `max_resident` keys (0 = unbounded)
    pub fn new(loader: L, max_resident: usize) -> Self {
        Self {
            loader,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                loading: HashSet::new(),
                count: 0,
            }),
            loaded: Condvar::new(),
            max_resident,
        }
    }

    /// Get the strategy object
    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Get a value, loading it on a miss. Every successful `get` must be
    /// paired with a `release` of the same key.
    pub fn get(&self, key: u64) -> Result<Arc<L::Item>> {
        {
            let mut state = self.state.lock();
            loop {
                if state.loading.contains(&key) {
                    self.loaded.wait(&mut state);
                    continue;
                }

                if let Some(entry) = state.entries.get_mut(&key) {
                    entry.refs += 1;
                    return Ok(Arc::clone(&entry.value));
                }

                if self.max_resident > 0 && state.count >= self.max_resident {
                    return Err(StorageError::CacheFull);
                }

                state.count += 1;
                state.loading.insert(key);
                break;
            }
        }

        let loaded = self.loader.load_miss(key);

        let mut state = self.state.lock();
        state.loading.remove(&key);
        let result = match loaded {
            Ok(value) => {
                state.entries.insert(
                    key,
                    CacheEntry {
                        value: Arc::clone(&value),
                        refs: 1,
                    },
                );
                Ok(value)
            }
            Err(e) => {
                state.count -= 1;
                Err(e)
            }
        };
        self.loaded.notify_all();
        result
    }

    /// Drop one reference; the last one evicts the value.
    pub fn release(&self, key: u64) -> Result<()> {
        let mut state = self.state.lock();
        let drained = match state.entries.get_mut(&key) {
            Some(entry) => {
                entry.refs -= 1;
                entry.refs == 0
            }
            None => {
                tracing::warn!(key, "release of a key that is not resident");
                return Ok(());
            }
        };

        if drained {
            if let Some(entry) = state.entries.remove(&key) {
                state.count -= 1;
                self.loader.evict(key, &entry.value)?;
            }
        }
        Ok(())
    }

    /// Evict and write back every resident value regardless of its
    /// reference count. Returns the first write-back error, if any.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        let mut first_err = None;
        let entries: Vec<(u64, CacheEntry<L::Item>)> = state.entries.drain().collect();
        for (key, entry) in entries {
            if let Err(e) = self.loader.evict(key, &entry.value) {
                first_err.get_or_insert(e);
            }
        }
        state.count = 0;
        first_err.map_or(Ok(()), Err)
    }

    /// Number of resident values
    pub fn resident(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Current reference count of a key (0 if not resident)
    pub fn ref_count(&self, key: u64) -> usize {
        self.state
            .lock()
            .entries
            .get(&key)
            .map_or(0, |entry| entry.refs)
    }
}
