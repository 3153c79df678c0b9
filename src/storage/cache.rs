use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex};

use crate::common::{DriftError, DriftResult};

/// How a [`RefCache`] materializes and retires its values.
pub trait Backing: Send + Sync + 'static {
    type Item: Send + Sync;

    /// Load the value for `key`. Called without the cache mutex held, at
    /// most once concurrently per key.
    fn load(&self, key: u64) -> DriftResult<Self::Item>;

    /// Called when the last reference to `key` is released, with the
    /// cache mutex held so no concurrent `get` can reload the key until
    /// write-back has landed. Failures must be handled internally
    /// (eviction runs from `Drop`).
    fn evict(&self, key: u64, item: &Self::Item);
}

struct Slot<T> {
    item: Arc<T>,
    refs: usize,
}

struct CacheState<T> {
    slots: HashMap<u64, Slot<T>>,
    loading: HashSet<u64>,
    count: usize,
}

/// Reference-counted cache with single-flight loads.
///
/// `get` pins the value and hands out a [`CacheRef`]; dropping the last
/// reference evicts the value through the backing, under the cache mutex,
/// so a reload of the same key is ordered after the eviction's write-back.
/// When `count` reaches `capacity` and the key is absent, `get` fails with
/// `CacheFull` rather than evicting a pinned value. Threads that race on
/// the same missing key park on a condvar until the loading thread
/// installs the value.
pub struct RefCache<B: Backing> {
    backing: B,
    capacity: usize,
    state: Mutex<CacheState<B::Item>>,
    loaded: Condvar,
}

impl<B: Backing> RefCache<B> {
    pub fn new(backing: B, capacity: usize) -> Self {
        Self {
            backing,
            capacity,
            state: Mutex::new(CacheState {
                slots: HashMap::new(),
                loading: HashSet::new(),
                count: 0,
            }),
            loaded: Condvar::new(),
        }
    }

    pub fn get(self: &Arc<Self>, key: u64) -> DriftResult<CacheRef<B>> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.loading.contains(&key) {
                // Another thread is fetching this key.
                state = self.loaded.wait(state).unwrap();
                continue;
            }
            if let Some(slot) = state.slots.get_mut(&key) {
                slot.refs += 1;
                return Ok(CacheRef {
                    cache: Arc::clone(self),
                    key,
                    item: Arc::clone(&slot.item),
                });
            }
            if state.count == self.capacity {
                return Err(DriftError::CacheFull);
            }
            state.count += 1;
            state.loading.insert(key);
            break;
        }
        drop(state);

        let loaded = self.backing.load(key);

        let mut state = self.state.lock().unwrap();
        state.loading.remove(&key);
        self.loaded.notify_all();
        match loaded {
            Ok(item) => {
                let item = Arc::new(item);
                state.slots.insert(
                    key,
                    Slot {
                        item: Arc::clone(&item),
                        refs: 1,
                    },
                );
                Ok(CacheRef {
                    cache: Arc::clone(self),
                    key,
                    item,
                })
            }
            Err(e) => {
                state.count -= 1;
                Err(e)
            }
        }
    }

    fn release(&self, key: u64) {
        let mut state = self.state.lock().unwrap();
        let Some(slot) = state.slots.get_mut(&key) else {
            return;
        };
        slot.refs -= 1;
        if slot.refs > 0 {
            return;
        }
        let slot = state.slots.remove(&key).unwrap();
        state.count -= 1;
        // Evict while still holding the mutex: a racing get() for this
        // key must not reload from the store before the write-back lands,
        // or the cache would serve pre-mutation bytes marked clean.
        self.backing.evict(key, &slot.item);
    }
}

/// Pinned handle to a cached value. Dereferences to the value; dropping it
/// releases the pin.
pub struct CacheRef<B: Backing> {
    cache: Arc<RefCache<B>>,
    key: u64,
    item: Arc<B::Item>,
}

impl<B: Backing> Deref for CacheRef<B> {
    type Target = B::Item;

    fn deref(&self) -> &B::Item {
        &self.item
    }
}

impl<B: Backing> Drop for CacheRef<B> {
    fn drop(&mut self) {
        self.cache.release(self.key);
    }
}
