// In-memory image cache keyed by reference URL, with an optional LRU bound.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

struct Entry<V> {
    value: V,
    last_used: u64,
}

/// Hash map with an optional least-recently-used bound. Unsynchronized.
pub(crate) struct BoundedMap<K, V> {
    entries: HashMap<K, Entry<V>>,
    clock: u64,
    capacity: Option<usize>,
}

impl<K, V> BoundedMap<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: HashMap::new(),
            clock: 0,
            capacity: capacity.map(|c| c.max(1)),
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub(crate) fn get<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.last_used = now;
        Some(entry.value.clone())
    }

    pub(crate) fn insert(&mut self, key: K, value: V) {
        let now = self.tick();
        self.entries.insert(
            key,
            Entry {
                value,
                last_used: now,
            },
        );

        let Some(capacity) = self.capacity else {
            return;
        };
        while self.entries.len() > capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    self.entries.remove(&k);
                    debug!("evicted key={:?}", k);
                }
                None => break,
            }
        }
    }

    pub(crate) fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

/// Key → bytes store shared by every in-flight download.
///
/// All reads and writes go through the one internal lock, so callers never
/// coordinate among themselves. Lookups never suspend.
pub struct FetchCache {
    inner: Mutex<BoundedMap<String, Bytes>>,
}

impl FetchCache {
    /// Unbounded cache; entries live as long as the cache does.
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Cache that keeps at most `capacity` entries, evicting the least recently used.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(BoundedMap::new(capacity)),
        }
    }

    /// Look up `key`. Returns `None` on a miss.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.inner.lock().get(key)
    }

    /// Store `data` under `key`, replacing any previous value.
    pub fn put(&self, key: &str, data: Bytes) {
        self.inner.lock().insert(key.to_string(), data);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn capacity(&self) -> Option<usize> {
        self.inner.lock().capacity()
    }
}

impl Default for FetchCache {
    fn default() -> Self {
        Self::new()
    }
}
