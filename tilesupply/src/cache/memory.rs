//! In-memory tile cache with a fixed entry count and LRU eviction.
//!
//! The cache stores private copies of decoded tiles. Callers keep ownership of
//! whatever they pass to [`MemoryTileCache::put`]; the cache copies the pixels
//! into a buffer taken from its own pool, and evicted buffers go back to the
//! pool instead of being freed. After warm-up, steady-state scrolling performs
//! no tile-sized allocations on insert.
//!
//! All operations take one `parking_lot::Mutex` and never touch I/O, so the
//! critical section is a hash lookup plus at most one 128 KiB copy.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::lru_index::LruIndex;
use crate::coord::TileKey;
use crate::tile::TileImage;

/// Default number of tiles held in memory.
pub const DEFAULT_MEMORY_TILES: usize = 64;

/// Point-in-time view of memory cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl fmt::Display for MemoryCacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory: {}/{} tiles, {} hits, {} misses, {} evictions",
            self.entries, self.capacity, self.hits, self.misses, self.evictions
        )
    }
}

struct MemoryState {
    index: LruIndex<TileKey, TileImage>,
    /// Recycled tile buffers, at most `capacity + 1`.
    pool: Vec<TileImage>,
}

/// Fixed-capacity in-memory tile cache.
///
/// Once [`destroy`](Self::destroy) has been called the cache is inert: puts
/// are ignored and gets always miss.
pub struct MemoryTileCache {
    capacity: usize,
    state: Mutex<Option<MemoryState>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryTileCache {
    /// Creates a cache holding at most `capacity` tiles.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(Some(MemoryState {
                index: LruIndex::with_capacity(capacity),
                pool: Vec::new(),
            })),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Stores a copy of `image` under `key`.
    ///
    /// An existing entry is never overwritten; inserting a key that is already
    /// cached only refreshes its recency.
    pub fn put(&self, key: TileKey, image: &TileImage) {
        if self.capacity == 0 {
            return;
        }

        let mut guard = self.state.lock();
        let Some(state) = guard.as_mut() else {
            return;
        };

        if state.index.get(&key).is_some() {
            return;
        }

        let buffer = match state.pool.pop() {
            Some(mut buffer) => {
                buffer.copy_from(image);
                buffer
            }
            None => image.clone(),
        };
        state.index.insert(key, buffer);

        while state.index.len() > self.capacity {
            match state.index.pop_lru() {
                Some((evicted, buffer)) => {
                    trace!(x = evicted.x, y = evicted.y, "Memory cache eviction");
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    if state.pool.len() <= self.capacity {
                        state.pool.push(buffer);
                    }
                }
                None => break,
            }
        }
    }

    /// Returns a copy of the cached tile, refreshing its recency.
    pub fn get(&self, key: &TileKey) -> Option<TileImage> {
        let mut guard = self.state.lock();
        let found = guard
            .as_mut()
            .and_then(|state| state.index.get(key).cloned());

        match found {
            Some(image) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(image)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// True when `key` is cached. Does not affect recency or counters.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.state
            .lock()
            .as_ref()
            .is_some_and(|state| state.index.contains(key))
    }

    /// Current number of cached tiles.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .as_ref()
            .map_or(0, |state| state.index.len())
    }

    /// True when no tiles are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of cached tiles.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cached keys from least to most recently used.
    pub fn keys(&self) -> Vec<TileKey> {
        self.state
            .lock()
            .as_ref()
            .map_or_else(Vec::new, |state| state.index.keys())
    }

    /// Releases every held tile and makes the cache permanently inert.
    pub fn destroy(&self) {
        let released = self.state.lock().take();
        if let Some(state) = released {
            debug!(
                entries = state.index.len(),
                pooled = state.pool.len(),
                "Memory cache destroyed"
            );
        }
    }

    /// True after [`destroy`](Self::destroy).
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().is_none()
    }

    /// Returns a snapshot of the cache counters.
    pub fn stats(&self) -> MemoryCacheStats {
        MemoryCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
            capacity: self.capacity,
        }
    }
}

impl fmt::Debug for MemoryTileCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTileCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn key(x: i32) -> TileKey {
        TileKey::new(x, 0)
    }

    #[test]
    fn test_put_and_get() {
        let cache = MemoryTileCache::new(4);
        let image = TileImage::filled(0xABCD);

        cache.put(key(1), &image);

        assert_eq!(cache.get(&key(1)), Some(image));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_miss() {
        let cache = MemoryTileCache::new(4);
        assert_eq!(cache.get(&key(1)), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_duplicate_put_keeps_first_value() {
        let cache = MemoryTileCache::new(4);
        let first = TileImage::filled(1);
        let second = TileImage::filled(2);

        cache.put(key(1), &first);
        cache.put(key(1), &second);

        assert_eq!(cache.get(&key(1)), Some(first));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stores_private_copy() {
        let cache = MemoryTileCache::new(4);
        let mut image = TileImage::filled(7);
        cache.put(key(1), &image);

        image.copy_from(&TileImage::filled(9));

        assert_eq!(cache.get(&key(1)), Some(TileImage::filled(7)));
    }

    #[test]
    fn test_evicts_least_recently_inserted() {
        let cache = MemoryTileCache::new(2);
        let image = TileImage::blank();

        cache.put(key(1), &image);
        cache.put(key(2), &image);
        cache.put(key(3), &image);

        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_protects_from_eviction() {
        let cache = MemoryTileCache::new(2);
        let image = TileImage::blank();

        cache.put(key(1), &image);
        cache.put(key(2), &image);
        cache.get(&key(1));
        cache.put(key(3), &image);

        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
    }

    #[test]
    fn test_evicted_buffers_are_recycled() {
        let cache = MemoryTileCache::new(1);
        cache.put(key(1), &TileImage::filled(1));
        cache.put(key(2), &TileImage::filled(2));
        cache.put(key(3), &TileImage::filled(3));

        assert_eq!(cache.get(&key(3)), Some(TileImage::filled(3)));
        let guard = cache.state.lock();
        let pool = guard.as_ref().map(|s| s.pool.len()).unwrap();
        assert!(pool <= 2);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let cache = MemoryTileCache::new(0);
        cache.put(key(1), &TileImage::blank());
        assert!(cache.is_empty());
        assert_eq!(cache.get(&key(1)), None);
    }

    #[test]
    fn test_destroy_makes_cache_inert() {
        let cache = MemoryTileCache::new(4);
        cache.put(key(1), &TileImage::blank());

        cache.destroy();

        assert!(cache.is_destroyed());
        assert_eq!(cache.get(&key(1)), None);
        cache.put(key(2), &TileImage::blank());
        assert_eq!(cache.len(), 0);
        assert!(!cache.contains(&key(2)));

        // second destroy is harmless
        cache.destroy();
    }

    #[test]
    fn test_stats_display() {
        let cache = MemoryTileCache::new(3);
        cache.put(key(1), &TileImage::blank());
        cache.get(&key(1));
        let display = cache.stats().to_string();
        assert!(display.contains("1/3 tiles"));
        assert!(display.contains("1 hits"));
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(MemoryTileCache::new(16));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let k = TileKey::new(t, i);
                        cache.put(k, &TileImage::filled(i as u16));
                        let _ = cache.get(&k);
                        assert!(cache.len() <= 16);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 16);
    }

    proptest! {
        /// Size never exceeds capacity and the evicted key is always the
        /// least recently inserted or accessed one.
        #[test]
        fn prop_capacity_and_lru_order(
            capacity in 1usize..6,
            ops in prop::collection::vec((any::<bool>(), 0i32..10), 0..100)
        ) {
            let cache = MemoryTileCache::new(capacity);
            let image = TileImage::blank();
            let mut model: Vec<i32> = Vec::new();

            for (is_put, k) in ops {
                if is_put {
                    if model.contains(&k) {
                        model.retain(|m| *m != k);
                    }
                    model.push(k);
                    if model.len() > capacity {
                        model.remove(0);
                    }
                    cache.put(key(k), &image);
                } else {
                    let hit = cache.get(&key(k)).is_some();
                    prop_assert_eq!(hit, model.contains(&k));
                    if hit {
                        model.retain(|m| *m != k);
                        model.push(k);
                    }
                }

                prop_assert!(cache.len() <= capacity);
                let keys: Vec<i32> = cache.keys().iter().map(|k| k.x).collect();
                prop_assert_eq!(keys, model.clone());
            }
        }
    }
}
