//! Set of tile keys currently being fetched.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::coord::TileKey;

/// Tracks which keys have a running job.
///
/// At most one caller can hold a key at a time; everyone else is told the key
/// is taken and must treat its job as a duplicate.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    running: Mutex<HashSet<TileKey>>,
}

impl InFlightRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` as running. Returns false if it already was.
    pub fn try_acquire(&self, key: TileKey) -> bool {
        self.running.lock().insert(key)
    }

    /// Removes `key`. Returns false if it was not registered.
    pub fn release(&self, key: &TileKey) -> bool {
        self.running.lock().remove(key)
    }

    /// True when a job for `key` is running.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.running.lock().contains(key)
    }

    /// Number of running keys.
    pub fn len(&self) -> usize {
        self.running.lock().len()
    }

    /// True when nothing is running.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_acquire_is_exclusive() {
        let registry = InFlightRegistry::new();
        let key = TileKey::new(5, 5);

        assert!(registry.try_acquire(key));
        assert!(!registry.try_acquire(key));
        assert!(registry.contains(&key));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_release_allows_reacquire() {
        let registry = InFlightRegistry::new();
        let key = TileKey::new(1, 1);

        registry.try_acquire(key);
        assert!(registry.release(&key));
        assert!(!registry.release(&key));
        assert!(registry.is_empty());
        assert!(registry.try_acquire(key));
    }

    #[test]
    fn test_concurrent_acquire_has_one_winner() {
        let registry = Arc::new(InFlightRegistry::new());
        let key = TileKey::new(9, 9);
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let winners: usize = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.try_acquire(key)
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();

        assert_eq!(winners, 1);
    }
}
