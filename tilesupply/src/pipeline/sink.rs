//! Delivery target for supplied tiles.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::coord::TileKey;
use crate::tile::TileImage;

/// Receives tiles as they become available.
///
/// Cache hits are delivered on the orchestrator thread and fresh fetches on
/// worker pool threads, never on the caller's thread. Several calls may run
/// at once, so implementations must be thread-safe and should return quickly.
pub trait TileSink: Send + Sync {
    /// Hands over a tile. The image is only borrowed for the call.
    fn deliver(&self, key: TileKey, image: &TileImage);
}

impl<F> TileSink for F
where
    F: Fn(TileKey, &TileImage) + Send + Sync,
{
    fn deliver(&self, key: TileKey, image: &TileImage) {
        self(key, image)
    }
}

/// Sink that records delivered keys and lets callers wait for them.
#[derive(Debug, Default)]
pub struct CollectingSink {
    delivered: Mutex<Vec<TileKey>>,
    changed: Condvar,
}

impl CollectingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys in delivery order.
    pub fn delivered(&self) -> Vec<TileKey> {
        self.delivered.lock().clone()
    }

    /// Number of deliveries so far.
    pub fn count(&self) -> usize {
        self.delivered.lock().len()
    }

    /// Number of deliveries of `key`.
    pub fn count_of(&self, key: &TileKey) -> usize {
        self.delivered.lock().iter().filter(|k| *k == key).count()
    }

    /// Blocks until at least `count` deliveries happened or `timeout` passes.
    ///
    /// Returns true if the count was reached.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut delivered = self.delivered.lock();
        while delivered.len() < count {
            if self.changed.wait_until(&mut delivered, deadline).timed_out() {
                return delivered.len() >= count;
            }
        }
        true
    }
}

impl TileSink for CollectingSink {
    fn deliver(&self, key: TileKey, _image: &TileImage) {
        self.delivered.lock().push(key);
        self.changed.notify_all();
    }
}
