//! Runtime configuration for [`TileSupplyPipeline`](super::TileSupplyPipeline).

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{DEFAULT_DISK_TILES, DEFAULT_MEMORY_TILES};
use crate::config::ConfigFile;
use crate::executor::{default_workers, PoolConfig, DEFAULT_QUEUE_DEPTH};

/// Default bound on how long `destroy()` waits for each thread group.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything needed to build a pipeline, apart from its source and sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupplyConfig {
    /// Directory holding the disk cache.
    pub cache_dir: PathBuf,

    /// Tiles kept in memory.
    pub memory_tiles: usize,

    /// Upper bound on tiles kept on disk.
    pub disk_tiles: usize,

    /// Fetch worker threads.
    pub workers: usize,

    /// Fetch jobs that may wait for a worker.
    pub queue_depth: usize,

    /// How long teardown waits for threads before detaching them.
    pub join_timeout: Duration,
}

impl SupplyConfig {
    /// Creates a config with default sizes for `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            memory_tiles: DEFAULT_MEMORY_TILES,
            disk_tiles: DEFAULT_DISK_TILES,
            workers: default_workers(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    /// Builds the runtime config from the user's configuration file.
    ///
    /// A `workers = auto` setting resolves to [`default_workers`].
    pub fn from_config_file(config: &ConfigFile) -> Self {
        Self {
            cache_dir: config.cache.directory.clone(),
            memory_tiles: config.cache.memory_tiles,
            disk_tiles: config.cache.disk_tiles,
            workers: config.pool.workers.unwrap_or_else(default_workers),
            queue_depth: config.pool.queue_depth,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    /// Set the memory cache size in tiles.
    pub fn with_memory_tiles(mut self, tiles: usize) -> Self {
        self.memory_tiles = tiles;
        self
    }

    /// Set the disk cache limit in tiles.
    pub fn with_disk_tiles(mut self, tiles: usize) -> Self {
        self.disk_tiles = tiles;
        self
    }

    /// Set the number of fetch workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the fetch queue depth.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Set the teardown join timeout.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Worker pool settings derived from this config.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default()
            .with_workers(self.workers)
            .with_queue_depth(self.queue_depth)
    }
}
