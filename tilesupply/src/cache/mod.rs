//! Two-tier tile cache.
//!
//! ```text
//! request ──► MemoryTileCache ──miss──► DiskTileCache ──miss──► fetch
//!                  ▲                         │
//!                  └────── promote on hit ◄──┘
//! ```
//!
//! [`MemoryTileCache`] holds a fixed number of decoded tiles behind one lock.
//! [`DiskTileCache`] persists raw pixel buffers, one file per tile, and
//! re-derives its allowed size from the free space left on its volume.
//! Both evict least-recently-used entries and never surface I/O errors to
//! callers after construction.

mod disk;
mod error;
mod free_space;
mod lru_index;
mod memory;

pub use disk::{
    clear_disk_cache, disk_cache_stats, ClearResult, DiskCacheStats, DiskTileCache,
    DEFAULT_DISK_TILES, RECHECK_INTERVAL,
};
pub use error::CacheError;
pub use free_space::{available_tiles, FixedFreeSpace, FreeSpaceProbe, StatvfsProbe};
pub use lru_index::LruIndex;
pub use memory::{MemoryCacheStats, MemoryTileCache, DEFAULT_MEMORY_TILES};
