//! Persistent tile cache with free-space driven capacity scaling.
//!
//! One file per tile, named `"{x}x{y}"`, holding exactly
//! [`TILE_BYTE_SIZE`] raw RGB565 bytes. An in-memory [`LruIndex`] maps keys to
//! files; evicting an entry deletes its file.
//!
//! # Capacity scaling
//!
//! The cache never trusts a size fixed at construction. Every
//! [`RECHECK_INTERVAL`] puts, or whenever it is full, it measures the volume
//! and recomputes how many tiles it may hold:
//!
//! ```text
//! available = floor(free_bytes / TILE_BYTE_SIZE * 9 / 10)
//!
//! available > 0   allowed = min(max_tiles, len + available)
//!                 countdown = RECHECK_INTERVAL
//!
//! available == 0  allowed = len
//!                 evict the LRU entry, allowed -= 1 (floored at 0)
//!                 skip this write, re-measure on the next put
//! ```
//!
//! The cache therefore grows when the volume frees up and shrinks one tile
//! per write attempt when it fills, never above `max_tiles` and never below
//! zero.
//!
//! # Locking
//!
//! The index lock is never held across file I/O. Reads copy the path out,
//! read without the lock, and only re-lock to self-heal. Writes land in a
//! dot-prefixed temporary file that is renamed into place before the index is
//! updated. Evicted files are deleted after the lock is released. Entries
//! carry a generation number so a failed read only evicts the entry it read.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::error::CacheError;
use super::free_space::{available_tiles, FreeSpaceProbe, StatvfsProbe};
use super::lru_index::LruIndex;
use crate::coord::TileKey;
use crate::tile::{TileImage, TILE_BYTE_SIZE};

/// Puts between two free-space measurements.
pub const RECHECK_INTERVAL: usize = 20;

/// Default maximum number of tiles kept on disk.
pub const DEFAULT_DISK_TILES: usize = 2000;

/// Suffix of in-progress writes.
const TEMP_SUFFIX: &str = ".tmp";

/// Name of the file used to verify the directory is writable.
const ACCESS_PROBE_NAME: &str = ".tilesupply-access";

/// Point-in-time view of disk cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub dropped_writes: u64,
    pub evictions: u64,
    pub corrupt_entries: u64,
    pub entries: usize,
    pub allowed_capacity: usize,
    pub max_capacity: usize,
}

impl fmt::Display for DiskCacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "disk: {}/{} tiles (max {}), {} hits, {} misses, {} writes ({} dropped), {} evictions, {} corrupt",
            self.entries,
            self.allowed_capacity,
            self.max_capacity,
            self.hits,
            self.misses,
            self.writes,
            self.dropped_writes,
            self.evictions,
            self.corrupt_entries
        )
    }
}

/// Result of clearing a cache directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearResult {
    pub files_deleted: usize,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone)]
struct DiskEntry {
    path: PathBuf,
    generation: u64,
}

struct DiskState {
    index: LruIndex<TileKey, DiskEntry>,
    /// Current allowed entry count, always `<= max_tiles`.
    allowed: usize,
    /// Puts left before the next forced measurement; zero means expired.
    countdown: usize,
    next_generation: u64,
}

impl DiskState {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

/// What a put decided after applying the capacity policy.
struct PutPlan {
    skip: bool,
    evicted: Vec<PathBuf>,
}

/// Disk-resident LRU tile cache.
pub struct DiskTileCache {
    directory: PathBuf,
    max_tiles: usize,
    probe: Arc<dyn FreeSpaceProbe>,
    state: Mutex<DiskState>,
    temp_sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    dropped_writes: AtomicU64,
    evictions: AtomicU64,
    corrupt_entries: AtomicU64,
}

impl DiskTileCache {
    /// Opens a cache in `directory` holding at most `max_tiles` tiles.
    ///
    /// The directory is created if missing. The index starts empty; call
    /// [`restore`](Self::restore) to pick up files from a previous run.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created, is a file, or is not
    /// read/write accessible.
    pub fn new(directory: impl Into<PathBuf>, max_tiles: usize) -> Result<Self, CacheError> {
        Self::with_probe(directory, max_tiles, Arc::new(StatvfsProbe))
    }

    /// Opens a cache that measures free space through `probe`.
    pub fn with_probe(
        directory: impl Into<PathBuf>,
        max_tiles: usize,
        probe: Arc<dyn FreeSpaceProbe>,
    ) -> Result<Self, CacheError> {
        let directory = directory.into();
        prepare_directory(&directory)?;

        debug!(
            directory = %directory.display(),
            max_tiles,
            "Disk tile cache opened"
        );

        Ok(Self {
            directory,
            max_tiles,
            probe,
            state: Mutex::new(DiskState {
                index: LruIndex::new(),
                allowed: max_tiles,
                countdown: 0,
                next_generation: 0,
            }),
            temp_sequence: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            dropped_writes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            corrupt_entries: AtomicU64::new(0),
        })
    }

    /// Reads a cached tile.
    ///
    /// Missing files, short or oversized files, and I/O errors are all misses,
    /// and the stale entry is dropped from the index.
    pub fn get(&self, key: &TileKey) -> Option<TileImage> {
        let entry = self.state.lock().index.get(key).cloned();
        let Some(entry) = entry else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        match read_tile(&entry.path) {
            Ok(image) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(image)
            }
            Err(e) => {
                debug!(x = key.x, y = key.y, error = %e, "Corrupt disk cache entry");
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.heal(key, entry.generation);
                None
            }
        }
    }

    /// Writes a tile to disk.
    ///
    /// Best effort: any I/O failure drops the write. The write is also skipped
    /// when the capacity policy has just shrunk the cache or the allowed
    /// capacity is zero.
    pub fn put(&self, key: TileKey, image: &TileImage) {
        let measurement_due = {
            let mut state = self.state.lock();
            let expired = state.countdown == 0;
            state.countdown = state.countdown.saturating_sub(1);
            expired || state.index.len() >= state.allowed
        };

        let free_bytes = if measurement_due {
            Some(self.probe.available_bytes(&self.directory))
        } else {
            None
        };

        let plan = {
            let mut state = self.state.lock();
            self.apply_capacity_policy(&mut state, free_bytes)
        };
        remove_files(&plan.evicted);

        if plan.skip {
            trace!(x = key.x, y = key.y, "Disk cache write skipped");
            self.dropped_writes.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let path = self.directory.join(key.file_name());
        if let Err(e) = self.write_atomically(&path, image) {
            debug!(x = key.x, y = key.y, error = %e, "Disk cache write dropped");
            self.dropped_writes.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.writes.fetch_add(1, Ordering::Relaxed);

        let evicted = {
            let mut state = self.state.lock();
            let generation = state.next_generation();
            state.index.insert(
                key,
                DiskEntry {
                    path: path.clone(),
                    generation,
                },
            );
            self.evict_over_allowed(&mut state)
        };
        remove_files(&evicted);
    }

    /// Rebuilds the index from the files in the cache directory.
    ///
    /// Files whose names do not decode to a key are ignored; leftover
    /// temporary files from interrupted writes are deleted. Older files are
    /// treated as less recently used. Returns the number of indexed tiles.
    pub fn restore(&self) -> usize {
        let mut found: Vec<(TileKey, PathBuf, std::time::SystemTime)> = Vec::new();
        let mut stale_temps = Vec::new();

        match fs::read_dir(&self.directory) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };

                    if is_temp_name(name) {
                        stale_temps.push(path);
                        continue;
                    }

                    let Ok(key) = TileKey::from_file_name(name) else {
                        trace!(file = name, "Ignoring non-tile file in cache directory");
                        continue;
                    };

                    let modified = entry
                        .metadata()
                        .and_then(|m| m.modified())
                        .unwrap_or(std::time::UNIX_EPOCH);
                    found.push((key, path, modified));
                }
            }
            Err(e) => {
                warn!(directory = %self.directory.display(), error = %e, "Failed to list cache directory");
            }
        }

        remove_files(&stale_temps);
        found.sort_by_key(|(_, _, modified)| *modified);

        let (restored, evicted) = {
            let mut state = self.state.lock();
            state.index = LruIndex::with_capacity(found.len());
            for (key, path, _) in found {
                let generation = state.next_generation();
                state.index.insert(key, DiskEntry { path, generation });
            }
            state.countdown = 0;
            let evicted = self.evict_over_allowed(&mut state);
            (state.index.len(), evicted)
        };
        remove_files(&evicted);

        info!(
            directory = %self.directory.display(),
            tiles = restored,
            evicted = evicted.len(),
            "Disk tile cache restored"
        );
        restored
    }

    /// Deletes every indexed tile file and empties the index.
    pub fn clear(&self) -> ClearResult {
        let drained = self.state.lock().index.drain();
        let mut result = ClearResult::default();
        for (_, entry) in drained {
            let size = fs::metadata(&entry.path).map(|m| m.len()).unwrap_or(0);
            if fs::remove_file(&entry.path).is_ok() {
                result.files_deleted += 1;
                result.bytes_freed += size;
            }
        }
        result
    }

    /// True when `key` is indexed. Does not touch the file or recency.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.state.lock().index.contains(key)
    }

    /// Number of indexed tiles.
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    /// True when no tiles are indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indexed keys from least to most recently used.
    pub fn keys(&self) -> Vec<TileKey> {
        self.state.lock().index.keys()
    }

    /// Current allowed capacity as last derived from free space.
    pub fn allowed_capacity(&self) -> usize {
        self.state.lock().allowed
    }

    /// Configured upper bound on capacity.
    pub fn max_capacity(&self) -> usize {
        self.max_tiles
    }

    /// Cache directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns a snapshot of the cache counters.
    pub fn stats(&self) -> DiskCacheStats {
        let (entries, allowed_capacity) = {
            let state = self.state.lock();
            (state.index.len(), state.allowed)
        };
        DiskCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            dropped_writes: self.dropped_writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            corrupt_entries: self.corrupt_entries.load(Ordering::Relaxed),
            entries,
            allowed_capacity,
            max_capacity: self.max_tiles,
        }
    }

    /// Applies a free-space measurement (if one was taken) and decides
    /// whether the pending write may proceed.
    fn apply_capacity_policy(
        &self,
        state: &mut DiskState,
        free_bytes: Option<io::Result<u64>>,
    ) -> PutPlan {
        let mut plan = PutPlan {
            skip: false,
            evicted: Vec::new(),
        };

        match free_bytes {
            None => {}
            Some(Err(e)) => {
                warn!(directory = %self.directory.display(), error = %e, "Failed to measure free space");
                state.countdown = 0;
            }
            Some(Ok(bytes)) => {
                let available = available_tiles(bytes, TILE_BYTE_SIZE);
                let len = state.index.len();

                if available > 0 {
                    let allowed = self.max_tiles.min(len.saturating_add(available));
                    if allowed != state.allowed {
                        debug!(
                            from = state.allowed,
                            to = allowed,
                            available,
                            "Disk cache capacity rescaled"
                        );
                    }
                    state.allowed = allowed;
                    state.countdown = RECHECK_INTERVAL;
                } else {
                    state.allowed = self.max_tiles.min(len);
                    if let Some((key, entry)) = state.index.pop_lru() {
                        trace!(x = key.x, y = key.y, "Disk cache shrink eviction");
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                        plan.evicted.push(entry.path);
                    }
                    state.allowed = state.allowed.saturating_sub(1);
                    state.countdown = 0;
                    plan.skip = true;
                    info!(
                        allowed = state.allowed,
                        entries = state.index.len(),
                        "Volume full, disk cache shrinking"
                    );
                }
            }
        }

        if state.allowed == 0 {
            plan.skip = true;
        }
        plan
    }

    /// Pops LRU entries until the index fits the allowed capacity.
    fn evict_over_allowed(&self, state: &mut DiskState) -> Vec<PathBuf> {
        let mut evicted = Vec::new();
        while state.index.len() > state.allowed {
            match state.index.pop_lru() {
                Some((key, entry)) => {
                    trace!(x = key.x, y = key.y, "Disk cache eviction");
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    evicted.push(entry.path);
                }
                None => break,
            }
        }
        evicted
    }

    /// Drops an entry after a failed read, unless it was replaced meanwhile.
    fn heal(&self, key: &TileKey, generation: u64) {
        let removed = {
            let mut state = self.state.lock();
            match state.index.peek(key) {
                Some(current) if current.generation == generation => state.index.remove(key),
                _ => None,
            }
        };

        if let Some(entry) = removed {
            self.corrupt_entries.fetch_add(1, Ordering::Relaxed);
            remove_files(&[entry.path]);
        }
    }

    fn write_atomically(&self, path: &Path, image: &TileImage) -> io::Result<()> {
        let sequence = self.temp_sequence.fetch_add(1, Ordering::Relaxed);
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("tile");
        let temp = self
            .directory
            .join(format!(".{}.{}{}", file_name, sequence, TEMP_SUFFIX));

        let result = (|| {
            let mut file = fs::File::create(&temp)?;
            file.write_all(image.as_bytes())?;
            file.flush()?;
            drop(file);
            fs::rename(&temp, path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        result
    }
}

impl fmt::Debug for DiskTileCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskTileCache")
            .field("directory", &self.directory)
            .field("max_tiles", &self.max_tiles)
            .finish()
    }
}

/// Creates the directory if needed and checks it is readable and writable.
fn prepare_directory(directory: &Path) -> Result<(), CacheError> {
    match fs::metadata(directory) {
        Ok(meta) if !meta.is_dir() => {
            return Err(CacheError::NotADirectory(directory.to_path_buf()));
        }
        Ok(_) => {}
        Err(_) => {
            fs::create_dir_all(directory).map_err(|source| CacheError::CreateDir {
                path: directory.to_path_buf(),
                source,
            })?;
        }
    }

    let not_accessible = |source| CacheError::NotAccessible {
        path: directory.to_path_buf(),
        source,
    };

    fs::read_dir(directory).map_err(not_accessible)?;

    let probe = directory.join(ACCESS_PROBE_NAME);
    fs::write(&probe, []).map_err(not_accessible)?;
    let _ = fs::remove_file(&probe);

    Ok(())
}

/// Reads a tile file, insisting on the exact encoded size.
/// Reads exactly one tile's worth of bytes. Files of any other length are
/// rejected before their contents are touched.
fn read_tile(path: &Path) -> io::Result<TileImage> {
    let mut file = fs::File::open(path)?;
    let len = file.metadata()?.len();
    if len != TILE_BYTE_SIZE as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("tile file is {} bytes, expected {}", len, TILE_BYTE_SIZE),
        ));
    }

    let mut bytes = vec![0u8; TILE_BYTE_SIZE];
    file.read_exact(&mut bytes)?;
    TileImage::from_bytes(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

/// Deletes files, ignoring ones that are already gone.
fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(path = %path.display(), error = %e, "Failed to delete evicted tile");
            }
        }
    }
}

/// Counts tile files and their total size in a cache directory.
///
/// Only files whose names decode to a tile key are counted.
pub fn disk_cache_stats(directory: &Path) -> io::Result<(usize, u64)> {
    let mut files = 0;
    let mut bytes = 0;
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let is_tile = entry
            .file_name()
            .to_str()
            .is_some_and(|name| TileKey::from_file_name(name).is_ok());
        if is_tile {
            files += 1;
            bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    Ok((files, bytes))
}

/// Deletes every tile file in a cache directory without opening a cache.
pub fn clear_disk_cache(directory: &Path) -> io::Result<ClearResult> {
    let mut result = ClearResult::default();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if TileKey::from_file_name(&name).is_err() && !is_temp_name(&name) {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        fs::remove_file(entry.path())?;
        result.files_deleted += 1;
        result.bytes_freed += size;
    }
    Ok(result)
}
