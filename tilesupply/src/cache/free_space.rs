//! Free-space measurement for the disk cache's capacity scaling.
//!
//! The disk cache asks a [`FreeSpaceProbe`] how many bytes are still available
//! to unprivileged users on the volume holding its directory. The production
//! probe calls `statvfs(3)`; tests substitute [`FixedFreeSpace`] to simulate a
//! volume filling up or draining.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Reports available bytes on the volume containing a path.
pub trait FreeSpaceProbe: Send + Sync {
    /// Returns the number of bytes available to the current user.
    fn available_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// Probe backed by `statvfs(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

#[cfg(unix)]
impl FreeSpaceProbe for StatvfsProbe {
    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        // SAFETY: statvfs is plain-old-data and fully written on success;
        // c_path is a valid NUL-terminated string for the duration of the call.
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        #[allow(clippy::unnecessary_cast)]
        let bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
        Ok(bytes)
    }
}

#[cfg(not(unix))]
impl FreeSpaceProbe for StatvfsProbe {
    fn available_bytes(&self, _path: &Path) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "free space measurement requires statvfs",
        ))
    }
}

/// Probe that reports a settable constant.
///
/// Useful for tests and for pinning a cache's budget regardless of the real
/// volume.
#[derive(Debug, Default)]
pub struct FixedFreeSpace {
    bytes: AtomicU64,
}

impl FixedFreeSpace {
    /// Creates a probe reporting `bytes` free.
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: AtomicU64::new(bytes),
        }
    }

    /// Changes the reported value.
    pub fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }
}

impl FreeSpaceProbe for FixedFreeSpace {
    fn available_bytes(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.bytes.load(Ordering::SeqCst))
    }
}

/// Converts free bytes into a tile budget, keeping 10% of the volume spare.
///
/// `floor(free_bytes / tile_bytes * 9 / 10)`
pub fn available_tiles(free_bytes: u64, tile_bytes: usize) -> usize {
    if tile_bytes == 0 {
        return 0;
    }
    let tiles = free_bytes / tile_bytes as u64 * 9 / 10;
    usize::try_from(tiles).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::TILE_BYTE_SIZE;

    #[test]
    fn test_available_tiles_reserves_headroom() {
        let ten_tiles = 10 * TILE_BYTE_SIZE as u64;
        assert_eq!(available_tiles(ten_tiles, TILE_BYTE_SIZE), 9);
        assert_eq!(available_tiles(ten_tiles + 100, TILE_BYTE_SIZE), 9);
    }

    #[test]
    fn test_available_tiles_rounds_down() {
        assert_eq!(available_tiles(TILE_BYTE_SIZE as u64, TILE_BYTE_SIZE), 0);
        assert_eq!(available_tiles(0, TILE_BYTE_SIZE), 0);
        assert_eq!(available_tiles(100, 0), 0);
    }

    #[test]
    fn test_fixed_probe() {
        let probe = FixedFreeSpace::new(42);
        assert_eq!(probe.available_bytes(Path::new("/")).unwrap(), 42);
        probe.set(7);
        assert_eq!(probe.available_bytes(Path::new("/")).unwrap(), 7);
    }

    #[cfg(unix)]
    #[test]
    fn test_statvfs_probe_reads_real_volume() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StatvfsProbe.available_bytes(dir.path()).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_statvfs_probe_missing_path() {
        let result = StatvfsProbe.available_bytes(Path::new("/definitely/not/here/tilesupply"));
        assert!(result.is_err());
    }
}
