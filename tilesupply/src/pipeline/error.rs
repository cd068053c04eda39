//! Pipeline construction errors.

use std::fmt;

use crate::cache::CacheError;
use crate::executor::PoolError;

/// Errors that prevent a [`TileSupplyPipeline`](super::TileSupplyPipeline)
/// from starting.
///
/// Nothing after construction is fatal: fetch and cache failures are misses.
#[derive(Debug)]
pub enum SupplyError {
    /// The disk cache directory is unusable.
    DiskCache(CacheError),

    /// The fetch worker pool could not be started.
    Pool(PoolError),

    /// The orchestrator thread could not be started.
    Thread(std::io::Error),
}

impl fmt::Display for SupplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupplyError::DiskCache(e) => write!(f, "Failed to open disk cache: {}", e),
            SupplyError::Pool(e) => write!(f, "Failed to start fetch workers: {}", e),
            SupplyError::Thread(e) => {
                write!(f, "Failed to start orchestrator thread: {}", e)
            }
        }
    }
}

impl std::error::Error for SupplyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupplyError::DiskCache(e) => Some(e),
            SupplyError::Pool(e) => Some(e),
            SupplyError::Thread(e) => Some(e),
        }
    }
}

impl From<CacheError> for SupplyError {
    fn from(e: CacheError) -> Self {
        SupplyError::DiskCache(e)
    }
}

impl From<PoolError> for SupplyError {
    fn from(e: PoolError) -> Self {
        SupplyError::Pool(e)
    }
}
