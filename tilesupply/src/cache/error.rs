//! Disk cache construction errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that prevent a disk cache from being created.
///
/// Once constructed, the disk cache never returns errors: read failures are
/// misses and write failures are dropped writes.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache directory could not be created.
    #[error("failed to create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cache path exists but is a file.
    #[error("cache path {0} is not a directory")]
    NotADirectory(PathBuf),

    /// The cache directory cannot be listed or written.
    #[error("cache directory {path} is not read/write accessible: {source}")]
    NotAccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
