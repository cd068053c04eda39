//! Tile source trait and its error type.

use std::fmt;
use std::sync::Arc;

use crate::coord::TileKey;
use crate::tile::TileImage;

/// Errors a tile source can report.
///
/// Every variant is a transient failure from the pipeline's point of view:
/// the tile is simply not delivered and may be requested again later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The request failed or the server answered with a non-success status
    Http(String),
    /// Connecting or reading took longer than the configured timeout
    Timeout(String),
    /// The response body is not a decodable image
    Decode(String),
    /// The decoded image has the wrong dimensions
    InvalidSize { width: u32, height: u32 },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Http(msg) => write!(f, "HTTP error: {}", msg),
            SourceError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            SourceError::Decode(msg) => write!(f, "Failed to decode tile: {}", msg),
            SourceError::InvalidSize { width, height } => {
                write!(f, "Tile has unexpected size {}x{}", width, height)
            }
        }
    }
}

impl std::error::Error for SourceError {}

/// Fetches one tile by key.
///
/// Implementations block the calling pool thread for the duration of the
/// fetch and must bound that time themselves.
pub trait TileSource: Send + Sync {
    /// Fetches the tile for `key`.
    ///
    /// # Arguments
    ///
    /// * `key` - Grid coordinate of the tile
    ///
    /// # Returns
    ///
    /// The decoded tile, or an error that the pipeline treats as a miss.
    fn fetch(&self, key: TileKey) -> Result<TileImage, SourceError>;

    /// Returns the source's name for logging.
    fn name(&self) -> &str;
}

impl<T: TileSource + ?Sized> TileSource for Arc<T> {
    fn fetch(&self, key: TileKey) -> Result<TileImage, SourceError> {
        (**self).fetch(key)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: TileSource + ?Sized> TileSource for Box<T> {
    fn fetch(&self, key: TileKey) -> Result<TileImage, SourceError> {
        (**self).fetch(key)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Solid(u16);

    impl TileSource for Solid {
        fn fetch(&self, _key: TileKey) -> Result<TileImage, SourceError> {
            Ok(TileImage::filled(self.0))
        }

        fn name(&self) -> &str {
            "solid"
        }
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            SourceError::InvalidSize {
                width: 512,
                height: 256
            }
            .to_string(),
            "Tile has unexpected size 512x256"
        );
        assert_eq!(
            SourceError::Http("HTTP 404".to_string()).to_string(),
            "HTTP error: HTTP 404"
        );
    }

    #[test]
    fn test_arc_and_box_forward() {
        let shared: Arc<dyn TileSource> = Arc::new(Solid(3));
        assert_eq!(shared.name(), "solid");
        assert_eq!(
            shared.fetch(TileKey::new(0, 0)).unwrap(),
            TileImage::filled(3)
        );

        let boxed: Box<dyn TileSource> = Box::new(Solid(4));
        assert_eq!(boxed.fetch(TileKey::new(1, 1)).unwrap(), TileImage::filled(4));
    }
}
