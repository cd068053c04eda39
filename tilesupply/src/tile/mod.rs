//! Fixed-size tile pixel buffers.
//!
//! Every tile is a 256×256 image stored as RGB565: 16 bits per pixel,
//! little-endian, row-major, no header. The byte size is therefore a
//! compile-time constant and caches can validate reads by length alone.

use std::fmt;

/// Width and height of a tile in pixels.
pub const TILE_SIZE_PX: usize = 256;

/// Bytes per pixel in the RGB565 encoding.
pub const BYTES_PER_PIXEL: usize = 2;

/// Size in bytes of one encoded tile.
pub const TILE_BYTE_SIZE: usize = TILE_SIZE_PX * TILE_SIZE_PX * BYTES_PER_PIXEL;

/// Error building a tile from a buffer of the wrong size.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("tile buffer must be {expected} bytes, got {actual}")]
pub struct InvalidTileSize {
    pub expected: usize,
    pub actual: usize,
}

/// A decoded tile in the fixed RGB565 encoding.
///
/// The buffer length is always exactly [`TILE_BYTE_SIZE`].
#[derive(Clone, PartialEq, Eq)]
pub struct TileImage {
    pixels: Box<[u8]>,
}

impl TileImage {
    /// Creates an all-black tile.
    pub fn blank() -> Self {
        Self {
            pixels: vec![0u8; TILE_BYTE_SIZE].into_boxed_slice(),
        }
    }

    /// Wraps an existing RGB565 buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, InvalidTileSize> {
        if bytes.len() != TILE_BYTE_SIZE {
            return Err(InvalidTileSize {
                expected: TILE_BYTE_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            pixels: bytes.into_boxed_slice(),
        })
    }

    /// Creates a tile where every pixel has the given RGB565 value.
    pub fn filled(value: u16) -> Self {
        let [lo, hi] = value.to_le_bytes();
        let mut pixels = vec![0u8; TILE_BYTE_SIZE];
        for px in pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
            px[0] = lo;
            px[1] = hi;
        }
        Self {
            pixels: pixels.into_boxed_slice(),
        }
    }

    /// Encodes 8-bit RGB pixels (3 bytes each, row-major) as RGB565.
    ///
    /// `rgb` must hold exactly `TILE_SIZE_PX * TILE_SIZE_PX * 3` bytes.
    pub fn from_rgb8(rgb: &[u8]) -> Result<Self, InvalidTileSize> {
        let expected = TILE_SIZE_PX * TILE_SIZE_PX * 3;
        if rgb.len() != expected {
            return Err(InvalidTileSize {
                expected,
                actual: rgb.len(),
            });
        }

        let mut pixels = vec![0u8; TILE_BYTE_SIZE];
        for (src, dst) in rgb
            .chunks_exact(3)
            .zip(pixels.chunks_exact_mut(BYTES_PER_PIXEL))
        {
            let value = rgb565(src[0], src[1], src[2]);
            dst.copy_from_slice(&value.to_le_bytes());
        }

        Ok(Self {
            pixels: pixels.into_boxed_slice(),
        })
    }

    /// Returns the raw RGB565 bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// Overwrites this tile's pixels with another tile's.
    ///
    /// Used to recycle pooled buffers without reallocating.
    pub fn copy_from(&mut self, other: &TileImage) {
        self.pixels.copy_from_slice(&other.pixels);
    }

    /// Returns the RGB565 value of the pixel at `(px, py)`.
    pub fn pixel(&self, px: usize, py: usize) -> Option<u16> {
        if px >= TILE_SIZE_PX || py >= TILE_SIZE_PX {
            return None;
        }
        let offset = (py * TILE_SIZE_PX + px) * BYTES_PER_PIXEL;
        Some(u16::from_le_bytes([
            self.pixels[offset],
            self.pixels[offset + 1],
        ]))
    }
}

/// Packs 8-bit channels into a 5-6-5 pixel.
#[inline]
fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3)
}

impl fmt::Debug for TileImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileImage")
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_byte_size() {
        assert_eq!(TILE_BYTE_SIZE, 131_072);
        assert_eq!(TileImage::blank().as_bytes().len(), TILE_BYTE_SIZE);
    }

    #[test]
    fn test_from_bytes_rejects_wrong_size() {
        let err = TileImage::from_bytes(vec![0u8; 10]).unwrap_err();
        assert_eq!(err.expected, TILE_BYTE_SIZE);
        assert_eq!(err.actual, 10);
    }

    #[test]
    fn test_filled_pixel_values() {
        let tile = TileImage::filled(0xF800);
        assert_eq!(tile.pixel(0, 0), Some(0xF800));
        assert_eq!(tile.pixel(255, 255), Some(0xF800));
        assert_eq!(tile.pixel(256, 0), None);
    }

    #[test]
    fn test_from_rgb8_packs_565() {
        let mut rgb = vec![0u8; TILE_SIZE_PX * TILE_SIZE_PX * 3];
        // first pixel pure red, second pure green, third pure blue
        rgb[0] = 255;
        rgb[4] = 255;
        rgb[8] = 255;

        let tile = TileImage::from_rgb8(&rgb).unwrap();
        assert_eq!(tile.pixel(0, 0), Some(0xF800));
        assert_eq!(tile.pixel(1, 0), Some(0x07E0));
        assert_eq!(tile.pixel(2, 0), Some(0x001F));
        assert_eq!(tile.pixel(3, 0), Some(0));
    }

    #[test]
    fn test_from_rgb8_rejects_wrong_size() {
        assert!(TileImage::from_rgb8(&[0u8; 3]).is_err());
    }

    #[test]
    fn test_copy_from() {
        let mut dst = TileImage::blank();
        let src = TileImage::filled(0x1234);
        dst.copy_from(&src);
        assert_eq!(dst, src);
    }
}
