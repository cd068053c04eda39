//! Tile grid coordinates.
//!
//! A [`TileKey`] is the `(x, y)` identity of one tile in the grid. Keys are
//! plain values: cheap to copy, hashable, and immutable once built.
//!
//! The disk cache names each tile file after its key using the reversible
//! `"{x}x{y}"` encoding. [`TileKey::file_name`] and [`TileKey::from_file_name`]
//! are exact inverses; any name that does not re-encode to itself is rejected.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Separator between the x and y components of a tile file name.
const FILE_NAME_SEPARATOR: char = 'x';

/// Grid coordinate identifying a single tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    /// Column (increases eastward)
    pub x: i32,
    /// Row (increases southward)
    pub y: i32,
}

/// Error parsing a tile key from its file name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    /// Name does not have the `{x}x{y}` shape
    #[error("tile file name '{0}' does not match the {{x}}x{{y}} pattern")]
    InvalidPattern(String),

    /// A component is not a canonical decimal integer
    #[error("invalid tile coordinate '{0}'")]
    InvalidCoordinate(String),
}

impl TileKey {
    /// Creates a key for the given grid position.
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Returns the cache file name for this key.
    pub fn file_name(&self) -> String {
        format!("{}{}{}", self.x, FILE_NAME_SEPARATOR, self.y)
    }

    /// Recovers a key from a cache file name.
    ///
    /// Only names produced by [`file_name`](Self::file_name) are accepted.
    /// Leading zeros, explicit `+` signs, extra separators and trailing text
    /// are all rejected so that two different files can never map to the
    /// same key.
    ///
    /// # Examples
    ///
    /// ```
    /// use tilesupply::coord::TileKey;
    ///
    /// assert_eq!(TileKey::from_file_name("3x4"), Ok(TileKey::new(3, 4)));
    /// assert!(TileKey::from_file_name("bogus").is_err());
    /// ```
    pub fn from_file_name(name: &str) -> Result<Self, KeyParseError> {
        let (x_str, y_str) = name
            .split_once(FILE_NAME_SEPARATOR)
            .ok_or_else(|| KeyParseError::InvalidPattern(name.to_string()))?;

        let x = parse_component(x_str)?;
        let y = parse_component(y_str)?;

        Ok(Self { x, y })
    }
}

/// Parses one coordinate, insisting on the canonical decimal form.
fn parse_component(s: &str) -> Result<i32, KeyParseError> {
    let value: i32 = s
        .parse()
        .map_err(|_| KeyParseError::InvalidCoordinate(s.to_string()))?;

    // "+3" and "03" parse fine but would alias "3"
    if value.to_string() != s {
        return Err(KeyParseError::InvalidCoordinate(s.to_string()));
    }

    Ok(value)
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl FromStr for TileKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_file_name(s)
    }
}

impl From<(i32, i32)> for TileKey {
    fn from((x, y): (i32, i32)) -> Self {
        Self::new(x, y)
    }
}
