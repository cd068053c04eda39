//! Tile source that fetches images from a URL template.
//!
//! The template contains `{x}` and `{y}` placeholders, for example
//! `https://tile.openstreetmap.org/10/{x}/{y}.png`. Responses are decoded
//! with the `image` crate, must be exactly 256×256 and are re-encoded as
//! RGB565.

use tracing::trace;

use super::http::HttpClient;
use super::types::{SourceError, TileSource};
use crate::coord::TileKey;
use crate::tile::{TileImage, TILE_SIZE_PX};

/// Default tile server template.
pub const DEFAULT_URL_TEMPLATE: &str = "https://tile.openstreetmap.org/10/{x}/{y}.png";

/// Fetches tiles over HTTP from a templated URL.
pub struct UrlTemplateSource<C: HttpClient> {
    http_client: C,
    template: String,
    name: String,
}

impl<C: HttpClient> UrlTemplateSource<C> {
    /// Creates a source for `template` using `http_client`.
    pub fn new(http_client: C, template: impl Into<String>) -> Self {
        let template = template.into();
        let name = host_of(&template).unwrap_or("url-template").to_string();
        Self {
            http_client,
            template,
            name,
        }
    }

    /// The URL template.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Builds the request URL for `key`.
    pub fn url_for(&self, key: TileKey) -> String {
        self.template
            .replace("{x}", &key.x.to_string())
            .replace("{y}", &key.y.to_string())
    }
}

impl<C: HttpClient> TileSource for UrlTemplateSource<C> {
    fn fetch(&self, key: TileKey) -> Result<TileImage, SourceError> {
        let url = self.url_for(key);
        trace!(x = key.x, y = key.y, url = %url, "Fetching tile");
        let body = self.http_client.get(&url)?;
        decode_tile(&body)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Decodes an encoded image into a tile.
pub fn decode_tile(bytes: &[u8]) -> Result<TileImage, SourceError> {
    let decoded = image::load_from_memory(bytes).map_err(|e| SourceError::Decode(e.to_string()))?;

    let (width, height) = (decoded.width(), decoded.height());
    if width as usize != TILE_SIZE_PX || height as usize != TILE_SIZE_PX {
        return Err(SourceError::InvalidSize { width, height });
    }

    let rgb = decoded.to_rgb8();
    TileImage::from_rgb8(rgb.as_raw()).map_err(|e| SourceError::Decode(e.to_string()))
}

fn host_of(template: &str) -> Option<&str> {
    let rest = template.split_once("://")?.1;
    rest.split('/').next().filter(|host| !host.is_empty())
}
