//! Tile sources.
//!
//! The pipeline only depends on the [`TileSource`] trait. The bundled
//! implementation, [`UrlTemplateSource`], fetches PNG/JPEG tiles from a
//! templated URL through an [`HttpClient`]:
//!
//! ```ignore
//! use tilesupply::provider::{ReqwestClient, UrlTemplateSource, DEFAULT_URL_TEMPLATE};
//!
//! let http_client = ReqwestClient::new()?;
//! let source = UrlTemplateSource::new(http_client, DEFAULT_URL_TEMPLATE);
//! ```

mod http;
mod types;
mod url;

pub use http::{HttpClient, ReqwestClient, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT};
pub use types::{SourceError, TileSource};
pub use url::{decode_tile, UrlTemplateSource, DEFAULT_URL_TEMPLATE};

#[cfg(test)]
pub use http::tests::MockHttpClient;
