//! TileSupply - cache-first, deduplicating tile supply for map viewers
//!
//! This library feeds fixed-size raster tiles to a viewer as fast as it can:
//! tiles come from an in-memory LRU cache, then from a persistent disk cache
//! that adapts its size to the free space left on its volume, and finally
//! from the network through a small worker pool that never fetches the same
//! tile twice at once.
//!
//! ```ignore
//! use std::sync::Arc;
//! use tilesupply::config::ConfigFile;
//! use tilesupply::coord::TileKey;
//! use tilesupply::pipeline::{SupplyConfig, TileSupplyPipeline};
//! use tilesupply::provider::{ReqwestClient, UrlTemplateSource, DEFAULT_URL_TEMPLATE};
//!
//! let config = SupplyConfig::from_config_file(&ConfigFile::load()?);
//! let source = UrlTemplateSource::new(ReqwestClient::new()?, DEFAULT_URL_TEMPLATE);
//! let pipeline = TileSupplyPipeline::new(
//!     &config,
//!     Arc::new(source),
//!     Arc::new(|key: TileKey, _tile: &_| println!("tile {key} ready")),
//! )?;
//!
//! pipeline.resume();
//! pipeline.request(TileKey::new(550, 335));
//! pipeline.drain_now();
//! ```

pub mod cache;
pub mod config;
pub mod coord;
pub mod executor;
pub mod logging;
pub mod pipeline;
pub mod provider;
pub mod tile;
