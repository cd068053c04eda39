//! Tile supply pipeline.
//!
//! Ties the caches, the fetch worker pool and a [`TileSource`] together
//! behind [`TileSupplyPipeline`]. Callers push tile requests, the pipeline
//! answers them from memory, disk or the network and hands finished tiles
//! to a [`TileSink`].
//!
//! [`TileSource`]: crate::provider::TileSource

mod config;
mod error;
mod queue;
mod sink;
mod supply;

pub use config::{SupplyConfig, DEFAULT_JOIN_TIMEOUT};
pub use error::SupplyError;
pub use queue::RequestStack;
pub use sink::{CollectingSink, TileSink};
pub use supply::{SupplyState, SupplyStats, TileSupplyPipeline};
