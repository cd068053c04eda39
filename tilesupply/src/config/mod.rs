//! User configuration.
//!
//! Settings live in an INI file under the platform config directory:
//!
//! ```ini
//! [cache]
//! directory = ~/.cache/tilesupply/tiles
//! memory_tiles = 64
//! disk_tiles = 2000
//!
//! [fetch]
//! url_template = https://tile.openstreetmap.org/10/{x}/{y}.png
//! connect_timeout_ms = 1000
//! io_timeout_ms = 5000
//!
//! [pool]
//! workers = auto
//! queue_depth = 64
//! ```
//!
//! A missing file means defaults. [`SupplyConfig::from_config_file`] turns a
//! [`ConfigFile`] into the pipeline's runtime settings.
//!
//! [`SupplyConfig::from_config_file`]: crate::pipeline::SupplyConfig::from_config_file

mod file;
mod keys;
mod parser;
mod size;
mod writer;

pub use file::{
    config_directory, config_file_path, default_cache_dir, CacheSettings, ConfigError,
    ConfigFile, FetchSettings, PoolSettings,
};
pub use keys::{ConfigKey, ConfigKeyError};
pub use size::format_size;
