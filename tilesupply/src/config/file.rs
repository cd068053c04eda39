//! Configuration file handling for `<config dir>/tilesupply/config.ini`.
//!
//! Parsing lives in [`super::parser`], serialization in [`super::writer`].

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use crate::cache::{DEFAULT_DISK_TILES, DEFAULT_MEMORY_TILES};
use crate::executor::DEFAULT_QUEUE_DEPTH;
use crate::provider::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT, DEFAULT_URL_TEMPLATE};

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    Read(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    Write(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    Directory(std::io::Error),
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Disk cache directory.
    pub directory: PathBuf,
    /// Tiles held in memory.
    pub memory_tiles: usize,
    /// Upper bound on tiles held on disk.
    pub disk_tiles: usize,
}

/// `[fetch]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    /// Tile URL with `{x}` and `{y}` placeholders.
    pub url_template: String,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
}

/// `[pool]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Fetch worker threads, `None` for `auto`.
    pub workers: Option<usize>,
    /// Fetch jobs allowed to wait for a worker.
    pub queue_depth: usize,
}

/// User configuration as stored in `config.ini`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub cache: CacheSettings,
    pub fetch: FetchSettings,
    pub pool: PoolSettings,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            cache: CacheSettings {
                directory: default_cache_dir(),
                memory_tiles: DEFAULT_MEMORY_TILES,
                disk_tiles: DEFAULT_DISK_TILES,
            },
            fetch: FetchSettings {
                url_template: DEFAULT_URL_TEMPLATE.to_string(),
                connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
                io_timeout_ms: DEFAULT_IO_TIMEOUT.as_millis() as u64,
            },
            pool: PoolSettings {
                workers: None,
                queue_depth: DEFAULT_QUEUE_DEPTH,
            },
        }
    }
}

impl ConfigFile {
    /// Load configuration from the default path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Directory)?;
        }

        let content = super::writer::to_config_string(self);
        std::fs::write(path, content).map_err(|e| ConfigError::Write(e.to_string()))
    }
}

/// Get the path to the config directory (`<config dir>/tilesupply`).
pub fn config_directory() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tilesupply")
}

/// Get the path to the config file.
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

/// Default disk cache directory (`<cache dir>/tilesupply/tiles`).
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tilesupply")
        .join("tiles")
}
