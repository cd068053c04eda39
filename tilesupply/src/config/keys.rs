//! Configuration key access and validation.
//!
//! Type-safe get/set of configuration values by dotted key name
//! (`cache.disk_tiles`), used by the `config` CLI commands.

use std::str::FromStr;

use thiserror::Error;

use super::file::ConfigFile;
use super::parser::{expand_tilde, parse_workers, validate_url_template};
use super::writer::path_to_string;

/// Errors that can occur when getting or setting configuration values.
#[derive(Debug, Error)]
pub enum ConfigKeyError {
    /// Unknown configuration key.
    #[error("Unknown configuration key '{0}'")]
    UnknownKey(String),

    /// Validation failed for the value.
    #[error("Invalid value for {key}: {reason}")]
    ValidationFailed { key: String, reason: String },
}

/// Supported configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    CacheDirectory,
    CacheMemoryTiles,
    CacheDiskTiles,

    FetchUrlTemplate,
    FetchConnectTimeoutMs,
    FetchIoTimeoutMs,

    PoolWorkers,
    PoolQueueDepth,
}

impl FromStr for ConfigKey {
    type Err = ConfigKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigKey::all()
            .iter()
            .copied()
            .find(|key| key.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigKeyError::UnknownKey(s.to_string()))
    }
}

impl ConfigKey {
    /// Get the canonical key name (e.g., "cache.disk_tiles").
    pub fn name(&self) -> &'static str {
        match self {
            ConfigKey::CacheDirectory => "cache.directory",
            ConfigKey::CacheMemoryTiles => "cache.memory_tiles",
            ConfigKey::CacheDiskTiles => "cache.disk_tiles",
            ConfigKey::FetchUrlTemplate => "fetch.url_template",
            ConfigKey::FetchConnectTimeoutMs => "fetch.connect_timeout_ms",
            ConfigKey::FetchIoTimeoutMs => "fetch.io_timeout_ms",
            ConfigKey::PoolWorkers => "pool.workers",
            ConfigKey::PoolQueueDepth => "pool.queue_depth",
        }
    }

    /// Get the section name (e.g., "cache").
    pub fn section(&self) -> &'static str {
        self.name().split('.').next().unwrap_or("")
    }

    /// Get the key name within the section (e.g., "disk_tiles").
    pub fn key_name(&self) -> &'static str {
        self.name().split('.').nth(1).unwrap_or(self.name())
    }

    /// Get the value from a config file as a string.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            ConfigKey::CacheDirectory => path_to_string(&config.cache.directory),
            ConfigKey::CacheMemoryTiles => config.cache.memory_tiles.to_string(),
            ConfigKey::CacheDiskTiles => config.cache.disk_tiles.to_string(),
            ConfigKey::FetchUrlTemplate => config.fetch.url_template.clone(),
            ConfigKey::FetchConnectTimeoutMs => config.fetch.connect_timeout_ms.to_string(),
            ConfigKey::FetchIoTimeoutMs => config.fetch.io_timeout_ms.to_string(),
            ConfigKey::PoolWorkers => config
                .pool
                .workers
                .map(|n| n.to_string())
                .unwrap_or_else(|| "auto".to_string()),
            ConfigKey::PoolQueueDepth => config.pool.queue_depth.to_string(),
        }
    }

    /// Set the value in a config file.
    ///
    /// The value is validated and converted before anything is written, so a
    /// rejected value leaves `config` untouched.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigKeyError> {
        let value = value.trim();
        let fail = |reason: &str| ConfigKeyError::ValidationFailed {
            key: self.name().to_string(),
            reason: reason.to_string(),
        };

        match self {
            ConfigKey::CacheDirectory => {
                if value.is_empty() {
                    return Err(fail("must be a valid path"));
                }
                config.cache.directory = expand_tilde(value);
            }
            ConfigKey::CacheMemoryTiles => {
                config.cache.memory_tiles =
                    parse_count(value).ok_or_else(|| fail("must be a non-negative integer"))?;
            }
            ConfigKey::CacheDiskTiles => {
                config.cache.disk_tiles =
                    parse_count(value).ok_or_else(|| fail("must be a non-negative integer"))?;
            }
            ConfigKey::FetchUrlTemplate => {
                validate_url_template(value).map_err(|reason| fail(&reason))?;
                config.fetch.url_template = value.to_string();
            }
            ConfigKey::FetchConnectTimeoutMs => {
                config.fetch.connect_timeout_ms =
                    parse_positive(value).ok_or_else(|| fail("must be a positive integer"))?;
            }
            ConfigKey::FetchIoTimeoutMs => {
                config.fetch.io_timeout_ms =
                    parse_positive(value).ok_or_else(|| fail("must be a positive integer"))?;
            }
            ConfigKey::PoolWorkers => {
                config.pool.workers = parse_workers(value).map_err(fail)?;
            }
            ConfigKey::PoolQueueDepth => {
                config.pool.queue_depth = parse_positive(value)
                    .ok_or_else(|| fail("must be a positive integer"))?
                    as usize;
            }
        }
        Ok(())
    }

    /// Get all supported configuration keys.
    pub fn all() -> &'static [ConfigKey] {
        &[
            ConfigKey::CacheDirectory,
            ConfigKey::CacheMemoryTiles,
            ConfigKey::CacheDiskTiles,
            ConfigKey::FetchUrlTemplate,
            ConfigKey::FetchConnectTimeoutMs,
            ConfigKey::FetchIoTimeoutMs,
            ConfigKey::PoolWorkers,
            ConfigKey::PoolQueueDepth,
        ]
    }
}

fn parse_count(value: &str) -> Option<usize> {
    value.parse().ok()
}

fn parse_positive(value: &str) -> Option<u64> {
    value.parse().ok().filter(|n| *n > 0)
}
