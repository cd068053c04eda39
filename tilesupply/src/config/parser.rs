//! INI parsing: `Ini` → `ConfigFile`.
//!
//! The single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::Ini;

use super::file::{ConfigError, ConfigFile};

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigError> {
    let mut config = ConfigFile::default();

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.cache.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("memory_tiles") {
            config.cache.memory_tiles = parse_number("cache", "memory_tiles", v)?;
        }
        if let Some(v) = section.get("disk_tiles") {
            config.cache.disk_tiles = parse_number("cache", "disk_tiles", v)?;
        }
    }

    // [fetch] section
    if let Some(section) = ini.section(Some("fetch")) {
        if let Some(v) = section.get("url_template") {
            let v = v.trim();
            if let Err(reason) = validate_url_template(v) {
                return Err(invalid("fetch", "url_template", v, reason));
            }
            config.fetch.url_template = v.to_string();
        }
        if let Some(v) = section.get("connect_timeout_ms") {
            config.fetch.connect_timeout_ms = parse_positive("fetch", "connect_timeout_ms", v)?;
        }
        if let Some(v) = section.get("io_timeout_ms") {
            config.fetch.io_timeout_ms = parse_positive("fetch", "io_timeout_ms", v)?;
        }
    }

    // [pool] section
    if let Some(section) = ini.section(Some("pool")) {
        if let Some(v) = section.get("workers") {
            config.pool.workers = parse_workers(v)
                .map_err(|reason| invalid("pool", "workers", v, reason.to_string()))?;
        }
        if let Some(v) = section.get("queue_depth") {
            config.pool.queue_depth = parse_positive("pool", "queue_depth", v)? as usize;
        }
    }

    Ok(config)
}

/// Parse a worker count, where `auto` (or empty) means `None`.
pub(super) fn parse_workers(value: &str) -> Result<Option<usize>, &'static str> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err("must be 'auto' or a positive integer"),
    }
}

/// A URL template must be http(s) and carry both placeholders.
pub(super) fn validate_url_template(value: &str) -> Result<(), String> {
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err("must be a URL starting with 'http://' or 'https://'".to_string());
    }
    if !value.contains("{x}") || !value.contains("{y}") {
        return Err("must contain both '{x}' and '{y}'".to_string());
    }
    Ok(())
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn parse_number<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "must be a non-negative integer".to_string()))
}

fn parse_positive(section: &str, key: &str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid(section, key, value, "must be a positive integer".to_string())),
    }
}

fn invalid(section: &str, key: &str, value: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason,
    }
}
