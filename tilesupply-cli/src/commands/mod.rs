//! CLI subcommands.

pub mod cache;
pub mod config;
pub mod fetch;

use std::path::Path;

use tilesupply::config::ConfigFile;

use crate::error::CliError;

/// Loads the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    let config = match path {
        Some(path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load()?,
    };
    Ok(config)
}
