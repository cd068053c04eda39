//! Configuration management CLI commands.
//!
//! Provides `config get`, `config set`, `config list`, and `config path` commands
//! for viewing and modifying configuration settings from the command line.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use tilesupply::config::{config_file_path, ConfigKey};

use super::load_config;
use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Get a configuration value
    Get {
        /// Configuration key in format section.key (e.g., cache.disk_tiles)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key in format section.key (e.g., cache.disk_tiles)
        key: String,

        /// Value to set
        value: String,
    },

    /// List all configuration settings
    List,

    /// Show the configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, config_path: Option<&Path>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Get { key } => run_get(&key, config_path),
        ConfigCommands::Set { key, value } => run_set(&key, &value, config_path),
        ConfigCommands::List => run_list(config_path),
        ConfigCommands::Path => run_path(config_path),
    }
}

fn parse_key(key: &str) -> Result<ConfigKey, CliError> {
    key.parse().map_err(|_| {
        CliError::Config(format!(
            "Unknown configuration key '{}'. Use 'tilesupply config list' to see available keys.",
            key
        ))
    })
}

/// Get a configuration value.
fn run_get(key: &str, config_path: Option<&Path>) -> Result<(), CliError> {
    let config_key = parse_key(key)?;
    let config = load_config(config_path)?;
    println!("{}", config_key.get(&config));
    Ok(())
}

/// Set a configuration value.
fn run_set(key: &str, value: &str, config_path: Option<&Path>) -> Result<(), CliError> {
    let config_key = parse_key(key)?;

    let mut config = load_config(config_path)?;
    config_key
        .set(&mut config, value)
        .map_err(|e| CliError::Config(e.to_string()))?;
    config.save_to(&resolve_path(config_path))?;

    println!("Set {} = {}", config_key.name(), config_key.get(&config));
    Ok(())
}

/// List all configuration settings.
fn run_list(config_path: Option<&Path>) -> Result<(), CliError> {
    let config = load_config(config_path)?;

    println!("Configuration Settings");
    println!("======================");
    println!();

    let mut current_section = "";

    for key in ConfigKey::all() {
        let section = key.section();

        if section != current_section {
            if !current_section.is_empty() {
                println!();
            }
            println!("[{}]", section);
            current_section = section;
        }

        println!("  {} = {}", key.key_name(), key.get(&config));
    }

    Ok(())
}

/// Show the configuration file path.
fn run_path(config_path: Option<&Path>) -> Result<(), CliError> {
    println!("{}", resolve_path(config_path).display());
    Ok(())
}

fn resolve_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config_file_path)
}
