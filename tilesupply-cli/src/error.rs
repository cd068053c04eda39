//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use tilesupply::config::ConfigError;
use tilesupply::pipeline::SupplyError;
use tilesupply::provider::SourceError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(std::io::Error),
    /// Configuration error
    Config(String),
    /// Failed to read or write the config file
    ConfigFile(ConfigError),
    /// Failed to build the HTTP client
    HttpClient(SourceError),
    /// Failed to start the tile pipeline
    Pipeline(SupplyError),
    /// Some requested tiles were not delivered
    Incomplete { missing: usize, total: usize },
    /// Interrupted by the user
    Interrupted,
    /// Failed to clear the disk cache
    CacheClear(std::io::Error),
    /// Failed to read disk cache statistics
    CacheStats(std::io::Error),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Pipeline(SupplyError::DiskCache(_)) => {
                eprintln!();
                eprintln!("Check that the cache directory is writable, or choose another with:");
                eprintln!("  tilesupply config set cache.directory <path>");
            }
            CliError::Incomplete { .. } => {
                eprintln!();
                eprintln!("Missing tiles can be fetched again; cached tiles are not downloaded twice.");
                eprintln!("Run with RUST_LOG=debug to see individual fetch failures.");
            }
            _ => {}
        }

        let code = match self {
            CliError::Interrupted => 130,
            _ => 1,
        };
        process::exit(code)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::HttpClient(e) => write!(f, "Failed to create HTTP client: {}", e),
            CliError::Pipeline(e) => write!(f, "{}", e),
            CliError::Incomplete { missing, total } => {
                write!(f, "{} of {} tiles could not be supplied", missing, total)
            }
            CliError::Interrupted => write!(f, "Interrupted"),
            CliError::CacheClear(e) => write!(f, "Failed to clear disk cache: {}", e),
            CliError::CacheStats(e) => write!(f, "Failed to read disk cache: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(e) => Some(e),
            CliError::ConfigFile(e) => Some(e),
            CliError::HttpClient(e) => Some(e),
            CliError::Pipeline(e) => Some(e),
            CliError::CacheClear(e) => Some(e),
            CliError::CacheStats(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<SupplyError> for CliError {
    fn from(e: SupplyError) -> Self {
        CliError::Pipeline(e)
    }
}
