//! TileSupply CLI - Command-line interface
//!
//! Warms and inspects the tile cache used by the TileSupply library.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tilesupply::logging::{default_log_dir, default_log_file, init_logging};

use commands::cache::CacheAction;
use commands::config::ConfigCommands;
use commands::fetch::FetchArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "tilesupply")]
#[command(version, about = "Fetch, cache and serve map tiles addressed by grid coordinates", long_about = None)]
struct Cli {
    /// Use this config file instead of the default one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a rectangle of tiles into the cache
    Fetch(FetchArgs),

    /// Inspect or clear the disk cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// View or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Fetch(args) => {
            let _logging = init_logging(&default_log_dir(), default_log_file())
                .map_err(CliError::LoggingInit)?;
            commands::fetch::run(args, config_path)
        }
        Commands::Cache { action } => commands::cache::run(action, config_path),
        Commands::Config { command } => commands::config::run(command, config_path),
    }
}
