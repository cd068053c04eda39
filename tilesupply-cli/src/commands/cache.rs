//! Cache management CLI commands.

use std::path::Path;

use clap::Subcommand;
use tilesupply::cache::{
    available_tiles, clear_disk_cache, disk_cache_stats, FreeSpaceProbe, StatvfsProbe,
};
use tilesupply::config::format_size;
use tilesupply::tile::TILE_BYTE_SIZE;

use super::load_config;
use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Clear the disk cache, removing all cached tiles
    Clear,
    /// Show disk cache statistics
    Stats,
}

/// Run a cache subcommand.
pub fn run(action: CacheAction, config_path: Option<&Path>) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let cache_dir = &config.cache.directory;

    match action {
        CacheAction::Clear => {
            println!("Clearing disk cache at: {}", cache_dir.display());

            let result = clear_disk_cache(cache_dir).map_err(CliError::CacheClear)?;
            println!(
                "Deleted {} files, freed {}",
                result.files_deleted,
                format_size(result.bytes_freed)
            );
            Ok(())
        }
        CacheAction::Stats => {
            println!("Disk cache: {}", cache_dir.display());

            let (files, bytes) = disk_cache_stats(cache_dir).map_err(CliError::CacheStats)?;
            println!("  Tiles: {} (limit {})", files, config.cache.disk_tiles);
            println!("  Size:  {}", format_size(bytes));

            match StatvfsProbe.available_bytes(cache_dir) {
                Ok(free) => println!(
                    "  Free:  {} (room for {} more tiles)",
                    format_size(free),
                    available_tiles(free, TILE_BYTE_SIZE)
                ),
                Err(e) => println!("  Free:  unknown ({})", e),
            }
            Ok(())
        }
    }
}
