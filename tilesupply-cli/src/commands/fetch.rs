//! `fetch` command: warm the cache for a rectangle of tiles.
//!
//! Builds a pipeline with the configured HTTP source, feeds it the rectangle
//! in batches no larger than the fetch queue, and waits until every request
//! settled (delivered, failed or dropped), the timeout passed, or the user
//! pressed Ctrl+C.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tilesupply::coord::TileKey;
use tilesupply::pipeline::{SupplyConfig, SupplyStats, TileSupplyPipeline};
use tilesupply::provider::{ReqwestClient, UrlTemplateSource};
use tilesupply::tile::TileImage;
use tracing::info;

use super::load_config;
use crate::error::CliError;

/// Largest rectangle accepted in one run.
const MAX_TILES: usize = 100_000;

/// How often the wait loop checks progress.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Arguments for `tilesupply fetch`.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// First column of the rectangle
    #[arg(long, allow_negative_numbers = true)]
    pub x0: i32,

    /// First row of the rectangle
    #[arg(long, allow_negative_numbers = true)]
    pub y0: i32,

    /// Last column of the rectangle (inclusive)
    #[arg(long, allow_negative_numbers = true)]
    pub x1: i32,

    /// Last row of the rectangle (inclusive)
    #[arg(long, allow_negative_numbers = true)]
    pub y1: i32,

    /// Fetch worker threads (overrides pool.workers)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Tiles kept in memory (overrides cache.memory_tiles)
    #[arg(long)]
    pub memory_tiles: Option<usize>,

    /// Upper bound on tiles kept on disk (overrides cache.disk_tiles)
    #[arg(long)]
    pub disk_tiles: Option<usize>,

    /// Cache directory (overrides cache.directory)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Tile URL template with {x} and {y} (overrides fetch.url_template)
    #[arg(long)]
    pub url_template: Option<String>,

    /// Give up after this many seconds
    #[arg(long, default_value = "300")]
    pub timeout: u64,
}

/// Run the fetch command.
pub fn run(args: FetchArgs, config_path: Option<&Path>) -> Result<(), CliError> {
    let config = load_config(config_path)?;

    let count = tile_count(args.x0, args.y0, args.x1, args.y1);
    if count > MAX_TILES as u64 {
        return Err(CliError::Config(format!(
            "rectangle has {} tiles, at most {} are allowed per run",
            count, MAX_TILES
        )));
    }
    let keys = rectangle(args.x0, args.y0, args.x1, args.y1);

    let mut supply = SupplyConfig::from_config_file(&config);
    if let Some(workers) = args.workers {
        supply = supply.with_workers(workers);
    }
    if let Some(tiles) = args.memory_tiles {
        supply = supply.with_memory_tiles(tiles);
    }
    if let Some(tiles) = args.disk_tiles {
        supply = supply.with_disk_tiles(tiles);
    }
    if let Some(dir) = args.cache_dir {
        supply.cache_dir = dir;
    }

    let template = args.url_template.unwrap_or(config.fetch.url_template);
    let http_client = ReqwestClient::with_timeouts(
        Duration::from_millis(config.fetch.connect_timeout_ms),
        Duration::from_millis(config.fetch.io_timeout_ms),
    )
    .map_err(CliError::HttpClient)?;
    let source = UrlTemplateSource::new(http_client, template);

    println!(
        "Fetching {} tiles ({},{})..({},{})",
        keys.len(),
        args.x0,
        args.y0,
        args.x1,
        args.y1
    );
    println!("Cache: {}", supply.cache_dir.display());
    println!("Press Ctrl+C to stop");
    println!();

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::SeqCst);
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let bar = progress_bar(keys.len());
    let sink_bar = bar.clone();
    let sink = move |key: TileKey, _tile: &TileImage| {
        sink_bar.inc(1);
        sink_bar.set_message(key.to_string());
    };

    let pipeline = TileSupplyPipeline::new(&supply, Arc::new(source), Arc::new(sink))?;
    pipeline.resume();

    let deadline = Instant::now() + Duration::from_secs(args.timeout);
    let outcome = feed(&pipeline, &keys, supply.queue_depth, deadline, &interrupted);

    if outcome == Wait::Interrupted {
        pipeline.clear_request_queue();
        pipeline.cancel_in_flight();
    }
    bar.finish_and_clear();

    let stats = pipeline.stats();
    pipeline.destroy();
    print_summary(&stats, keys.len());

    let missing = keys.len().saturating_sub(stats.delivered as usize);
    match outcome {
        Wait::Interrupted => Err(CliError::Interrupted),
        _ if missing > 0 => Err(CliError::Incomplete {
            missing,
            total: keys.len(),
        }),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    Settled,
    TimedOut,
    Interrupted,
}

/// Requests `keys` batch by batch and waits for each batch to settle.
fn feed(
    pipeline: &TileSupplyPipeline,
    keys: &[TileKey],
    batch_size: usize,
    deadline: Instant,
    interrupted: &AtomicBool,
) -> Wait {
    for batch in keys.chunks(batch_size.max(1)) {
        let baseline = settled(&pipeline.stats());

        // Pushed in reverse so the batch is served in rectangle order.
        for key in batch.iter().rev() {
            pipeline.request(*key);
        }
        pipeline.drain_now();

        loop {
            if interrupted.load(Ordering::SeqCst) {
                return Wait::Interrupted;
            }
            if settled(&pipeline.stats()) - baseline >= batch.len() as u64 {
                break;
            }
            if Instant::now() >= deadline {
                info!(pending = pipeline.pending(), "Fetch timed out");
                return Wait::TimedOut;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
    Wait::Settled
}

/// Requests that reached a final outcome.
fn settled(stats: &SupplyStats) -> u64 {
    stats.delivered
        + stats.fetches_failed
        + stats.fetches_canceled
        + stats.dropped
        + stats.pool.cleared
}

/// Number of tiles in the inclusive rectangle.
fn tile_count(x0: i32, y0: i32, x1: i32, y1: i32) -> u64 {
    let width = (i64::from(x1) - i64::from(x0)).unsigned_abs() + 1;
    let height = (i64::from(y1) - i64::from(y0)).unsigned_abs() + 1;
    width.saturating_mul(height)
}

/// All keys in the inclusive rectangle, row by row.
fn rectangle(x0: i32, y0: i32, x1: i32, y1: i32) -> Vec<TileKey> {
    let (x_min, x_max) = (x0.min(x1), x0.max(x1));
    let (y_min, y_max) = (y0.min(y1), y0.max(y1));

    (y_min..=y_max)
        .flat_map(|y| (x_min..=x_max).map(move |x| TileKey::new(x, y)))
        .collect()
}

fn progress_bar(total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn print_summary(stats: &SupplyStats, total: usize) {
    println!("Supplied {} of {} tiles", stats.delivered.min(total as u64), total);
    println!();
    println!("{}", stats);
}
