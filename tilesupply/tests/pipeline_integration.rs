//! Integration tests for the tile supply pipeline.
//!
//! These tests drive the public API end to end:
//! - request ordering through the LIFO stack
//! - pausing and clearing while a fetch is in flight
//! - pausing with fetch jobs still queued in the worker pool
//! - warm start from an existing cache directory
//! - duplicate fetch suppression in the worker pool
//! - randomized request bursts
//!
//! Run with: `cargo test --test pipeline_integration`

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rand::Rng;

use tilesupply::cache::{DiskTileCache, FixedFreeSpace, MemoryTileCache};
use tilesupply::coord::TileKey;
use tilesupply::executor::{DedupWorkerPool, FetchJob, PoolConfig};
use tilesupply::pipeline::{CollectingSink, SupplyConfig, SupplyState, TileSupplyPipeline};
use tilesupply::provider::{SourceError, TileSource};
use tilesupply::tile::TileImage;

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Helpers
// ============================================================================

/// Source whose fetches block until the gate is opened.
struct GatedSource {
    open: Mutex<bool>,
    opened: Condvar,
    started: AtomicUsize,
    fetched: Mutex<Vec<TileKey>>,
}

impl GatedSource {
    fn closed() -> Self {
        Self {
            open: Mutex::new(false),
            opened: Condvar::new(),
            started: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
        }
    }

    fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    fn fetched(&self) -> Vec<TileKey> {
        self.fetched.lock().clone()
    }
}

impl TileSource for GatedSource {
    fn fetch(&self, key: TileKey) -> Result<TileImage, SourceError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.fetched.lock().push(key);

        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
        Ok(TileImage::filled((key.x * 100 + key.y) as u16))
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// Source that answers immediately and counts calls.
#[derive(Default)]
struct InstantSource {
    calls: AtomicUsize,
}

impl TileSource for InstantSource {
    fn fetch(&self, key: TileKey) -> Result<TileImage, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TileImage::filled((key.x * 100 + key.y) as u16))
    }

    fn name(&self) -> &str {
        "instant"
    }
}

fn build_pipeline(
    dir: &std::path::Path,
    source: Arc<dyn TileSource>,
    sink: Arc<CollectingSink>,
) -> TileSupplyPipeline {
    let disk = DiskTileCache::with_probe(dir, 100, Arc::new(FixedFreeSpace::new(1 << 40)))
        .unwrap();
    TileSupplyPipeline::from_parts(
        Arc::new(MemoryTileCache::new(16)),
        Arc::new(disk),
        PoolConfig::default().with_workers(2).with_queue_depth(64),
        source,
        sink,
        WAIT,
    )
    .unwrap()
}

fn write_tile(dir: &std::path::Path, key: TileKey, fill: u16) {
    std::fs::write(dir.join(key.file_name()), TileImage::filled(fill).as_bytes()).unwrap();
}

fn wait_until(check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    check()
}

// ============================================================================
// Integration Tests
// ============================================================================

/// Requests (1,1), (2,2), (1,1) collapse to two entries served newest first.
#[test]
fn test_requests_served_last_push_first() {
    let dir = tempfile::tempdir().unwrap();
    write_tile(dir.path(), TileKey::new(1, 1), 11);
    write_tile(dir.path(), TileKey::new(2, 2), 22);

    let source = Arc::new(InstantSource::default());
    let sink = Arc::new(CollectingSink::new());
    let pipeline = build_pipeline(dir.path(), source.clone(), sink.clone());

    pipeline.request(TileKey::new(1, 1));
    pipeline.request(TileKey::new(2, 2));
    pipeline.request(TileKey::new(1, 1));
    assert_eq!(pipeline.pending(), 2);

    pipeline.resume();
    pipeline.drain_now();

    assert!(sink.wait_for(2, WAIT));
    assert_eq!(
        sink.delivered(),
        vec![TileKey::new(1, 1), TileKey::new(2, 2)]
    );
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.stats().disk_hits, 2);
}

/// Pausing and clearing does not stop a fetch that already started.
#[test]
fn test_pause_and_clear_let_running_fetch_finish() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(GatedSource::closed());
    let sink = Arc::new(CollectingSink::new());
    let pipeline = build_pipeline(dir.path(), source.clone(), sink.clone());
    let key = TileKey::new(5, 5);

    pipeline.resume();
    pipeline.request(key);
    pipeline.drain_now();
    assert!(wait_until(|| source.started.load(Ordering::SeqCst) == 1));

    pipeline.pause();
    pipeline.request(TileKey::new(6, 6));
    pipeline.request(TileKey::new(7, 7));
    assert_eq!(pipeline.clear_request_queue(), 2);
    assert_eq!(pipeline.pending(), 0);

    source.open();

    assert!(sink.wait_for(1, WAIT));
    assert_eq!(sink.delivered(), vec![key]);
    assert!(wait_until(|| pipeline.in_flight() == 0));
    assert!(pipeline.memory_cache().contains(&key));
    assert!(pipeline.disk_cache().contains(&key));
    assert!(dir.path().join("5x5").exists());
    assert_eq!(source.fetched(), vec![key]);
    assert_eq!(pipeline.state(), SupplyState::Idle);
}

/// Fetch jobs waiting for a worker do not start while paused.
#[test]
fn test_pause_holds_queued_fetches() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(GatedSource::closed());
    let sink = Arc::new(CollectingSink::new());
    let disk = DiskTileCache::with_probe(dir.path(), 100, Arc::new(FixedFreeSpace::new(1 << 40)))
        .unwrap();
    let pipeline = TileSupplyPipeline::from_parts(
        Arc::new(MemoryTileCache::new(16)),
        Arc::new(disk),
        PoolConfig::default().with_workers(1).with_queue_depth(8),
        source.clone(),
        sink.clone(),
        WAIT,
    )
    .unwrap();

    pipeline.request(TileKey::new(1, 1));
    pipeline.request(TileKey::new(2, 2));
    pipeline.resume();
    pipeline.drain_now();

    // (2,2) runs on the only worker, (1,1) waits in the pool queue
    assert!(wait_until(|| source.started.load(Ordering::SeqCst) == 1
        && pipeline.stats().fetches_submitted == 2));

    pipeline.pause();
    source.open();

    assert!(sink.wait_for(1, WAIT));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(source.started.load(Ordering::SeqCst), 1);
    assert_eq!(source.fetched(), vec![TileKey::new(2, 2)]);
    assert_eq!(sink.delivered(), vec![TileKey::new(2, 2)]);
    assert_eq!(pipeline.stats().pool.queued, 1);

    pipeline.resume();
    assert!(sink.wait_for(2, WAIT));
    assert_eq!(
        source.fetched(),
        vec![TileKey::new(2, 2), TileKey::new(1, 1)]
    );
}

/// A running fetch whose result is canceled writes and delivers nothing.
#[test]
fn test_cancel_in_flight_discards_result() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(GatedSource::closed());
    let sink = Arc::new(CollectingSink::new());
    let pipeline = build_pipeline(dir.path(), source.clone(), sink.clone());
    let key = TileKey::new(8, 8);

    pipeline.resume();
    pipeline.request(key);
    pipeline.drain_now();
    assert!(wait_until(|| source.started.load(Ordering::SeqCst) == 1));

    assert_eq!(pipeline.cancel_in_flight(), 1);
    source.open();

    assert!(wait_until(|| pipeline.stats().fetches_canceled == 1));
    assert!(!sink.wait_for(1, Duration::from_millis(50)));
    assert!(!pipeline.disk_cache().contains(&key));
    assert!(!pipeline.memory_cache().contains(&key));
}

/// Warm start indexes only well-formed tile files.
#[test]
fn test_warm_start_restores_valid_tiles_only() {
    let dir = tempfile::tempdir().unwrap();
    write_tile(dir.path(), TileKey::new(3, 4), 34);
    std::fs::write(dir.path().join("bogus"), b"not a tile").unwrap();

    let source = Arc::new(InstantSource::default());
    let sink = Arc::new(CollectingSink::new());
    let config = SupplyConfig::new(dir.path())
        .with_memory_tiles(4)
        .with_disk_tiles(10)
        .with_workers(1)
        .with_join_timeout(WAIT);
    let pipeline = TileSupplyPipeline::new(&config, source.clone(), sink.clone()).unwrap();

    assert!(wait_until(|| pipeline.disk_cache().len() == 1));
    assert_eq!(pipeline.disk_cache().keys(), vec![TileKey::new(3, 4)]);
    assert!(dir.path().join("bogus").exists());

    pipeline.resume();
    pipeline.request(TileKey::new(3, 4));
    pipeline.drain_now();

    assert!(sink.wait_for(1, WAIT));
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

/// Two jobs for the same key: one runs, the other is canceled at start.
#[test]
fn test_duplicate_jobs_run_once() {
    let pool = DedupWorkerPool::new(PoolConfig::default().with_workers(2)).unwrap();
    let release = Arc::new(AtomicBool::new(false));
    let writes = Arc::new(AtomicUsize::new(0));
    let key = TileKey::new(9, 9);

    for _ in 0..2 {
        let release = Arc::clone(&release);
        let writes = Arc::clone(&writes);
        pool.submit(FetchJob::new(key, move |_ctx| {
            while !release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            writes.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    }

    assert!(wait_until(|| pool.stats().canceled == 1));
    release.store(true, Ordering::SeqCst);
    assert!(wait_until(|| pool.stats().completed == 1));

    assert_eq!(writes.load(Ordering::SeqCst), 1);
    assert!(!pool.is_in_flight(&key));
    assert!(pool.shutdown(WAIT));
}

/// Random bursts over a small grid eventually deliver every requested tile.
#[test]
fn test_random_bursts_deliver_every_tile() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(InstantSource::default());
    let sink = Arc::new(CollectingSink::new());
    let pipeline = build_pipeline(dir.path(), source.clone(), sink.clone());
    let mut rng = rand::rng();
    let mut requested = HashSet::new();

    pipeline.resume();
    for _ in 0..10 {
        for _ in 0..8 {
            let key = TileKey::new(rng.random_range(0..5), rng.random_range(0..5));
            requested.insert(key);
            pipeline.request(key);
        }
        pipeline.drain_now();
        thread::sleep(Duration::from_millis(1));
    }

    assert!(wait_until(|| {
        let delivered: HashSet<TileKey> = sink.delivered().into_iter().collect();
        requested.is_subset(&delivered)
    }));
    assert!(wait_until(|| pipeline.in_flight() == 0));

    for key in &requested {
        assert!(pipeline.disk_cache().contains(key), "missing {key} on disk");
    }
    let stats = pipeline.stats();
    assert!(stats.fetches_succeeded as usize >= requested.len());
    assert_eq!(stats.dropped, 0);
}

/// Nothing is delivered after destroy, even from a fetch that was running.
#[test]
fn test_destroy_with_fetch_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(GatedSource::closed());
    let sink = Arc::new(CollectingSink::new());
    let pipeline = build_pipeline(dir.path(), source.clone(), sink.clone());

    pipeline.resume();
    pipeline.request(TileKey::new(1, 2));
    pipeline.drain_now();
    assert!(wait_until(|| source.started.load(Ordering::SeqCst) == 1));

    let opener = {
        let source = Arc::clone(&source);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            source.open();
        })
    };

    pipeline.destroy();
    opener.join().unwrap();

    assert_eq!(pipeline.state(), SupplyState::Destroyed);
    assert!(!sink.wait_for(1, Duration::from_millis(50)));
    assert!(!dir.path().join("1x2").exists());
}
