//! Tile supply orchestrator.
//!
//! One dedicated thread drains a LIFO request stack and decides, per key,
//! where the tile comes from:
//!
//! ```text
//!  request(key) ──► RequestStack ──pop newest──► orchestrator thread
//!                                                    │
//!                    ┌───────────────────────────────┤
//!                    ▼                               ▼
//!           MemoryTileCache hit ──► sink     DiskTileCache hit ──► memory, sink
//!                                                    │ miss
//!                                                    ▼
//!                                     DedupWorkerPool.submit(fetch job)
//!                                                    │ on a pool thread
//!                                                    ▼
//!                                source.fetch ─ok─► disk, memory, sink
//! ```
//!
//! # States
//!
//! The orchestrator is `Idle` while paused or while the stack is empty and
//! `Running` while it drains. [`request`](TileSupplyPipeline::request) only
//! queues; [`drain_now`](TileSupplyPipeline::drain_now) or
//! [`resume`](TileSupplyPipeline::resume) wakes the thread. A new pipeline
//! starts paused and restores its disk cache index before serving the first
//! request.
//!
//! Pausing also holds fetch jobs waiting in the worker pool, so nothing new
//! reaches the source until the pipeline resumes.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use super::config::SupplyConfig;
use super::error::SupplyError;
use super::queue::RequestStack;
use super::sink::TileSink;
use crate::cache::{DiskCacheStats, DiskTileCache, MemoryCacheStats, MemoryTileCache};
use crate::coord::TileKey;
use crate::executor::{DedupWorkerPool, FetchJob, JobContext, PoolConfig, PoolError, PoolStats};
use crate::provider::TileSource;
use crate::tile::TileImage;

// =============================================================================
// State and statistics
// =============================================================================

/// Orchestrator state as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplyState {
    /// Paused, or nothing to do; the orchestrator thread is blocked.
    Idle,
    /// Draining the request stack.
    Running,
    /// Torn down; all calls are ignored.
    Destroyed,
}

impl fmt::Display for SupplyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupplyState::Idle => write!(f, "idle"),
            SupplyState::Running => write!(f, "running"),
            SupplyState::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Point-in-time view of pipeline activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupplyStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub fetches_submitted: u64,
    pub fetches_succeeded: u64,
    pub fetches_failed: u64,
    /// Duplicates canceled by the pool plus fetches canceled after returning.
    pub fetches_canceled: u64,
    /// Submissions that found the fetch queue full.
    pub rejected: u64,
    /// Requests dropped because the queue stayed full after clearing it.
    pub dropped: u64,
    pub delivered: u64,
    pub memory: MemoryCacheStats,
    pub disk: DiskCacheStats,
    pub pool: PoolStats,
}

impl fmt::Display for SupplyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "supply: {} delivered, {} memory hits, {} disk hits",
            self.delivered, self.memory_hits, self.disk_hits
        )?;
        writeln!(
            f,
            "fetch: {} submitted, {} succeeded, {} failed, {} canceled, {} rejected, {} dropped",
            self.fetches_submitted,
            self.fetches_succeeded,
            self.fetches_failed,
            self.fetches_canceled,
            self.rejected,
            self.dropped
        )?;
        writeln!(f, "{}", self.memory)?;
        writeln!(f, "{}", self.disk)?;
        write!(f, "{}", self.pool)
    }
}

#[derive(Default)]
struct SupplyCounters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    fetches_submitted: AtomicU64,
    fetches_succeeded: AtomicU64,
    fetches_failed: AtomicU64,
    late_canceled: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// =============================================================================
// Delivery: shared between the orchestrator and fetch jobs
// =============================================================================

/// Caches, source and sink. Fetch jobs hold an `Arc` to this and nothing
/// else, so a job finishing late never keeps the worker pool alive.
struct Delivery {
    memory: Arc<MemoryTileCache>,
    disk: Arc<DiskTileCache>,
    source: Arc<dyn TileSource>,
    sink: Arc<dyn TileSink>,
    counters: SupplyCounters,
    destroyed: AtomicBool,
}

impl Delivery {
    fn deliver(&self, key: TileKey, image: &TileImage) {
        bump(&self.counters.delivered);
        self.sink.deliver(key, image);
    }

    /// Serves `key` from memory or disk. Returns false on a double miss.
    fn serve_cached(&self, key: TileKey) -> bool {
        if let Some(image) = self.memory.get(&key) {
            trace!(x = key.x, y = key.y, "Memory cache hit");
            bump(&self.counters.memory_hits);
            self.deliver(key, &image);
            return true;
        }

        if let Some(image) = self.disk.get(&key) {
            trace!(x = key.x, y = key.y, "Disk cache hit");
            bump(&self.counters.disk_hits);
            self.memory.put(key, &image);
            self.deliver(key, &image);
            return true;
        }

        false
    }

    /// Body of a fetch job.
    fn fetch(&self, ctx: &JobContext) {
        let key = ctx.key();
        match self.source.fetch(key) {
            Ok(image) => {
                if ctx.is_canceled() || self.destroyed.load(Ordering::Acquire) {
                    debug!(x = key.x, y = key.y, "Fetched tile discarded after cancel");
                    bump(&self.counters.late_canceled);
                    return;
                }
                self.disk.put(key, &image);
                self.memory.put(key, &image);
                bump(&self.counters.fetches_succeeded);
                self.deliver(key, &image);
            }
            Err(e) => {
                debug!(
                    x = key.x,
                    y = key.y,
                    source = self.source.name(),
                    error = %e,
                    "Tile fetch failed"
                );
                bump(&self.counters.fetches_failed);
            }
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

struct Control {
    queue: RequestStack,
    paused: bool,
    terminated: bool,
    /// The orchestrator is handling a popped request.
    busy: bool,
    /// The orchestrator thread has not returned yet.
    alive: bool,
}

struct Orchestrator {
    control: Mutex<Control>,
    /// Wakes the orchestrator thread.
    wake: Condvar,
    /// Signalled when the orchestrator thread exits.
    exited: Condvar,
    pool: DedupWorkerPool,
    delivery: Arc<Delivery>,
}

impl Orchestrator {
    fn run(&self) {
        self.delivery.disk.restore();

        while let Some(key) = self.next_request() {
            if !self.delivery.serve_cached(key) {
                self.schedule_fetch(key);
            }
        }

        let mut control = self.control.lock();
        control.alive = false;
        control.busy = false;
        self.exited.notify_all();
        debug!("Orchestrator thread stopped");
    }

    /// Blocks until there is an unpaused request or the pipeline terminates.
    fn next_request(&self) -> Option<TileKey> {
        let mut control = self.control.lock();
        control.busy = false;
        loop {
            if control.terminated {
                return None;
            }
            if !control.paused {
                if let Some(key) = control.queue.pop() {
                    control.busy = true;
                    return Some(key);
                }
            }
            self.wake.wait(&mut control);
        }
    }

    fn schedule_fetch(&self, key: TileKey) {
        let counters = &self.delivery.counters;
        let job = fetch_job(Arc::clone(&self.delivery), key);

        match self.pool.submit(job) {
            Ok(()) => bump(&counters.fetches_submitted),
            Err(PoolError::QueueFull(job)) => {
                bump(&counters.rejected);
                let cleared = self.pool.clear_queue();
                debug!(x = key.x, y = key.y, cleared, "Fetch queue full, cleared stale jobs");

                match self.pool.submit(job) {
                    Ok(()) => bump(&counters.fetches_submitted),
                    Err(e) => {
                        bump(&counters.dropped);
                        debug!(x = key.x, y = key.y, error = %e, "Fetch request dropped");
                    }
                }
            }
            Err(e) => {
                bump(&counters.dropped);
                debug!(x = key.x, y = key.y, error = %e, "Fetch request dropped");
            }
        }
    }
}

fn fetch_job(delivery: Arc<Delivery>, key: TileKey) -> FetchJob {
    FetchJob::new(key, move |ctx| delivery.fetch(ctx))
}

// =============================================================================
// Public handle
// =============================================================================

/// Deduplicating, cache-first tile supplier.
///
/// Dropping the pipeline destroys it.
pub struct TileSupplyPipeline {
    orchestrator: Arc<Orchestrator>,
    handle: Mutex<Option<JoinHandle<()>>>,
    join_timeout: Duration,
}

impl TileSupplyPipeline {
    /// Builds a pipeline from `config`, opening the disk cache directory.
    ///
    /// # Errors
    ///
    /// Fails if the cache directory is unusable or a thread cannot start.
    pub fn new(
        config: &SupplyConfig,
        source: Arc<dyn TileSource>,
        sink: Arc<dyn TileSink>,
    ) -> Result<Self, SupplyError> {
        let disk = DiskTileCache::new(&config.cache_dir, config.disk_tiles)?;
        let memory = MemoryTileCache::new(config.memory_tiles);

        Self::from_parts(
            Arc::new(memory),
            Arc::new(disk),
            config.pool_config(),
            source,
            sink,
            config.join_timeout,
        )
    }

    /// Builds a pipeline around existing caches.
    ///
    /// # Arguments
    ///
    /// * `memory` - Memory tier
    /// * `disk` - Disk tier; its index is rebuilt from the directory on start
    /// * `pool` - Fetch worker pool sizing
    /// * `source` - Where missing tiles are fetched from
    /// * `sink` - Where supplied tiles go
    /// * `join_timeout` - Bound on each thread join during teardown
    pub fn from_parts(
        memory: Arc<MemoryTileCache>,
        disk: Arc<DiskTileCache>,
        pool: PoolConfig,
        source: Arc<dyn TileSource>,
        sink: Arc<dyn TileSink>,
        join_timeout: Duration,
    ) -> Result<Self, SupplyError> {
        // paused along with the orchestrator until the first resume()
        let pool = DedupWorkerPool::new(pool.paused())?;
        let workers = pool.workers();

        let orchestrator = Arc::new(Orchestrator {
            control: Mutex::new(Control {
                queue: RequestStack::new(),
                paused: true,
                terminated: false,
                busy: false,
                alive: true,
            }),
            wake: Condvar::new(),
            exited: Condvar::new(),
            pool,
            delivery: Arc::new(Delivery {
                memory,
                disk,
                source,
                sink,
                counters: SupplyCounters::default(),
                destroyed: AtomicBool::new(false),
            }),
        });

        let runner = Arc::clone(&orchestrator);
        let handle = thread::Builder::new()
            .name("tilesupply-orchestrator".to_string())
            .spawn(move || runner.run())
            .map_err(SupplyError::Thread)?;

        info!(
            source = orchestrator.delivery.source.name(),
            memory_tiles = orchestrator.delivery.memory.capacity(),
            disk_tiles = orchestrator.delivery.disk.max_capacity(),
            workers,
            "Tile supply pipeline started"
        );

        Ok(Self {
            orchestrator,
            handle: Mutex::new(Some(handle)),
            join_timeout,
        })
    }

    /// Queues `key`, or moves it to the top if already queued.
    ///
    /// Does not wake the orchestrator; call [`drain_now`](Self::drain_now).
    pub fn request(&self, key: TileKey) {
        let mut control = self.orchestrator.control.lock();
        if control.terminated {
            return;
        }
        control.queue.push(key);
    }

    /// Wakes the orchestrator if there is work and the pipeline is not paused.
    pub fn drain_now(&self) {
        let control = self.orchestrator.control.lock();
        if !control.queue.is_empty() && !control.paused && !control.terminated {
            self.orchestrator.wake.notify_one();
        }
    }

    /// Stops starting new work. Fetches already running complete normally;
    /// fetch jobs waiting for a worker stay queued until [`resume`](Self::resume).
    pub fn pause(&self) {
        let mut control = self.orchestrator.control.lock();
        self.orchestrator.pool.pause();
        if !control.paused {
            control.paused = true;
            debug!(
                pending = control.queue.len(),
                queued_fetches = self.orchestrator.pool.queued(),
                "Tile supply paused"
            );
        }
    }

    /// Resumes draining the request stack.
    pub fn resume(&self) {
        let mut control = self.orchestrator.control.lock();
        if control.terminated {
            return;
        }
        if control.paused {
            control.paused = false;
            debug!(pending = control.queue.len(), "Tile supply resumed");
        }
        self.orchestrator.pool.resume();
        self.orchestrator.wake.notify_one();
    }

    /// Drops every request that has not started, both queued keys and fetch
    /// jobs waiting for a worker. Running fetches finish and still write to
    /// the caches and the sink.
    ///
    /// Returns the number of dropped requests and jobs.
    pub fn clear_request_queue(&self) -> usize {
        let requests = self.orchestrator.control.lock().queue.clear();
        let jobs = self.orchestrator.pool.clear_queue();
        if requests + jobs > 0 {
            debug!(requests, jobs, "Tile request queue cleared");
        }
        requests + jobs
    }

    /// Asks running fetches to discard their results.
    ///
    /// A canceled fetch still completes its network request but writes
    /// nothing and delivers nothing. Returns how many fetches were flagged.
    pub fn cancel_in_flight(&self) -> usize {
        let count = self.orchestrator.pool.cancel_running();
        if count > 0 {
            debug!(count, "Canceled running fetches");
        }
        count
    }

    /// Current orchestrator state.
    pub fn state(&self) -> SupplyState {
        let control = self.orchestrator.control.lock();
        if control.terminated {
            SupplyState::Destroyed
        } else if control.busy || (!control.paused && !control.queue.is_empty()) {
            SupplyState::Running
        } else {
            SupplyState::Idle
        }
    }

    /// True while paused.
    pub fn is_paused(&self) -> bool {
        self.orchestrator.control.lock().paused
    }

    /// Number of queued requests.
    pub fn pending(&self) -> usize {
        self.orchestrator.control.lock().queue.len()
    }

    /// Number of tiles being fetched right now.
    pub fn in_flight(&self) -> usize {
        self.orchestrator.pool.in_flight()
    }

    /// The memory tier.
    pub fn memory_cache(&self) -> &Arc<MemoryTileCache> {
        &self.orchestrator.delivery.memory
    }

    /// The disk tier.
    pub fn disk_cache(&self) -> &Arc<DiskTileCache> {
        &self.orchestrator.delivery.disk
    }

    /// Returns a snapshot of pipeline, cache and pool counters.
    pub fn stats(&self) -> SupplyStats {
        let delivery = &self.orchestrator.delivery;
        let counters = &delivery.counters;
        let pool = self.orchestrator.pool.stats();

        SupplyStats {
            memory_hits: counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: counters.disk_hits.load(Ordering::Relaxed),
            fetches_submitted: counters.fetches_submitted.load(Ordering::Relaxed),
            fetches_succeeded: counters.fetches_succeeded.load(Ordering::Relaxed),
            fetches_failed: counters.fetches_failed.load(Ordering::Relaxed),
            fetches_canceled: pool.canceled + counters.late_canceled.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            memory: delivery.memory.stats(),
            disk: delivery.disk.stats(),
            pool,
        }
    }

    /// Tears the pipeline down.
    ///
    /// Stops accepting requests, stops the orchestrator thread, shuts the
    /// worker pool down and releases the memory cache. Each thread group gets
    /// up to the configured join timeout; threads still busy after that are
    /// detached. Fetches that finish after this call deliver nothing.
    /// Calling it again is a no-op.
    pub fn destroy(&self) {
        let orchestrator = &self.orchestrator;
        {
            let mut control = orchestrator.control.lock();
            if control.terminated {
                return;
            }
            control.terminated = true;
            control.queue.clear();
        }
        orchestrator.delivery.destroyed.store(true, Ordering::Release);
        orchestrator.wake.notify_all();

        let deadline = Instant::now() + self.join_timeout;
        let stopped = {
            let mut control = orchestrator.control.lock();
            while control.alive {
                if orchestrator
                    .exited
                    .wait_until(&mut control, deadline)
                    .timed_out()
                {
                    break;
                }
            }
            !control.alive
        };

        let handle = self.handle.lock().take();
        match handle {
            Some(handle) if stopped => {
                let _ = handle.join();
            }
            Some(_) => {
                warn!(
                    timeout_ms = self.join_timeout.as_millis() as u64,
                    "Orchestrator thread did not stop in time, detaching"
                );
            }
            None => {}
        }

        orchestrator.pool.shutdown(self.join_timeout);
        orchestrator.delivery.memory.destroy();

        info!("Tile supply pipeline destroyed");
    }
}

impl Drop for TileSupplyPipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for TileSupplyPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileSupplyPipeline")
            .field("state", &self.state())
            .field("pending", &self.pending())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
