//! Bounded worker pool that runs at most one job per tile key.
//!
//! ```text
//!   submit ──► [ bounded FIFO queue ] ──► worker 1 ─┐
//!                                     └─► worker P ─┤
//!                                                   ▼
//!                                       InFlightRegistry.try_acquire(key)
//!                                         ├─ acquired: run body, release
//!                                         └─ taken:    cancel, skip body
//! ```
//!
//! Duplicate detection happens when a worker picks a job up, not at submit
//! time, so two queued jobs for the same key both run if the first finishes
//! before the second starts. A job that lost the race never touches the
//! registry.
//!
//! A paused pool keeps accepting jobs but no worker picks one up until
//! [`DedupWorkerPool::resume`]; jobs already running are unaffected.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::job::{FetchJob, JobOutcome};
use super::registry::InFlightRegistry;
use crate::coord::TileKey;

/// Default bound on queued, not yet started jobs.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// How long [`DedupWorkerPool::shutdown`] waits for workers by default.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Picks the worker count for this host.
///
/// Fetching is network bound, so extra threads beyond two buy nothing; a
/// single-core host gets one.
pub fn default_workers() -> usize {
    let cpus = thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    if cpus <= 1 {
        1
    } else {
        2
    }
}

/// Errors returned by [`DedupWorkerPool`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// The queue is at its configured depth; the job is handed back.
    #[error("job queue is full, rejected fetch for {}", .0.key())]
    QueueFull(FetchJob),

    /// The pool has been shut down; the job is handed back.
    #[error("worker pool is shut down, rejected fetch for {}", .0.key())]
    ShutDown(FetchJob),

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl PoolError {
    /// Returns the rejected job, if this error carries one.
    pub fn into_job(self) -> Option<FetchJob> {
        match self {
            PoolError::QueueFull(job) | PoolError::ShutDown(job) => Some(job),
            PoolError::Spawn(_) => None,
        }
    }
}

/// Pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads, at least one.
    pub workers: usize,
    /// Maximum queued jobs, at least one.
    pub queue_depth: usize,
    /// Prefix for worker thread names.
    pub thread_name: String,
    /// Start without dispatching queued jobs until [`DedupWorkerPool::resume`].
    pub start_paused: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            thread_name: "tilesupply-fetch".to_string(),
            start_paused: false,
        }
    }
}

impl PoolConfig {
    /// Sets the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the queue depth.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Starts the pool paused.
    pub fn paused(mut self) -> Self {
        self.start_paused = true;
        self
    }

    /// Sets the worker thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Point-in-time view of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub submitted: u64,
    pub rejected: u64,
    pub completed: u64,
    pub canceled: u64,
    pub cleared: u64,
    pub panicked: u64,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pool: {} workers, {} queued, {} in flight, {} submitted, {} completed, {} canceled, {} rejected, {} cleared",
            self.workers,
            self.queued,
            self.in_flight,
            self.submitted,
            self.completed,
            self.canceled,
            self.rejected,
            self.cleared
        )
    }
}

struct QueueState {
    jobs: VecDeque<FetchJob>,
    paused: bool,
    shut_down: bool,
    live_workers: usize,
}

#[derive(Default)]
struct PoolCounters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    canceled: AtomicU64,
    cleared: AtomicU64,
    panicked: AtomicU64,
}

struct PoolShared {
    queue: Mutex<QueueState>,
    /// Signalled when a job is queued, the pool resumes or shuts down.
    job_available: Condvar,
    /// Signalled when a worker thread exits.
    worker_exited: Condvar,
    queue_depth: usize,
    registry: InFlightRegistry,
    /// Cancel flags of jobs that hold a registry slot.
    running: Mutex<HashMap<TileKey, Arc<AtomicBool>>>,
    counters: PoolCounters,
}

impl PoolShared {
    fn next_job(&self) -> Option<FetchJob> {
        let mut queue = self.queue.lock();
        loop {
            if queue.shut_down {
                return None;
            }
            if !queue.paused {
                if let Some(job) = queue.jobs.pop_front() {
                    return Some(job);
                }
            }
            self.job_available.wait(&mut queue);
        }
    }

    fn execute(&self, job: FetchJob) {
        let key = job.key();
        let acquired = self.registry.try_acquire(key);

        if acquired {
            self.running.lock().insert(key, job.cancel_flag());
        } else {
            job.cancel();
            debug!(x = key.x, y = key.y, "Duplicate fetch canceled");
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run()));

        if acquired {
            self.running.lock().remove(&key);
            self.registry.release(&key);
        }

        match outcome {
            Ok(JobOutcome::Completed) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(JobOutcome::Canceled) => {
                self.counters.canceled.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                warn!(x = key.x, y = key.y, "Fetch job panicked");
                self.counters.panicked.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn worker_loop(&self) {
        while let Some(job) = self.next_job() {
            self.execute(job);
        }

        let mut queue = self.queue.lock();
        queue.live_workers = queue.live_workers.saturating_sub(1);
        self.worker_exited.notify_all();
    }
}

/// Fixed-size thread pool with per-key deduplication of running jobs.
pub struct DedupWorkerPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    workers: usize,
}

impl DedupWorkerPool {
    /// Starts the worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Spawn`] if a thread cannot be created; workers
    /// already started are shut down first.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let workers = config.workers.max(1);
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(QueueState {
                jobs: VecDeque::with_capacity(config.queue_depth.max(1)),
                paused: config.start_paused,
                shut_down: false,
                live_workers: 0,
            }),
            job_available: Condvar::new(),
            worker_exited: Condvar::new(),
            queue_depth: config.queue_depth.max(1),
            registry: InFlightRegistry::new(),
            running: Mutex::new(HashMap::new()),
            counters: PoolCounters::default(),
        });

        let pool = Self {
            shared,
            handles: Mutex::new(Vec::with_capacity(workers)),
            workers,
        };

        for index in 0..workers {
            let shared = Arc::clone(&pool.shared);
            shared.queue.lock().live_workers += 1;
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, index))
                .spawn(move || shared.worker_loop());

            match spawned {
                Ok(handle) => pool.handles.lock().push(handle),
                Err(e) => {
                    pool.shared.queue.lock().live_workers -= 1;
                    pool.shutdown(DEFAULT_SHUTDOWN_TIMEOUT);
                    return Err(PoolError::Spawn(e));
                }
            }
        }

        debug!(
            workers,
            queue_depth = pool.shared.queue_depth,
            "Worker pool started"
        );
        Ok(pool)
    }

    /// Queues a job without blocking.
    ///
    /// # Errors
    ///
    /// [`PoolError::QueueFull`] when the queue is at capacity and
    /// [`PoolError::ShutDown`] after [`shutdown`](Self::shutdown); both hand
    /// the job back to the caller.
    pub fn submit(&self, job: FetchJob) -> Result<(), PoolError> {
        let mut queue = self.shared.queue.lock();
        if queue.shut_down {
            return Err(PoolError::ShutDown(job));
        }
        if queue.jobs.len() >= self.shared.queue_depth {
            self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
            trace!(x = job.key().x, y = job.key().y, "Job queue full");
            return Err(PoolError::QueueFull(job));
        }

        queue.jobs.push_back(job);
        drop(queue);

        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.job_available.notify_one();
        Ok(())
    }

    /// Stops workers from picking up queued jobs. Running jobs continue.
    pub fn pause(&self) {
        self.shared.queue.lock().paused = true;
    }

    /// Lets workers pick up queued jobs again.
    pub fn resume(&self) {
        let mut queue = self.shared.queue.lock();
        if queue.paused {
            queue.paused = false;
            drop(queue);
            self.shared.job_available.notify_all();
        }
    }

    /// True while dispatch is paused.
    pub fn is_paused(&self) -> bool {
        self.shared.queue.lock().paused
    }

    /// Drops every queued job that has not started. Returns how many.
    pub fn clear_queue(&self) -> usize {
        let dropped: Vec<FetchJob> = self.shared.queue.lock().jobs.drain(..).collect();
        for job in &dropped {
            job.cancel();
        }
        let count = dropped.len();
        if count > 0 {
            self.shared
                .counters
                .cleared
                .fetch_add(count as u64, Ordering::Relaxed);
            debug!(count, "Cleared queued fetch jobs");
        }
        count
    }

    /// Flags every running job as canceled. Returns how many were flagged.
    ///
    /// Bodies observe the flag through [`JobContext::is_canceled`] and are
    /// expected to skip any remaining side effects.
    ///
    /// [`JobContext::is_canceled`]: super::JobContext::is_canceled
    pub fn cancel_running(&self) -> usize {
        let running = self.shared.running.lock();
        for flag in running.values() {
            flag.store(true, Ordering::Release);
        }
        running.len()
    }

    /// Number of jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }

    /// Number of keys currently being fetched.
    pub fn in_flight(&self) -> usize {
        self.shared.registry.len()
    }

    /// True when a job for `key` holds the in-flight slot.
    pub fn is_in_flight(&self, key: &TileKey) -> bool {
        self.shared.registry.contains(key)
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Configured queue depth.
    pub fn queue_depth(&self) -> usize {
        self.shared.queue_depth
    }

    /// True after [`shutdown`](Self::shutdown).
    pub fn is_shut_down(&self) -> bool {
        self.shared.queue.lock().shut_down
    }

    /// Returns a snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        let counters = &self.shared.counters;
        PoolStats {
            workers: self.workers,
            queued: self.queued(),
            in_flight: self.in_flight(),
            submitted: counters.submitted.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            canceled: counters.canceled.load(Ordering::Relaxed),
            cleared: counters.cleared.load(Ordering::Relaxed),
            panicked: counters.panicked.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting jobs, drops the queue and waits up to `timeout` for
    /// running jobs to finish.
    ///
    /// Returns true if every worker exited in time. Workers still busy after
    /// the timeout are detached and exit once their current job returns.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let dropped = {
            let mut queue = self.shared.queue.lock();
            queue.shut_down = true;
            queue.jobs.drain(..).collect::<Vec<_>>()
        };
        for job in &dropped {
            job.cancel();
        }
        self.shared.job_available.notify_all();

        let all_exited = {
            let mut queue = self.shared.queue.lock();
            while queue.live_workers > 0 {
                if self
                    .shared
                    .worker_exited
                    .wait_until(&mut queue, deadline)
                    .timed_out()
                {
                    break;
                }
            }
            queue.live_workers == 0
        };

        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        if all_exited {
            for handle in handles {
                let _ = handle.join();
            }
            debug!(dropped = dropped.len(), "Worker pool shut down");
        } else {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Worker pool shutdown timed out, detaching busy workers"
            );
        }
        all_exited
    }
}

impl Drop for DedupWorkerPool {
    fn drop(&mut self) {
        if !self.handles.lock().is_empty() {
            self.shutdown(DEFAULT_SHUTDOWN_TIMEOUT);
        }
    }
}

impl fmt::Debug for DedupWorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupWorkerPool")
            .field("workers", &self.workers)
            .field("queue_depth", &self.shared.queue_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    fn pool(workers: usize, depth: usize) -> DedupWorkerPool {
        DedupWorkerPool::new(
            PoolConfig::default()
                .with_workers(workers)
                .with_queue_depth(depth),
        )
        .unwrap()
    }

    /// Spins until `check` holds or the wait budget runs out.
    fn wait_for(check: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        check()
    }

    #[test]
    fn test_default_workers_is_one_or_two() {
        let workers = default_workers();
        assert!(workers == 1 || workers == 2);
    }

    #[test]
    fn test_runs_submitted_job() {
        let pool = pool(1, 4);
        let (tx, rx) = mpsc::channel();

        pool.submit(FetchJob::new(TileKey::new(1, 1), move |ctx| {
            tx.send(ctx.key()).unwrap();
        }))
        .unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), TileKey::new(1, 1));
        assert!(wait_for(|| pool.stats().completed == 1));
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_duplicate_running_key_is_canceled() {
        let pool = pool(2, 4);
        let key = TileKey::new(7, 7);
        let writes = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let first_writes = Arc::clone(&writes);
        pool.submit(FetchJob::new(key, move |_| {
            started_tx.send(()).unwrap();
            release_rx.recv_timeout(WAIT).unwrap();
            first_writes.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        started_rx.recv_timeout(WAIT).unwrap();
        assert!(pool.is_in_flight(&key));

        let second_writes = Arc::clone(&writes);
        pool.submit(FetchJob::new(key, move |_| {
            second_writes.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        assert!(wait_for(|| pool.stats().canceled == 1));
        // the loser must not have released the winner's slot
        assert!(pool.is_in_flight(&key));

        release_tx.send(()).unwrap();
        assert!(wait_for(|| pool.stats().completed == 1));

        assert_eq!(writes.load(Ordering::SeqCst), 1);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_sequential_same_key_both_run() {
        let pool = pool(1, 4);
        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let runs = Arc::clone(&runs);
            pool.submit(FetchJob::new(TileKey::new(2, 2), move |_| {
                runs.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        assert!(wait_for(|| runs.load(Ordering::SeqCst) == 2));
        assert_eq!(pool.stats().canceled, 0);
    }

    #[test]
    fn test_queue_full_returns_job() {
        let pool = pool(1, 1);
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        pool.submit(FetchJob::new(TileKey::new(0, 0), move |_| {
            started_tx.send(()).unwrap();
            release_rx.recv_timeout(WAIT).unwrap();
        }))
        .unwrap();
        started_rx.recv_timeout(WAIT).unwrap();

        pool.submit(FetchJob::new(TileKey::new(1, 0), |_| {})).unwrap();
        let err = pool
            .submit(FetchJob::new(TileKey::new(2, 0), |_| {}))
            .unwrap_err();

        assert!(matches!(err, PoolError::QueueFull(_)));
        assert!(err.to_string().contains("(2, 0)"));
        assert_eq!(err.into_job().map(|j| j.key()), Some(TileKey::new(2, 0)));
        assert_eq!(pool.stats().rejected, 1);

        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_clear_queue_drops_pending_jobs() {
        let pool = pool(1, 8);
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let ran = Arc::new(AtomicUsize::new(0));

        pool.submit(FetchJob::new(TileKey::new(0, 0), move |_| {
            started_tx.send(()).unwrap();
            release_rx.recv_timeout(WAIT).unwrap();
        }))
        .unwrap();
        started_rx.recv_timeout(WAIT).unwrap();

        for x in 1..4 {
            let ran = Arc::clone(&ran);
            pool.submit(FetchJob::new(TileKey::new(x, 0), move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        assert_eq!(pool.clear_queue(), 3);
        assert_eq!(pool.queued(), 0);

        release_tx.send(()).unwrap();
        assert!(wait_for(|| pool.stats().completed == 1));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(pool.stats().cleared, 3);
    }

    #[test]
    fn test_cancel_running_sets_flag() {
        let pool = pool(1, 4);
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (seen_tx, seen_rx) = mpsc::channel();

        pool.submit(FetchJob::new(TileKey::new(4, 4), move |ctx| {
            started_tx.send(()).unwrap();
            release_rx.recv_timeout(WAIT).unwrap();
            seen_tx.send(ctx.is_canceled()).unwrap();
        }))
        .unwrap();
        started_rx.recv_timeout(WAIT).unwrap();

        assert_eq!(pool.cancel_running(), 1);
        release_tx.send(()).unwrap();

        assert!(seen_rx.recv_timeout(WAIT).unwrap());
        assert!(wait_for(|| pool.in_flight() == 0));
    }

    #[test]
    fn test_panicking_job_releases_slot() {
        let pool = pool(1, 4);
        let key = TileKey::new(8, 8);
        pool.submit(FetchJob::new(key, |_| panic!("boom"))).unwrap();

        assert!(wait_for(|| pool.stats().panicked == 1));
        assert!(!pool.is_in_flight(&key));

        let (tx, rx) = mpsc::channel();
        pool.submit(FetchJob::new(key, move |_| tx.send(()).unwrap()))
            .unwrap();
        assert!(rx.recv_timeout(WAIT).is_ok());
    }

    #[test]
    fn test_shutdown_rejects_new_jobs() {
        let pool = pool(2, 4);
        assert!(pool.shutdown(WAIT));
        assert!(pool.is_shut_down());

        let err = pool
            .submit(FetchJob::new(TileKey::new(0, 0), |_| {}))
            .unwrap_err();
        assert!(matches!(err, PoolError::ShutDown(_)));
    }

    #[test]
    fn test_shutdown_times_out_on_busy_worker() {
        let pool = pool(1, 4);
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        pool.submit(FetchJob::new(TileKey::new(0, 0), move |_| {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv_timeout(WAIT);
        }))
        .unwrap();
        started_rx.recv_timeout(WAIT).unwrap();

        assert!(!pool.shutdown(Duration::from_millis(20)));
        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_paused_pool_holds_queued_jobs() {
        let pool = pool(1, 4);
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let ran = Arc::new(AtomicUsize::new(0));

        pool.submit(FetchJob::new(TileKey::new(0, 0), move |_| {
            started_tx.send(()).unwrap();
            release_rx.recv_timeout(WAIT).unwrap();
        }))
        .unwrap();
        started_rx.recv_timeout(WAIT).unwrap();

        let queued_ran = Arc::clone(&ran);
        pool.submit(FetchJob::new(TileKey::new(1, 0), move |_| {
            queued_ran.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        pool.pause();
        assert!(pool.is_paused());
        release_tx.send(()).unwrap();

        // the running job finishes, the queued one waits
        assert!(wait_for(|| pool.stats().completed == 1));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(pool.queued(), 1);

        pool.resume();
        assert!(wait_for(|| ran.load(Ordering::SeqCst) == 1));
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn test_shutdown_while_paused_drops_queue() {
        let pool = DedupWorkerPool::new(
            PoolConfig::default()
                .with_workers(1)
                .with_queue_depth(4)
                .paused(),
        )
        .unwrap();
        assert!(pool.is_paused());

        let ran = Arc::new(AtomicUsize::new(0));
        let job_ran = Arc::clone(&ran);
        pool.submit(FetchJob::new(TileKey::new(3, 3), move |_| {
            job_ran.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        assert!(pool.shutdown(WAIT));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_sizes_are_clamped() {
        let pool = pool(0, 0);
        assert_eq!(pool.workers(), 1);
        assert_eq!(pool.queue_depth(), 1);
    }
}
