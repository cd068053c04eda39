//! Fetch jobs: a tile key, a cancel flag and a one-shot body.
//!
//! Cancellation is cooperative. A job marked canceled before it starts never
//! enters its body; a body that wants to honor late cancellation checks
//! [`JobContext::is_canceled`] before any side effect.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::coord::TileKey;

/// Boxed job body, run at most once on a pool thread.
pub type JobBody = Box<dyn FnOnce(&JobContext) + Send + 'static>;

/// What a job sees while running.
#[derive(Debug, Clone)]
pub struct JobContext {
    key: TileKey,
    canceled: Arc<AtomicBool>,
}

impl JobContext {
    /// Tile this job is fetching.
    pub fn key(&self) -> TileKey {
        self.key
    }

    /// True once the job has been asked to stop.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The body ran to completion.
    Completed,
    /// The job was canceled before its body started.
    Canceled,
}

/// A unit of work keyed by the tile it fetches.
pub struct FetchJob {
    key: TileKey,
    canceled: Arc<AtomicBool>,
    body: JobBody,
}

impl FetchJob {
    /// Creates a job for `key` running `body`.
    pub fn new<F>(key: TileKey, body: F) -> Self
    where
        F: FnOnce(&JobContext) + Send + 'static,
    {
        Self {
            key,
            canceled: Arc::new(AtomicBool::new(false)),
            body: Box::new(body),
        }
    }

    /// Tile this job fetches.
    pub fn key(&self) -> TileKey {
        self.key
    }

    /// Marks the job canceled.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    /// True once [`cancel`](Self::cancel) has been called.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Shared handle to the cancel flag, usable after the job has moved.
    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.canceled)
    }

    /// Runs the body unless the job is already canceled.
    pub(crate) fn run(self) -> JobOutcome {
        let context = JobContext {
            key: self.key,
            canceled: self.canceled,
        };

        if context.is_canceled() {
            return JobOutcome::Canceled;
        }

        (self.body)(&context);
        JobOutcome::Completed
    }
}

impl fmt::Debug for FetchJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchJob")
            .field("key", &self.key)
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
