//! Fetch execution.
//!
//! [`DedupWorkerPool`] runs [`FetchJob`]s on a fixed set of threads and uses
//! an [`InFlightRegistry`] to guarantee that at most one job per tile key is
//! running anywhere in the pool.

mod job;
mod pool;
mod registry;

pub use job::{FetchJob, JobBody, JobContext, JobOutcome};
pub use pool::{
    default_workers, DedupWorkerPool, PoolConfig, PoolError, PoolStats, DEFAULT_QUEUE_DEPTH,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use registry::InFlightRegistry;
