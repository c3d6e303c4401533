//! Background job submission.
//!
//! Delivery and checkpoint work never runs on the thread that triggered it.
//! Callers hand a closure to a [`JobQueue`] together with a [`JobType`] and a
//! label, and the queue runs it on one of its worker threads.
//!
//! [`WorkerPool`] is the in-process implementation: a fixed set of threads
//! fed by one channel per job type, drained in priority order.

mod pool;

pub use pool::{PoolStats, WorkerPool};

use crate::error::Result;
use std::fmt;

/// A unit of background work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Class of a background job. Lanes are drained in [`JobType::ALL`] order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobType {
    /// WAL checkpoints (storage maintenance triggered by write load).
    Wal,
    /// Work on behalf of a client, such as pushing events to a subscriber.
    Client,
    /// Low priority housekeeping.
    Maintenance,
}

impl JobType {
    /// All job types, highest priority first.
    pub const ALL: [JobType; 3] = [JobType::Wal, JobType::Client, JobType::Maintenance];

    pub(crate) fn lane(self) -> usize {
        match self {
            JobType::Wal => 0,
            JobType::Client => 1,
            JobType::Maintenance => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Wal => "wal",
            JobType::Client => "client",
            JobType::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts named units of work and runs them on worker threads.
///
/// Submission is fire-and-forget. The only error reported is that the queue
/// no longer accepts work.
pub trait JobQueue: Send + Sync {
    fn submit(&self, job_type: JobType, label: &str, work: Job) -> Result<()>;
}
