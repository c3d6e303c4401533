//! Thread pool implementation of [`JobQueue`].

use super::{Job, JobQueue, JobType};
use crate::error::{CourierError, Result};
use crossbeam_channel::{unbounded, Receiver, Select, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

struct Task {
    label: String,
    job_type: JobType,
    work: Job,
}

/// Count of submitted-but-unfinished jobs, for `wait_idle`.
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn start(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// Snapshot of pool counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
}

/// Fixed-size pool of worker threads.
///
/// Each [`JobType`] has its own unbounded lane. Idle workers take from the
/// highest priority lane that has work and otherwise block on all lanes.
pub struct WorkerPool {
    /// Lane senders, indexed by `JobType::lane`. `None` once shut down.
    lanes: RwLock<Option<Vec<Sender<Task>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<Pending>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Start a pool with `threads` workers named `{name}-{n}`.
    pub fn new(threads: usize, name: &str) -> Result<Self> {
        if threads == 0 {
            return Err(CourierError::config("job queue needs at least one thread"));
        }

        let (senders, receivers): (Vec<_>, Vec<_>) =
            JobType::ALL.iter().map(|_| unbounded::<Task>()).unzip();

        let pending = Arc::new(Pending::default());
        let counters = Arc::new(Counters::default());

        let mut workers = Vec::with_capacity(threads);
        for n in 0..threads {
            let lanes = receivers.clone();
            let pending = Arc::clone(&pending);
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("{name}-{n}"))
                .spawn(move || run_worker(lanes, pending, counters))?;
            workers.push(handle);
        }

        debug!(threads, pool = name, "Worker pool started");

        Ok(Self {
            lanes: RwLock::new(Some(senders)),
            workers: Mutex::new(workers),
            pending,
            counters,
        })
    }

    /// Block until every submitted job has finished, or the timeout expires.
    ///
    /// Returns true if the pool went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.pending.count.lock();
        while *count > 0 {
            if self.pending.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.lanes.read().is_none()
    }

    /// Stop accepting work, run what is already queued, and join the workers.
    ///
    /// When called from a worker thread (the last handle to the pool was
    /// released inside a job) that worker is detached instead of joined.
    pub fn shutdown(&self) {
        let senders = self.lanes.write().take();
        if senders.is_none() {
            return;
        }
        drop(senders);

        let current = thread::current().id();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread exited abnormally");
            }
        }
        debug!("Worker pool stopped");
    }
}

impl JobQueue for WorkerPool {
    fn submit(&self, job_type: JobType, label: &str, work: Job) -> Result<()> {
        let lanes = self.lanes.read();
        let lanes = lanes.as_ref().ok_or(CourierError::JobQueueClosed)?;

        self.pending.start();
        let task = Task {
            label: label.to_string(),
            job_type,
            work,
        };
        if lanes[job_type.lane()].send(task).is_err() {
            self.pending.finish();
            return Err(CourierError::JobQueueClosed);
        }

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        trace!(label, job_type = %job_type, "Job submitted");
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(lanes: Vec<Receiver<Task>>, pending: Arc<Pending>, counters: Arc<Counters>) {
    while let Some(task) = next_task(&lanes) {
        let Task {
            label,
            job_type,
            work,
        } = task;

        trace!(label = %label, job_type = %job_type, "Job started");
        match catch_unwind(AssertUnwindSafe(work)) {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!(label = %label, job_type = %job_type, "Job panicked");
            }
        }
        pending.finish();
    }
}

/// Take the next task, preferring earlier lanes. Returns `None` once every
/// lane is disconnected and drained.
fn next_task(lanes: &[Receiver<Task>]) -> Option<Task> {
    for rx in lanes {
        if let Ok(task) = rx.try_recv() {
            return Some(task);
        }
    }

    let mut select = Select::new();
    for rx in lanes {
        select.recv(rx);
    }

    let mut closed = 0;
    while closed < lanes.len() {
        let oper = select.select();
        let index = oper.index();
        match oper.recv(&lanes[index]) {
            Ok(task) => return Some(task),
            Err(_) => {
                select.remove(index);
                closed += 1;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_runs_submitted_jobs() {
        let pool = WorkerPool::new(2, "test").unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let hits = Arc::clone(&hits);
            pool.submit(
                JobType::Client,
                "count",
                Box::new(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        }

        assert!(pool.wait_idle(Duration::from_secs(5)));
        assert_eq!(hits.load(Ordering::SeqCst), 50);
        assert_eq!(pool.stats().completed, 50);
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(
            WorkerPool::new(0, "test"),
            Err(CourierError::Configuration(_))
        ));
    }

    #[test]
    fn test_submit_after_shutdown() {
        let pool = WorkerPool::new(1, "test").unwrap();
        pool.shutdown();
        assert!(pool.is_shut_down());

        let result = pool.submit(JobType::Wal, "late", Box::new(|| {}));
        assert!(matches!(result, Err(CourierError::JobQueueClosed)));
    }

    #[test]
    fn test_shutdown_drains_queued_work() {
        let pool = WorkerPool::new(1, "test").unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let hits = Arc::clone(&hits);
            pool.submit(
                JobType::Maintenance,
                "slow",
                Box::new(move || {
                    thread::sleep(Duration::from_millis(2));
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(1, "test").unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        pool.submit(JobType::Client, "boom", Box::new(|| panic!("job failure")))
            .unwrap();
        let after = Arc::clone(&hits);
        pool.submit(
            JobType::Client,
            "after",
            Box::new(move || {
                after.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        assert!(pool.wait_idle(Duration::from_secs(5)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let stats = pool.stats();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn test_wait_idle_times_out_on_long_job() {
        let pool = WorkerPool::new(1, "test").unwrap();
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);

        pool.submit(
            JobType::Client,
            "blocked",
            Box::new(move || {
                let _ = release_rx.recv();
            }),
        )
        .unwrap();

        assert!(!pool.wait_idle(Duration::from_millis(50)));
        release_tx.send(()).unwrap();
        assert!(pool.wait_idle(Duration::from_secs(5)));
    }
}
