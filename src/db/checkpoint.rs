//! Debounced background WAL checkpoints.
//!
//! SQLite calls the WAL hook on the writing thread after every commit, with
//! the current WAL size in pages. The hook must return quickly, so it only
//! inspects the debouncer state and, at most once per episode, submits a
//! checkpoint job:
//!
//! ```text
//!            pages >= threshold
//!   Idle ───────────────────────▶ Scheduled ──┐ any hook call: no-op
//!    ▲                                │  ◀────┘
//!    └────── checkpoint job done ─────┘
//!            (success or failure)
//! ```

use super::connection::Session;
use super::WalFrames;
use crate::config::DEFAULT_CHECKPOINT_PAGES;
use crate::error::CheckpointError;
use crate::jobs::{JobQueue, JobType};
use parking_lot::Mutex;
use rusqlite::ffi;
use std::ffi::{c_char, c_int, c_void};
use std::mem::ManuallyDrop;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, trace, warn};

/// Something whose WAL can be checkpointed without blocking writers.
pub trait CheckpointTarget: Send + Sync {
    fn checkpoint_passive(&self) -> Result<WalFrames, CheckpointError>;

    /// Name used in log lines.
    fn describe(&self) -> String;
}

impl CheckpointTarget for Session {
    fn checkpoint_passive(&self) -> Result<WalFrames, CheckpointError> {
        Session::checkpoint_passive(self)
    }

    fn describe(&self) -> String {
        self.path().to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointState {
    Idle,
    /// A checkpoint job has been submitted and has not finished.
    Scheduled,
}

/// Counters for one connection's checkpoints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckpointStats {
    pub scheduled: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Per-connection debounce state driven by WAL growth.
pub struct CheckpointDebouncer {
    state: Mutex<CheckpointState>,
    threshold: u32,
    queue: Arc<dyn JobQueue>,
    target: Arc<dyn CheckpointTarget>,
    counters: Counters,
}

impl CheckpointDebouncer {
    pub fn new(
        target: Arc<dyn CheckpointTarget>,
        queue: Arc<dyn JobQueue>,
        threshold: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CheckpointState::Idle),
            threshold,
            queue,
            target,
            counters: Counters::default(),
        })
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn state(&self) -> CheckpointState {
        *self.state.lock()
    }

    pub fn stats(&self) -> CheckpointStats {
        CheckpointStats {
            scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Called after a commit with the WAL size in pages. Returns true if a
    /// checkpoint job was submitted.
    ///
    /// Never blocks on I/O: at most a short lock and a queue submission.
    pub fn on_wal_commit(self: &Arc<Self>, pages: u32) -> bool {
        if pages < self.threshold {
            return false;
        }

        {
            let mut state = self.state.lock();
            if *state == CheckpointState::Scheduled {
                return false;
            }
            *state = CheckpointState::Scheduled;
        }

        let debouncer = Arc::clone(self);
        let submitted = self.queue.submit(
            JobType::Wal,
            "wal-checkpoint",
            Box::new(move || {
                // Outcome is logged inside
                let _ = debouncer.run_checkpoint();
            }),
        );

        match submitted {
            Ok(()) => {
                self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
                trace!(pages, "WAL checkpoint scheduled");
                true
            }
            Err(e) => {
                *self.state.lock() = CheckpointState::Idle;
                warn!(pages, error = %e, "Could not schedule WAL checkpoint");
                false
            }
        }
    }

    /// Checkpoint job body. Runs the passive checkpoint, logs the outcome and
    /// returns the debouncer to `Idle` whatever happened, including a panic
    /// in the target.
    pub fn run_checkpoint(&self) -> Result<WalFrames, CheckpointError> {
        let _finish = FinishCheckpoint { debouncer: self };
        let result = self.target.checkpoint_passive();

        match &result {
            Ok(frames) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                trace!(
                    db = %self.target.describe(),
                    frames = frames.frames_in_wal,
                    written = frames.frames_written,
                    "WAL checkpointed"
                );
            }
            Err(e) if e.is_transient() => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                trace!(db = %self.target.describe(), error = %e, "WAL checkpoint deferred");
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(db = %self.target.describe(), error = %e, "WAL checkpoint failed");
            }
        }

        result
    }
}

/// Ends a checkpoint episode when dropped, so unwinding out of the target
/// cannot leave the debouncer `Scheduled`.
struct FinishCheckpoint<'a> {
    debouncer: &'a CheckpointDebouncer,
}

impl Drop for FinishCheckpoint<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.debouncer.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        *self.debouncer.state.lock() = CheckpointState::Idle;
    }
}

/// Keeps a connection's WAL hook pointed at a debouncer.
///
/// Dropping the checkpointer detaches the hook before the debouncer can be
/// released. Jobs already submitted hold their own references and finish
/// normally.
pub struct Checkpointer {
    session: Arc<Session>,
    debouncer: Arc<CheckpointDebouncer>,
}

impl Checkpointer {
    /// Install the WAL hook on `session`. `None` if the session has no open
    /// native connection or another checkpointer is already attached to it.
    pub fn attach(
        session: &Arc<Session>,
        queue: Arc<dyn JobQueue>,
        threshold: u32,
    ) -> Option<Self> {
        let target: Arc<dyn CheckpointTarget> = session.clone();
        let debouncer = CheckpointDebouncer::new(target, queue, threshold);
        let context = Arc::as_ptr(&debouncer) as *mut c_void;

        let installed = session.with_raw_handle(|db| {
            if !session.claim_wal_hook() {
                return false;
            }
            // SAFETY: `db` is live while the session lock is held. `context`
            // stays valid until Drop clears the hook, because `self` keeps a
            // strong reference to the debouncer until then.
            unsafe {
                ffi::sqlite3_wal_hook(db, Some(wal_hook), context);
            }
            true
        })?;

        if !installed {
            warn!(db = %session.path(), "WAL checkpointer already attached");
            return None;
        }

        debug!(db = %session.path(), threshold, "WAL checkpointer attached");
        Some(Self {
            session: Arc::clone(session),
            debouncer,
        })
    }

    pub fn debouncer(&self) -> &Arc<CheckpointDebouncer> {
        &self.debouncer
    }

    pub fn state(&self) -> CheckpointState {
        self.debouncer.state()
    }

    pub fn stats(&self) -> CheckpointStats {
        self.debouncer.stats()
    }
}

impl Drop for Checkpointer {
    fn drop(&mut self) {
        // The hook only fires while a writer holds the session lock, so
        // clearing it under that lock means no call can be in progress.
        self.session.with_raw_handle(|db| {
            // SAFETY: `db` is live while the session lock is held.
            unsafe {
                ffi::sqlite3_wal_hook(db, None, std::ptr::null_mut());
            }
        });
        self.session.release_wal_hook();
        debug!(db = %self.session.path(), "WAL checkpointer detached");
    }
}

/// Attach a checkpointer with the default page threshold. `None` under the
/// same conditions as [`Checkpointer::attach`].
pub fn make_checkpointer(session: &Arc<Session>, queue: Arc<dyn JobQueue>) -> Option<Checkpointer> {
    Checkpointer::attach(session, queue, DEFAULT_CHECKPOINT_PAGES)
}

/// WAL hook registered with SQLite. Runs on the committing thread.
unsafe extern "C" fn wal_hook(
    context: *mut c_void,
    _db: *mut ffi::sqlite3,
    _db_name: *const c_char,
    pages: c_int,
) -> c_int {
    if context.is_null() {
        return ffi::SQLITE_OK;
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: `context` came from `Arc::as_ptr` in `Checkpointer::attach`
        // and the checkpointer holds a strong reference until it clears this
        // hook. ManuallyDrop leaves the reference count untouched.
        let debouncer = ManuallyDrop::new(unsafe {
            Arc::from_raw(context as *const CheckpointDebouncer)
        });
        debouncer.on_wal_commit(pages.max(0) as u32);
    }));

    if outcome.is_err() {
        error!("WAL hook panicked");
    }
    ffi::SQLITE_OK
}
