//! Database connections and WAL maintenance.
//!
//! - [`ConnectionDescriptor`] resolves a logical database name against the
//!   node configuration and opens a [`Session`].
//! - [`blob_to_bytes`] / [`bytes_to_blob`] move binary values in and out of
//!   backend large objects.
//! - [`Checkpointer`] hooks a session's write-ahead log and runs passive
//!   checkpoints on the job queue once the WAL grows past a threshold.
//!
//! # Example
//!
//! ```ignore
//! let session = Arc::new(db::open(&config, "ledger")?);
//! let checkpointer = Checkpointer::attach(&session, pool.clone(), config.checkpoint.page_threshold);
//!
//! session.with_connection(|conn| conn.execute_batch("INSERT INTO ..."))?;
//! // Drop the checkpointer before the session goes away
//! drop(checkpointer);
//! ```

mod blob;
mod checkpoint;
mod connection;

pub use blob::{blob_to_bytes, blob_to_string, bytes_to_blob, LargeObject};
pub use checkpoint::{
    make_checkpointer, CheckpointDebouncer, CheckpointState, CheckpointStats, CheckpointTarget,
    Checkpointer,
};
pub use connection::{open, open_with, Backend, ConnectionDescriptor, Session};

/// Result of a passive checkpoint, in WAL frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalFrames {
    /// Frames in the WAL when the checkpoint ran.
    pub frames_in_wal: i64,
    /// Frames copied back into the database file.
    pub frames_written: i64,
}
