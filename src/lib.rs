//! # Ledger Courier
//!
//! Background coordination for a ledger node: sequenced event delivery to
//! remote HTTP(S) subscribers, and debounced WAL checkpointing for the node's
//! SQLite databases.
//!
//! ## Core Concepts
//!
//! - **Mailboxes**: Bounded per-subscriber queues with monotonic sequence numbers
//! - **Single-flight delivery**: At most one job drains a subscriber at a time
//! - **Checkpoint debouncing**: At most one WAL checkpoint in flight per connection
//! - **Job queue**: Worker threads that run all of the above off the caller's thread
//!
//! ## Example
//!
//! ```ignore
//! use ledger_courier::{db, Checkpointer, JobQueue, NodeConfig, SubscriberConfig,
//!     SubscriberRegistry, WorkerPool};
//!
//! let config = NodeConfig::load("node.toml")?;
//! let pool: Arc<dyn JobQueue> = Arc::new(WorkerPool::new(config.job_queue.threads, "jobs")?);
//!
//! // Push events to a remote listener
//! let registry = SubscriberRegistry::from_config(&config.rpc_sub, pool.clone())?;
//! let handle = registry.subscribe(SubscriberConfig::new("https://listener.example/events"))?;
//! handle.push(json!({"type": "ledgerClosed", "ledger_index": 42}));
//!
//! // Checkpoint the ledger database in the background
//! let session = Arc::new(db::open(&config, "ledger")?);
//! let checkpointer = Checkpointer::attach(&session, pool, config.checkpoint.page_threshold);
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod subscriptions;
pub mod transport;
pub mod types;

// Re-exports
pub use config::NodeConfig;
pub use db::{
    make_checkpointer, Backend, CheckpointDebouncer, CheckpointState, CheckpointTarget,
    Checkpointer, ConnectionDescriptor, Session, WalFrames,
};
pub use error::{CheckpointError, CourierError, Result, TransportError};
pub use jobs::{Job, JobQueue, JobType, PoolStats, WorkerPool};
pub use subscriptions::{
    DeliveryState, DeliveryStats, SequencedMailbox, Subscriber, SubscriberConfig,
    SubscriberHandle, SubscriberRegistry,
};
pub use transport::{Credentials, Destination, EventSender, HttpEventSender};
pub use types::*;
