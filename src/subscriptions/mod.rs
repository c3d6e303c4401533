//! Event subscriptions pushed to remote HTTP(S) listeners.
//!
//! Each [`Subscriber`] owns a bounded [`SequencedMailbox`]. Producers push
//! events without ever blocking on the network:
//! - the event gets the next sequence number for that subscriber;
//! - if the mailbox is full the newest queued event is discarded;
//! - if no delivery job is running, exactly one is submitted to the job queue.
//!
//! The delivery job drains the mailbox oldest first, injecting `"seq"` into
//! each payload, and marks the subscriber idle in the same critical section in
//! which it finds the mailbox empty. A push racing with that check sees the
//! idle state and starts a new job, so no event is left behind.
//!
//! # Example
//!
//! ```ignore
//! let pool: Arc<dyn JobQueue> = Arc::new(WorkerPool::new(4, "jobs")?);
//! let registry = SubscriberRegistry::from_config(&config.rpc_sub, pool)?;
//!
//! let handle = registry.subscribe(
//!     SubscriberConfig::new("https://listener.example/events").with_credentials("user", "pass"),
//! )?;
//! registry.broadcast(&json!({"type": "ledgerClosed", "ledger_index": 42}));
//! ```

mod mailbox;
mod manager;
mod subscriber;
mod types;

pub use mailbox::{PushOutcome, SequencedMailbox};
pub use manager::SubscriberRegistry;
pub use subscriber::{with_sequence, DeliveryState, Subscriber, EVENT_KIND, SEQUENCE_FIELD};
pub use types::{DeliveryStats, SubscriberConfig, SubscriberHandle};
