//! Subscription types.

use super::subscriber::Subscriber;
use crate::transport::Credentials;
use crate::types::{SequenceNumber, SubscriberId};
use serde_json::Value;
use std::sync::Arc;

/// Registration request for a new subscriber.
#[derive(Clone, Debug, Default)]
pub struct SubscriberConfig {
    /// `http://` or `https://` URL events are posted to.
    pub url: String,

    /// Basic-auth credentials (None = anonymous).
    pub credentials: Option<Credentials>,

    /// Mailbox capacity (None = registry default).
    pub queue_capacity: Option<usize>,
}

impl SubscriberConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Credentials::from_parts(username, password);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }
}

/// Counters for one subscriber since registration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Events queued.
    pub pushed: u64,
    /// Events discarded because the mailbox was full.
    pub dropped: u64,
    /// Events the listener accepted.
    pub delivered: u64,
    /// Events whose send failed (not retried).
    pub failed: u64,
}

/// Handle returned by registration.
#[derive(Clone)]
pub struct SubscriberHandle {
    pub id: SubscriberId,
    pub subscriber: Arc<Subscriber>,
}

impl SubscriberHandle {
    /// Queue an event for this subscriber.
    pub fn push(&self, payload: Value) -> SequenceNumber {
        self.subscriber.push(payload, false)
    }

    pub fn stats(&self) -> DeliveryStats {
        self.subscriber.stats()
    }
}
