//! Registry of active subscribers.

use super::subscriber::Subscriber;
use super::types::{SubscriberConfig, SubscriberHandle};
use crate::config::RpcSubConfig;
use crate::error::Result;
use crate::jobs::JobQueue;
use crate::transport::{Destination, EventSender, HttpEventSender};
use crate::types::{SequenceNumber, SubscriberId};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Tracks subscribers by id and fans events out to them.
///
/// Each subscriber has its own lock; the registry lock only guards the map,
/// so a slow listener never holds up pushes to the others.
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<SubscriberId, Arc<Subscriber>>>,
    next_id: AtomicU64,
    queue: Arc<dyn JobQueue>,
    sender: Arc<dyn EventSender>,
    default_capacity: usize,
}

impl SubscriberRegistry {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        sender: Arc<dyn EventSender>,
        default_capacity: usize,
    ) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue,
            sender,
            default_capacity,
        }
    }

    /// Registry posting over HTTP(S) with settings from `[rpc_sub]`.
    pub fn from_config(config: &RpcSubConfig, queue: Arc<dyn JobQueue>) -> Result<Self> {
        let sender = Arc::new(HttpEventSender::new(config)?);
        Ok(Self::new(queue, sender, config.queue_capacity))
    }

    /// Register a new subscriber. Fails if the URL is malformed, uses a
    /// scheme other than http/https, or the capacity is zero.
    pub fn subscribe(&self, config: SubscriberConfig) -> Result<SubscriberHandle> {
        let destination = Destination::parse(&config.url)?;
        let capacity = config.queue_capacity.unwrap_or(self.default_capacity);

        let subscriber = Subscriber::new(
            destination,
            config.credentials,
            capacity,
            Arc::clone(&self.queue),
            Arc::clone(&self.sender),
        )?;

        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers
            .write()
            .insert(id, Arc::clone(&subscriber));

        info!(id = %id, url = %config.url, "Subscriber registered");
        Ok(SubscriberHandle { id, subscriber })
    }

    /// Remove a subscriber. A delivery job already running keeps its own
    /// reference and finishes draining.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            info!(id = %id, "Subscriber removed");
        }
        removed
    }

    pub fn get(&self, id: SubscriberId) -> Option<Arc<Subscriber>> {
        self.subscribers.read().get(&id).cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Queue an event for one subscriber. Returns `None` if it is not registered.
    pub fn push(&self, id: SubscriberId, payload: Value) -> Option<SequenceNumber> {
        let subscriber = self.get(id)?;
        Some(subscriber.push(payload, false))
    }

    /// Queue an event for every subscriber. Returns how many received it.
    pub fn broadcast(&self, payload: &Value) -> usize {
        // Snapshot so pushes don't run under the registry lock
        let targets: Vec<_> = self.subscribers.read().values().cloned().collect();

        for subscriber in &targets {
            subscriber.push(payload.clone(), true);
        }

        debug!(subscribers = targets.len(), "Event broadcast");
        targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CourierError, TransportError};
    use crate::jobs::{Job, JobType};
    use crate::transport::Credentials;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct ManualQueue {
        jobs: Mutex<Vec<Job>>,
    }

    impl ManualQueue {
        fn run_all(&self) {
            let jobs: Vec<_> = self.jobs.lock().drain(..).collect();
            for job in jobs {
                job();
            }
        }
    }

    impl JobQueue for ManualQueue {
        fn submit(&self, _job_type: JobType, _label: &str, work: Job) -> Result<()> {
            self.jobs.lock().push(work);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, Value)>>,
    }

    impl EventSender for RecordingSender {
        fn send_event(
            &self,
            destination: &Destination,
            _credentials: Option<&Credentials>,
            _kind: &str,
            payload: &Value,
        ) -> std::result::Result<(), TransportError> {
            self.sent.lock().push((destination.url(), payload.clone()));
            Ok(())
        }
    }

    fn registry() -> (SubscriberRegistry, Arc<ManualQueue>, Arc<RecordingSender>) {
        let queue = Arc::new(ManualQueue::default());
        let sender = Arc::new(RecordingSender::default());
        let registry = SubscriberRegistry::new(queue.clone(), sender.clone(), 4);
        (registry, queue, sender)
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let (registry, _, _) = registry();

        let handle = registry
            .subscribe(SubscriberConfig::new("http://127.0.0.1:6000/a"))
            .unwrap();
        assert_eq!(registry.subscriber_count(), 1);
        assert_eq!(handle.subscriber.destination().port, 6000);

        assert!(registry.unsubscribe(handle.id));
        assert!(!registry.unsubscribe(handle.id));
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribe_rejects_bad_url() {
        let (registry, _, _) = registry();

        let result = registry.subscribe(SubscriberConfig::new("ftp://127.0.0.1/a"));
        assert!(matches!(result, Err(CourierError::Configuration(_))));
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn test_default_and_explicit_capacity() {
        let (registry, _, _) = registry();

        let a = registry
            .subscribe(SubscriberConfig::new("http://127.0.0.1/a"))
            .unwrap();
        let b = registry
            .subscribe(SubscriberConfig::new("http://127.0.0.1/b").with_capacity(1))
            .unwrap();

        for n in 0..6 {
            a.push(json!({"n": n}));
            b.push(json!({"n": n}));
        }
        assert_eq!(a.subscriber.pending().len(), 4);
        assert_eq!(b.subscriber.pending().len(), 1);
    }

    #[test]
    fn test_broadcast_reaches_every_subscriber() {
        let (registry, queue, sender) = registry();

        registry
            .subscribe(SubscriberConfig::new("http://127.0.0.1/a"))
            .unwrap();
        registry
            .subscribe(SubscriberConfig::new("https://127.0.0.1/b").with_credentials("u", "p"))
            .unwrap();

        assert_eq!(registry.broadcast(&json!({"type": "ledgerClosed"})), 2);
        queue.run_all();

        let mut urls: Vec<_> = sender.sent.lock().iter().map(|(u, _)| u.clone()).collect();
        urls.sort();
        assert_eq!(
            urls,
            vec!["http://127.0.0.1:80/a".to_string(), "https://127.0.0.1:443/b".to_string()]
        );
    }

    #[test]
    fn test_push_unknown_subscriber() {
        let (registry, _, _) = registry();
        assert!(registry.push(SubscriberId(99), json!({})).is_none());
    }

    #[test]
    fn test_unsubscribe_with_pending_job() {
        let (registry, queue, sender) = registry();

        let handle = registry
            .subscribe(SubscriberConfig::new("http://127.0.0.1/a"))
            .unwrap();
        let id = handle.id;
        assert_eq!(registry.push(id, json!({"n": 1})), Some(SequenceNumber(1)));
        drop(handle);

        // Job still holds the subscriber after removal
        assert!(registry.unsubscribe(id));
        queue.run_all();

        assert_eq!(sender.sent.lock().len(), 1);
    }
}
