//! Delivery tests against a real worker pool.

use ledger_courier::{
    Credentials, DeliveryState, Destination, EventSender, JobQueue, SubscriberConfig,
    SubscriberRegistry, TransportError, WorkerPool,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Records deliveries per destination and the peak number of concurrent
/// sends seen for any single destination.
#[derive(Default)]
struct TrackingSender {
    delivered: Mutex<HashMap<String, Vec<u64>>>,
    in_flight: Mutex<HashMap<String, usize>>,
    peak: AtomicUsize,
    delay: Duration,
}

impl EventSender for TrackingSender {
    fn send_event(
        &self,
        destination: &Destination,
        _credentials: Option<&Credentials>,
        _kind: &str,
        payload: &Value,
    ) -> Result<(), TransportError> {
        let key = destination.url();
        {
            let mut in_flight = self.in_flight.lock();
            let count = in_flight.entry(key.clone()).or_insert(0);
            *count += 1;
            self.peak.fetch_max(*count, Ordering::SeqCst);
        }

        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let seq = payload["seq"].as_u64().expect("seq injected");
        self.delivered.lock().entry(key.clone()).or_default().push(seq);

        *self.in_flight.lock().get_mut(&key).unwrap() -= 1;
        Ok(())
    }
}

fn setup(
    threads: usize,
    delay: Duration,
    capacity: usize,
) -> (Arc<WorkerPool>, Arc<TrackingSender>, SubscriberRegistry) {
    let pool = Arc::new(WorkerPool::new(threads, "delivery-test").unwrap());
    let sender = Arc::new(TrackingSender {
        delay,
        ..Default::default()
    });
    let queue: Arc<dyn JobQueue> = pool.clone();
    let registry = SubscriberRegistry::new(queue, sender.clone(), capacity);
    (pool, sender, registry)
}

#[test]
fn test_concurrent_producers_single_worker_per_subscriber() {
    let (pool, sender, registry) = setup(8, Duration::from_micros(200), 10_000);
    let registry = Arc::new(registry);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            registry
                .subscribe(SubscriberConfig::new(format!("http://127.0.0.1:{}/sub", 7000 + i)))
                .unwrap()
        })
        .collect();

    let producers: Vec<_> = (0..6)
        .map(|p| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for n in 0..200 {
                    registry.broadcast(&json!({"producer": p, "n": n}));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert!(pool.wait_idle(Duration::from_secs(30)));

    assert_eq!(sender.peak.load(Ordering::SeqCst), 1);

    let delivered = sender.delivered.lock();
    for handle in &handles {
        let seqs = &delivered[&handle.subscriber.destination().url()];
        assert_eq!(seqs.len(), 1200);
        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "out of order delivery");
        assert_eq!(handle.subscriber.delivery_state(), DeliveryState::Idle);
        assert!(handle.subscriber.pending().is_empty());
    }
}

#[test]
fn test_overload_drops_but_keeps_order() {
    let (pool, sender, registry) = setup(2, Duration::from_millis(1), 4);

    let handle = registry
        .subscribe(SubscriberConfig::new("http://127.0.0.1:7100/slow"))
        .unwrap();

    for n in 0..100 {
        handle.push(json!({"n": n}));
    }
    assert!(pool.wait_idle(Duration::from_secs(30)));

    let delivered = sender.delivered.lock();
    let seqs = &delivered[&handle.subscriber.destination().url()];
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    // The last push is never the one discarded
    assert_eq!(*seqs.last().unwrap(), 100);

    let stats = handle.stats();
    assert_eq!(stats.pushed, 100);
    assert_eq!(stats.delivered + stats.dropped, 100);
    assert_eq!(stats.delivered as usize, seqs.len());
}

#[test]
fn test_unsubscribe_mid_delivery() {
    let (pool, sender, registry) = setup(2, Duration::from_millis(2), 64);

    let handle = registry
        .subscribe(SubscriberConfig::new("http://127.0.0.1:7200/gone"))
        .unwrap();
    let url = handle.subscriber.destination().url();
    let id = handle.id;
    for n in 0..20 {
        registry.push(id, json!({"n": n}));
    }

    assert!(registry.unsubscribe(id));
    drop(handle);
    assert!(registry.push(id, json!({"late": true})).is_none());

    assert!(pool.wait_idle(Duration::from_secs(30)));
    assert_eq!(sender.delivered.lock()[&url].len(), 20);
}

#[test]
fn test_push_after_pool_shutdown_is_not_lost_from_mailbox() {
    let (pool, _sender, registry) = setup(1, Duration::ZERO, 8);

    let handle = registry
        .subscribe(SubscriberConfig::new("http://127.0.0.1:7300/x"))
        .unwrap();
    pool.shutdown();

    handle.push(json!({"n": 1}));
    assert_eq!(handle.subscriber.delivery_state(), DeliveryState::Idle);
    assert_eq!(handle.subscriber.pending().len(), 1);
}

/// Panics on its first send, records the rest.
#[derive(Default)]
struct FlakySender {
    calls: AtomicUsize,
    delivered: Mutex<Vec<u64>>,
}

impl EventSender for FlakySender {
    fn send_event(
        &self,
        _destination: &Destination,
        _credentials: Option<&Credentials>,
        _kind: &str,
        payload: &Value,
    ) -> Result<(), TransportError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("sender failure");
        }
        self.delivered.lock().push(payload["seq"].as_u64().expect("seq injected"));
        Ok(())
    }
}

#[test]
fn test_panicking_sender_does_not_stall_delivery() {
    let pool = Arc::new(WorkerPool::new(2, "delivery-test").unwrap());
    let sender = Arc::new(FlakySender::default());
    let registry = SubscriberRegistry::new(pool.clone(), sender.clone(), 16);

    let handle = registry
        .subscribe(SubscriberConfig::new("http://127.0.0.1:7400/flaky"))
        .unwrap();
    for n in 0..3 {
        handle.push(json!({"n": n}));
    }
    assert!(pool.wait_idle(Duration::from_secs(30)));

    // Later pushes still reach the sender
    handle.push(json!({"n": 3}));
    assert!(pool.wait_idle(Duration::from_secs(30)));

    assert_eq!(*sender.delivered.lock(), vec![2, 3, 4]);
    assert_eq!(handle.subscriber.delivery_state(), DeliveryState::Idle);
    assert!(handle.subscriber.pending().is_empty());
    assert_eq!(pool.stats().panicked, 1);
}
