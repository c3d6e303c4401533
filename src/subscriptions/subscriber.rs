//! A remote event listener and its single-flight delivery worker.

use super::mailbox::SequencedMailbox;
use super::types::DeliveryStats;
use crate::error::Result;
use crate::jobs::{JobQueue, JobType};
use crate::transport::{Credentials, Destination, EventSender};
use crate::types::{QueuedEvent, SequenceNumber};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Field injected into every outbound payload carrying its sequence number.
pub const SEQUENCE_FIELD: &str = "seq";

/// Method name used for outbound event requests.
pub const EVENT_KIND: &str = "event";

/// Whether a delivery job currently owns the mailbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    Idle,
    /// A job has been submitted and has not yet observed an empty mailbox.
    Draining,
}

struct SubscriberState {
    mailbox: SequencedMailbox,
    delivery: DeliveryState,
}

#[derive(Default)]
struct Counters {
    pushed: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// A registered listener with its own mailbox.
///
/// Shared as `Arc<Subscriber>`: a running delivery job holds its own
/// reference, so removing the subscriber from a registry never invalidates
/// state the job is still using.
pub struct Subscriber {
    destination: Destination,
    credentials: Option<Credentials>,
    state: Mutex<SubscriberState>,
    queue: Arc<dyn JobQueue>,
    sender: Arc<dyn EventSender>,
    counters: Counters,
}

impl Subscriber {
    pub fn new(
        destination: Destination,
        credentials: Option<Credentials>,
        capacity: usize,
        queue: Arc<dyn JobQueue>,
        sender: Arc<dyn EventSender>,
    ) -> Result<Arc<Self>> {
        let mailbox = SequencedMailbox::new(capacity)?;

        info!(
            host = %destination.host,
            port = destination.port,
            secure = destination.secure,
            path = %destination.path,
            capacity,
            "Subscriber created"
        );

        Ok(Arc::new(Self {
            destination,
            credentials,
            state: Mutex::new(SubscriberState {
                mailbox,
                delivery: DeliveryState::Idle,
            }),
            queue,
            sender,
            counters: Counters::default(),
        }))
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Queue an event and make sure a delivery job is draining the mailbox.
    ///
    /// Never blocks on delivery. `broadcast` only lowers the log level for
    /// events fanned out to every subscriber.
    pub fn push(self: &Arc<Self>, payload: Value, broadcast: bool) -> SequenceNumber {
        let (outcome, start) = {
            let mut state = self.state.lock();
            let outcome = state.mailbox.push(payload);
            let start = state.delivery == DeliveryState::Idle;
            if start {
                state.delivery = DeliveryState::Draining;
            }
            (outcome, start)
        };

        self.counters.pushed.fetch_add(1, Ordering::Relaxed);
        if let Some(dropped) = outcome.dropped {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(destination = %self.destination, dropped = %dropped, "Mailbox full, dropped newest event");
        }

        if broadcast {
            debug!(destination = %self.destination, seq = %outcome.sequence, "Event queued");
        } else {
            info!(destination = %self.destination, seq = %outcome.sequence, "Event queued");
        }

        if start {
            self.start_delivery();
        }

        outcome.sequence
    }

    /// Current delivery state.
    pub fn delivery_state(&self) -> DeliveryState {
        self.state.lock().delivery
    }

    pub fn is_draining(&self) -> bool {
        self.delivery_state() == DeliveryState::Draining
    }

    /// Events still waiting to be sent, oldest first.
    pub fn pending(&self) -> Vec<QueuedEvent> {
        self.state.lock().mailbox.iter().cloned().collect()
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            pushed: self.counters.pushed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Submit the delivery job. The caller has already moved the state to
    /// `Draining`.
    fn start_delivery(self: &Arc<Self>) {
        debug!(destination = %self.destination, "Starting delivery");

        let subscriber = Arc::clone(self);
        let submitted = self.queue.submit(
            JobType::Client,
            "subscriber-delivery",
            Box::new(move || subscriber.deliver()),
        );

        if let Err(e) = submitted {
            // No job exists to clear the flag; the next push retries.
            self.state.lock().delivery = DeliveryState::Idle;
            warn!(destination = %self.destination, error = %e, "Could not schedule delivery");
        }
    }

    /// Delivery job body: drain the mailbox in order, one send at a time.
    fn deliver(self: &Arc<Self>) {
        let _recover = RecoverDelivery { subscriber: self };
        loop {
            let event = {
                let mut state = self.state.lock();
                match state.mailbox.pop_front() {
                    Some(event) => event,
                    None => {
                        state.delivery = DeliveryState::Idle;
                        break;
                    }
                }
            };

            let sequence = event.sequence;
            let payload = with_sequence(event.payload, sequence);

            match self.sender.send_event(
                &self.destination,
                self.credentials.as_ref(),
                EVENT_KIND,
                &payload,
            ) {
                Ok(()) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    info!(destination = %self.destination, seq = %sequence, error = %e, "Event delivery failed");
                }
            }
        }

        debug!(destination = %self.destination, "Delivery idle");
    }

    /// Called when a delivery job unwinds. The event being sent is lost;
    /// anything still queued gets a fresh job so the mailbox cannot stall
    /// in `Draining`.
    fn recover_after_panic(self: &Arc<Self>) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);

        let restart = {
            let mut state = self.state.lock();
            if state.mailbox.is_empty() {
                state.delivery = DeliveryState::Idle;
                false
            } else {
                true
            }
        };

        error!(destination = %self.destination, restart, "Delivery job panicked");
        if restart {
            self.start_delivery();
        }
    }
}

struct RecoverDelivery<'a> {
    subscriber: &'a Arc<Subscriber>,
}

impl Drop for RecoverDelivery<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.subscriber.recover_after_panic();
        }
    }
}

/// Insert the sequence number into a payload. Non-object payloads are wrapped
/// as `{"value": payload}` first.
pub fn with_sequence(payload: Value, sequence: SequenceNumber) -> Value {
    let mut object = match payload {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    object.insert(SEQUENCE_FIELD.to_string(), Value::from(sequence.0));
    Value::Object(object)
}
