//! Bounded, sequenced event buffer.

use crate::error::{CourierError, Result};
use crate::types::{QueuedEvent, SequenceNumber};
use std::collections::VecDeque;

/// Result of a [`SequencedMailbox::push`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushOutcome {
    /// Sequence number assigned to the pushed event.
    pub sequence: SequenceNumber,
    /// Event discarded to make room, if the mailbox was full.
    pub dropped: Option<SequenceNumber>,
}

/// Ordered buffer of undelivered events for one subscriber.
///
/// The mailbox has no lock of its own; its owner keeps it behind the same
/// lock as the delivery state so both change together.
///
/// When full, a push discards the most recently queued event rather than the
/// oldest. A burst collapses to its latest update while the backlog still
/// drains in order. The discarded event's sequence number is never reused, so
/// receivers see a gap.
#[derive(Debug)]
pub struct SequencedMailbox {
    queue: VecDeque<QueuedEvent>,
    next_seq: SequenceNumber,
    capacity: usize,
}

impl SequencedMailbox {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(CourierError::config("mailbox capacity must be at least 1"));
        }
        Ok(Self {
            queue: VecDeque::with_capacity(capacity),
            next_seq: SequenceNumber::FIRST,
            capacity,
        })
    }

    /// Queue a payload and return the sequence number it was given.
    pub fn push(&mut self, payload: serde_json::Value) -> PushOutcome {
        let dropped = if self.queue.len() >= self.capacity {
            self.queue.pop_back().map(|event| event.sequence)
        } else {
            None
        };

        let sequence = self.next_seq;
        self.next_seq = sequence.next();
        self.queue.push_back(QueuedEvent { sequence, payload });

        PushOutcome { sequence, dropped }
    }

    /// Remove and return the oldest queued event.
    pub fn pop_front(&mut self) -> Option<QueuedEvent> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sequence number the next push will receive.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.next_seq
    }

    /// Queued events, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedEvent> {
        self.queue.iter()
    }
}
