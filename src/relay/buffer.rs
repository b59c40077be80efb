//! Bounded relay buffer between an asynchronous producer and a polling
//! consumer.
//!
//! Capacity `C >= 1` is a ring of `C + 1` slots: `head == tail` means empty,
//! and a push that makes `head` catch `tail` discards the oldest element and
//! counts an overflow. Capacity 0 keeps only the latest value plus a count of
//! pushes not yet consumed.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::{Alarm, IoStatus};

/// A value with the metadata it was produced with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub value: T,
    pub timestamp: DateTime<Utc>,
    pub status: IoStatus,
    pub alarm: Alarm,
}

impl<T> Snapshot<T> {
    /// Successful, alarm-free value stamped now.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
            status: IoStatus::Success,
            alarm: Alarm::NONE,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: IoStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_alarm(mut self, alarm: Alarm) -> Self {
        self.alarm = alarm;
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// What a push did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored without loss; the consumer should be told.
    Queued,
    /// Stored by discarding or superseding an unconsumed value. A
    /// notification for that value is already outstanding.
    Overwrote,
}

#[derive(Debug)]
enum Storage<T> {
    Latest {
        value: Option<Snapshot<T>>,
        pending: u64,
    },
    Ring {
        slots: Vec<Option<Snapshot<T>>>,
        head: usize,
        tail: usize,
    },
}

#[derive(Debug)]
struct Inner<T> {
    storage: Storage<T>,
    overflows: u64,
}

/// Bounded FIFO of snapshots, safe for many producers and one consumer.
#[derive(Debug)]
pub struct RelayBuffer<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
}

impl<T> RelayBuffer<T> {
    /// Creates a buffer holding up to `capacity` values, or a single
    /// latest-wins value when `capacity` is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let storage = if capacity == 0 {
            Storage::Latest {
                value: None,
                pending: 0,
            }
        } else {
            Storage::Ring {
                slots: (0..=capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
            }
        };
        Self {
            capacity,
            inner: Mutex::new(Inner { storage, overflows: 0 }),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        // State is indices and counters; it stays consistent across a panic.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Stores a snapshot. Never blocks beyond the internal lock and never
    /// fails; loss is counted instead.
    pub fn push(&self, snapshot: Snapshot<T>) -> PushOutcome {
        let mut guard = self.lock();
        let inner = &mut *guard;
        match &mut inner.storage {
            Storage::Latest { value, pending } => {
                *value = Some(snapshot);
                *pending += 1;
                if *pending > 1 {
                    PushOutcome::Overwrote
                } else {
                    PushOutcome::Queued
                }
            }
            Storage::Ring { slots, head, tail } => {
                let len = slots.len();
                slots[*head] = Some(snapshot);
                *head = (*head + 1) % len;
                if *head == *tail {
                    slots[*tail] = None;
                    *tail = (*tail + 1) % len;
                    inner.overflows += 1;
                    PushOutcome::Overwrote
                } else {
                    PushOutcome::Queued
                }
            }
        }
    }

    /// Removes the oldest snapshot (latest one in capacity-0 mode).
    ///
    /// In capacity-0 mode, pushes superseded before this pop are moved into
    /// the overflow count.
    pub fn pop(&self) -> Option<Snapshot<T>> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        match &mut inner.storage {
            Storage::Latest { value, pending } => {
                let snapshot = value.take()?;
                let superseded = pending.saturating_sub(1);
                *pending = 0;
                inner.overflows += superseded;
                Some(snapshot)
            }
            Storage::Ring { slots, head, tail } => {
                if *head == *tail {
                    return None;
                }
                let snapshot = slots[*tail].take();
                *tail = (*tail + 1) % slots.len();
                snapshot
            }
        }
    }

    /// Number of values waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.lock();
        match &inner.storage {
            Storage::Latest { value, .. } => usize::from(value.is_some()),
            Storage::Ring { slots, head, tail } => (head + slots.len() - tail) % slots.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values lost since the last `take_overflows`.
    #[must_use]
    pub fn overflows(&self) -> u64 {
        self.lock().overflows
    }

    /// Returns the overflow count and resets it.
    pub fn take_overflows(&self) -> u64 {
        std::mem::take(&mut self.lock().overflows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(buf: &RelayBuffer<i32>) -> Vec<i32> {
        std::iter::from_fn(|| buf.pop()).map(|s| s.value).collect()
    }

    #[test]
    fn capacity_two_keeps_two_most_recent() {
        let buf = RelayBuffer::new(2);
        let outcomes: Vec<_> = (1..=4).map(|v| buf.push(Snapshot::new(v))).collect();
        assert_eq!(
            outcomes,
            vec![PushOutcome::Queued, PushOutcome::Queued, PushOutcome::Overwrote, PushOutcome::Overwrote]
        );
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.overflows(), 2);
        assert_eq!(values(&buf), vec![3, 4]);
        assert!(buf.is_empty());
    }

    #[test]
    fn ring_wraps_without_loss_when_drained() {
        let buf = RelayBuffer::new(3);
        for round in 0..5 {
            buf.push(Snapshot::new(round * 2));
            buf.push(Snapshot::new(round * 2 + 1));
            assert_eq!(values(&buf), vec![round * 2, round * 2 + 1]);
        }
        assert_eq!(buf.take_overflows(), 0);
    }

    #[test]
    fn take_overflows_resets() {
        let buf = RelayBuffer::new(1);
        buf.push(Snapshot::new(1));
        buf.push(Snapshot::new(2));
        buf.push(Snapshot::new(3));
        assert_eq!(buf.take_overflows(), 2);
        assert_eq!(buf.take_overflows(), 0);
        assert_eq!(values(&buf), vec![3]);
    }

    #[test]
    fn latest_wins_counts_superseded_pushes() {
        let buf = RelayBuffer::new(0);
        assert_eq!(buf.push(Snapshot::new(1)), PushOutcome::Queued);
        assert_eq!(buf.push(Snapshot::new(2)), PushOutcome::Overwrote);
        assert_eq!(buf.push(Snapshot::new(3)), PushOutcome::Overwrote);
        assert_eq!(buf.len(), 1);

        assert_eq!(buf.pop().map(|s| s.value), Some(3));
        assert_eq!(buf.take_overflows(), 2);
        assert!(buf.pop().is_none());

        assert_eq!(buf.push(Snapshot::new(4)), PushOutcome::Queued);
        assert_eq!(buf.pop().map(|s| s.value), Some(4));
        assert_eq!(buf.overflows(), 0);
    }

    #[test]
    fn snapshot_carries_metadata() {
        let buf = RelayBuffer::new(1);
        let alarm = Alarm::new(2, crate::value::AlarmSeverity::Major);
        buf.push(Snapshot::new(7.5).with_status(IoStatus::Timeout).with_alarm(alarm));
        let s = buf.pop().unwrap();
        assert_eq!(s.status, IoStatus::Timeout);
        assert_eq!(s.alarm, alarm);
    }
}
