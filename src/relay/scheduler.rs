//! Deferred-completion handshake between an asynchronous producer and a
//! consumer that must never be re-entered.
//!
//! ```text
//!            poll, buffer empty                 complete_request
//!   Idle ─────────────────────────▶ RequestPending ───────────────▶ Completing
//!    ▲  ╲                                                            │
//!    │   ╲ begin_completion                                          │
//!    │    ╲──────────────────────────────────────────────────────▶ │
//!    └─────────────────────── Completion dropped ◀───────────────────┘
//! ```
//!
//! A push while `Idle` asks the external scheduler to re-invoke the consumer.
//! A push while a request is outstanding or a completion is running only
//! bumps the deferred counter. When a completion ends, one unit of deferred
//! count is spent on one more consumer invocation. External calls are
//! always made outside the scheduler lock.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{CacheResult, RelayError};
use crate::transport::{ProcessTrigger, RequestQueue};

use super::buffer::{PushOutcome, RelayBuffer, Snapshot};

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Name used in log fields.
    pub name: String,
    /// Values held before the oldest is dropped; 0 keeps only the latest.
    pub capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            name: "relay".to_string(),
            capacity: 10,
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
        }
    }

    /// Parses a JSON object; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// `PortError::InvalidConfig` on malformed JSON.
    pub fn from_json(json: &str) -> CacheResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::error::PortError::InvalidConfig {
                reason: format!("invalid relay config: {e}"),
            }
            .into()
        })
    }
}

/// Handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No request outstanding and no completion running.
    Idle,
    /// An asynchronous request was submitted and has not completed.
    RequestPending,
    /// The consumer's completion routine is running.
    Completing,
}

/// Result of a consumer poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// A buffered value was available.
    Ready(Snapshot<T>),
    /// The buffer was empty; a request was submitted.
    Requested,
    /// A request is already outstanding.
    Pending,
    /// A completion is running; this invocation must do nothing.
    Busy,
}

#[derive(Debug)]
struct Control {
    state: SchedulerState,
    deferred: u32,
    request_failed: bool,
}

/// Relay buffer plus the Idle / RequestPending / Completing state machine.
pub struct CompletionScheduler<T> {
    name: String,
    buffer: RelayBuffer<T>,
    control: Mutex<Control>,
    queue: Arc<dyn RequestQueue>,
    trigger: Arc<dyn ProcessTrigger>,
}

impl<T> fmt::Debug for CompletionScheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let control = self.control();
        f.debug_struct("CompletionScheduler")
            .field("name", &self.name)
            .field("capacity", &self.buffer.capacity())
            .field("state", &control.state)
            .field("deferred", &control.deferred)
            .finish_non_exhaustive()
    }
}

impl<T> CompletionScheduler<T> {
    #[must_use]
    pub fn new(config: RelayConfig, queue: Arc<dyn RequestQueue>, trigger: Arc<dyn ProcessTrigger>) -> Self {
        Self {
            buffer: RelayBuffer::new(config.capacity),
            name: config.name,
            control: Mutex::new(Control {
                state: SchedulerState::Idle,
                deferred: 0,
                request_failed: false,
            }),
            queue,
            trigger,
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.control().state
    }

    /// Pushes that arrived while the consumer was busy and have not yet been
    /// turned into invocations.
    #[must_use]
    pub fn deferred(&self) -> u32 {
        self.control().deferred
    }

    #[must_use]
    pub fn buffer(&self) -> &RelayBuffer<T> {
        &self.buffer
    }

    /// Producer side: callable from any thread at any time.
    pub fn push(&self, snapshot: Snapshot<T>) -> PushOutcome {
        let trigger = {
            let mut control = self.control();
            let outcome = self.buffer.push(snapshot);
            if outcome == PushOutcome::Overwrote {
                return outcome;
            }
            match control.state {
                SchedulerState::Idle => true,
                SchedulerState::RequestPending | SchedulerState::Completing => {
                    control.deferred = control.deferred.saturating_add(1);
                    false
                }
            }
        };
        if trigger {
            self.trigger.request_process();
        }
        PushOutcome::Queued
    }

    /// Consumer entry point.
    ///
    /// Returns a buffered value if there is one. Otherwise submits one
    /// asynchronous request and moves to `RequestPending`; the transport
    /// later calls [`complete_request`](Self::complete_request).
    ///
    /// # Errors
    ///
    /// `RelayError::QueueRequest` if submission failed; the state returns to
    /// `Idle`.
    pub fn poll(&self) -> Result<PollOutcome<T>, RelayError> {
        {
            let mut control = self.control();
            match control.state {
                SchedulerState::Completing => return Ok(PollOutcome::Busy),
                SchedulerState::RequestPending => return Ok(PollOutcome::Pending),
                SchedulerState::Idle => {}
            }
            if let Some(snapshot) = self.pop_reported() {
                let wake = Self::spend_deferred(&mut control);
                drop(control);
                if wake {
                    self.trigger.request_process();
                }
                return Ok(PollOutcome::Ready(snapshot));
            }
            control.state = SchedulerState::RequestPending;
        }

        let result = self.queue.queue_request();

        let mut control = self.control();
        match result {
            Ok(()) => {
                if control.request_failed {
                    control.request_failed = false;
                    warn!(relay = %self.name, "request submission recovered");
                }
                Ok(PollOutcome::Requested)
            }
            Err(err) => {
                if control.state == SchedulerState::RequestPending {
                    control.state = SchedulerState::Idle;
                }
                if !control.request_failed {
                    control.request_failed = true;
                    error!(relay = %self.name, error = %err, "request submission failed");
                }
                Err(err)
            }
        }
    }

    /// Transport side: the outstanding request finished with `result`.
    ///
    /// # Errors
    ///
    /// `RelayError::NoRequestPending` unless in `RequestPending`.
    pub fn complete_request(&self, result: Snapshot<T>) -> Result<Completion<'_, T>, RelayError> {
        let mut control = self.control();
        if control.state != SchedulerState::RequestPending {
            return Err(RelayError::NoRequestPending);
        }
        control.state = SchedulerState::Completing;
        Ok(Completion {
            scheduler: self,
            result: Some(result),
        })
    }

    /// Starts a completion for a trigger-driven invocation.
    ///
    /// # Errors
    ///
    /// `RelayError::Reentrant` unless `Idle`.
    pub fn begin_completion(&self) -> Result<Completion<'_, T>, RelayError> {
        let mut control = self.control();
        if control.state != SchedulerState::Idle {
            return Err(RelayError::Reentrant);
        }
        control.state = SchedulerState::Completing;
        Ok(Completion {
            scheduler: self,
            result: None,
        })
    }

    fn pop_reported(&self) -> Option<Snapshot<T>> {
        let snapshot = self.buffer.pop()?;
        let lost = self.buffer.take_overflows();
        if lost > 0 {
            warn!(relay = %self.name, lost, "relay buffer overflows");
        }
        Some(snapshot)
    }

    fn spend_deferred(control: &mut Control) -> bool {
        if control.deferred == 0 {
            return false;
        }
        control.deferred -= 1;
        true
    }

    fn finish(&self) {
        let wake = {
            let mut control = self.control();
            control.state = SchedulerState::Idle;
            Self::spend_deferred(&mut control)
        };
        if wake {
            self.trigger.request_process();
        }
    }
}

/// A running completion routine. Dropping it returns the scheduler to
/// `Idle` and spends one unit of deferred count, if any.
pub struct Completion<'a, T> {
    scheduler: &'a CompletionScheduler<T>,
    result: Option<Snapshot<T>>,
}

impl<T> Completion<'_, T> {
    /// The request result, for completions started by `complete_request`.
    pub fn take_result(&mut self) -> Option<Snapshot<T>> {
        self.result.take()
    }

    /// Pops the next buffered value, reporting and resetting overflows.
    pub fn pop(&mut self) -> Option<Snapshot<T>> {
        self.scheduler.pop_reported()
    }
}

impl<T> fmt::Debug for Completion<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("scheduler", &self.scheduler.name)
            .field("has_result", &self.result.is_some())
            .finish()
    }
}

impl<T> Drop for Completion<'_, T> {
    fn drop(&mut self) {
        self.scheduler.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        scheduler: CompletionScheduler<i32>,
        requests: Arc<AtomicUsize>,
        triggers: Arc<AtomicUsize>,
    }

    fn harness(capacity: usize, fail_requests: bool) -> Harness {
        let requests = Arc::new(AtomicUsize::new(0));
        let triggers = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&requests);
        let t = Arc::clone(&triggers);
        let queue = move || {
            r.fetch_add(1, Ordering::SeqCst);
            if fail_requests {
                Err(RelayError::QueueRequest {
                    message: "port disconnected".to_string(),
                })
            } else {
                Ok(())
            }
        };
        let trigger = move || {
            t.fetch_add(1, Ordering::SeqCst);
        };
        Harness {
            scheduler: CompletionScheduler::new(RelayConfig::new("t", capacity), Arc::new(queue), Arc::new(trigger)),
            requests,
            triggers,
        }
    }

    #[test]
    fn config_default_capacity_is_ten() {
        assert_eq!(RelayConfig::default().capacity, 10);
        let cfg = RelayConfig::from_json(r#"{"capacity": 0}"#).unwrap();
        assert_eq!(cfg.capacity, 0);
        assert_eq!(cfg.name, "relay");
        assert!(RelayConfig::from_json("[").is_err());
    }

    #[test]
    fn push_while_idle_triggers_consumer() {
        let h = harness(4, false);
        assert_eq!(h.scheduler.push(Snapshot::new(1)), PushOutcome::Queued);
        assert_eq!(h.triggers.load(Ordering::SeqCst), 1);
        assert_eq!(h.scheduler.deferred(), 0);

        match h.scheduler.poll().unwrap() {
            PollOutcome::Ready(s) => assert_eq!(s.value, 1),
            other => panic!("expected Ready, got {other:?}"),
        }
        assert_eq!(h.scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn empty_poll_submits_one_request() {
        let h = harness(4, false);
        assert_eq!(h.scheduler.poll().unwrap(), PollOutcome::Requested);
        assert_eq!(h.scheduler.state(), SchedulerState::RequestPending);
        assert_eq!(h.scheduler.poll().unwrap(), PollOutcome::Pending);
        assert_eq!(h.requests.load(Ordering::SeqCst), 1);

        let mut completion = h.scheduler.complete_request(Snapshot::new(42)).unwrap();
        assert_eq!(h.scheduler.state(), SchedulerState::Completing);
        assert_eq!(completion.take_result().map(|s| s.value), Some(42));
        drop(completion);
        assert_eq!(h.scheduler.state(), SchedulerState::Idle);
        assert_eq!(h.triggers.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn push_while_completing_is_deferred() {
        let h = harness(4, false);
        let completion = h.scheduler.begin_completion().unwrap();
        h.scheduler.push(Snapshot::new(1));
        h.scheduler.push(Snapshot::new(2));
        assert_eq!(h.triggers.load(Ordering::SeqCst), 0);
        assert_eq!(h.scheduler.deferred(), 2);
        assert_eq!(h.scheduler.poll().unwrap(), PollOutcome::Busy);
        assert!(matches!(h.scheduler.begin_completion(), Err(RelayError::Reentrant)));

        drop(completion);
        assert_eq!(h.triggers.load(Ordering::SeqCst), 1);
        assert_eq!(h.scheduler.deferred(), 1);

        // The re-invoked consumer drains one value and spends the rest.
        let mut completion = h.scheduler.begin_completion().unwrap();
        assert_eq!(completion.pop().map(|s| s.value), Some(1));
        drop(completion);
        assert_eq!(h.triggers.load(Ordering::SeqCst), 2);
        assert_eq!(h.scheduler.deferred(), 0);
    }

    #[test]
    fn push_while_request_pending_is_deferred() {
        let h = harness(4, false);
        h.scheduler.poll().unwrap();
        h.scheduler.push(Snapshot::new(5));
        assert_eq!(h.triggers.load(Ordering::SeqCst), 0);
        assert_eq!(h.scheduler.deferred(), 1);

        let completion = h.scheduler.complete_request(Snapshot::new(0)).unwrap();
        drop(completion);
        assert_eq!(h.triggers.load(Ordering::SeqCst), 1);
        match h.scheduler.poll().unwrap() {
            PollOutcome::Ready(s) => assert_eq!(s.value, 5),
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn overflowing_push_does_not_trigger() {
        let h = harness(1, false);
        h.scheduler.push(Snapshot::new(1));
        assert_eq!(h.scheduler.push(Snapshot::new(2)), PushOutcome::Overwrote);
        assert_eq!(h.triggers.load(Ordering::SeqCst), 1);
        assert_eq!(h.scheduler.buffer().overflows(), 1);

        match h.scheduler.poll().unwrap() {
            PollOutcome::Ready(s) => assert_eq!(s.value, 2),
            other => panic!("expected Ready, got {other:?}"),
        }
        assert_eq!(h.scheduler.buffer().overflows(), 0);
    }

    #[test]
    fn latest_wins_mode_keeps_only_the_newest_push() {
        let h = harness(0, false);
        assert_eq!(h.scheduler.push(Snapshot::new(1)), PushOutcome::Queued);
        assert_eq!(h.scheduler.push(Snapshot::new(2)), PushOutcome::Overwrote);
        assert_eq!(h.triggers.load(Ordering::SeqCst), 1);

        match h.scheduler.poll().unwrap() {
            PollOutcome::Ready(s) => assert_eq!(s.value, 2),
            other => panic!("expected Ready, got {other:?}"),
        }
        // The superseded push was reported on pop and the counter reset.
        assert_eq!(h.scheduler.buffer().take_overflows(), 0);
        assert_eq!(h.scheduler.poll().unwrap(), PollOutcome::Requested);
    }

    #[test]
    fn deferred_count_saturates() {
        let h = harness(4, false);
        let completion = h.scheduler.begin_completion().unwrap();
        h.scheduler.control().deferred = u32::MAX;
        h.scheduler.push(Snapshot::new(1));
        assert_eq!(h.scheduler.deferred(), u32::MAX);
        drop(completion);
        assert_eq!(h.scheduler.deferred(), u32::MAX - 1);
        assert_eq!(h.triggers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_request_returns_to_idle() {
        let h = harness(4, true);
        let err = h.scheduler.poll().unwrap_err();
        assert!(matches!(err, RelayError::QueueRequest { .. }));
        assert_eq!(h.scheduler.state(), SchedulerState::Idle);
        assert!(h.scheduler.poll().is_err());
        assert_eq!(h.requests.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn completion_without_request_is_rejected() {
        let h = harness(4, false);
        assert!(matches!(
            h.scheduler.complete_request(Snapshot::new(1)),
            Err(RelayError::NoRequestPending)
        ));
    }
}
