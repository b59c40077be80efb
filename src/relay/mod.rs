//! Relay from asynchronous producers to a poll-driven consumer.
//!
//! `RelayBuffer` is the bounded queue; `CompletionScheduler` wraps it in the
//! Idle / RequestPending / Completing handshake that keeps the consumer from
//! being re-entered. The buffer and scheduler share one lock per binding,
//! separate from any port lock.

/// Sample averaging.
pub mod average;
/// Subscriber-to-relay listeners.
pub mod bridge;
/// Bounded snapshot queue.
pub mod buffer;
/// Deferred-completion state machine.
pub mod scheduler;

pub use average::{round_to_i32, Averager};
pub use bridge::{AveragingListener, RelayListener};
pub use buffer::{PushOutcome, RelayBuffer, Snapshot};
pub use scheduler::{Completion, CompletionScheduler, PollOutcome, RelayConfig, SchedulerState};
