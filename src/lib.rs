//! # paramcache - typed parameter cache with change notification
//!
//! paramcache bridges asynchronous device and transport activity to
//! polling or scan-driven consumers.
//!
//! ## Core Concepts
//!
//! - **ParameterStore**: named, strongly typed slots with dirty tracking, I/O status and alarm
//! - **SubscriptionRegistry**: per value kind subscriber lists with address, slot and bit-mask filters
//! - **Port**: one store per address behind a single lock, plus the readiness-gated dispatch pass
//! - **RelayBuffer / CompletionScheduler**: a bounded ring from any-thread producers to one
//!   consumer that is never re-entered
//!
//! ## Usage
//!
//! ```rust
//! use paramcache::{ParamType, Port, PortConfig, ReadinessGate, SubscriptionFilter, Update};
//!
//! let gate = ReadinessGate::new();
//! let port = Port::new(PortConfig::new("dmm", 2), gate.clone())?;
//!
//! port.subscribe_fn::<f64, _>(SubscriptionFilter::any().at_address(1), |u: &Update<'_, f64>| {
//!     println!("slot {} at {} = {}", u.reason, u.addr, u.value);
//! });
//!
//! let mut guard = port.lock()?;
//! let volts = guard.create_param("VOLTS", ParamType::Float64)?;
//! guard.set_float(1, volts, 3.3)?;
//! drop(guard);
//!
//! // Nothing is delivered until the system is ready.
//! gate.open();
//! # Ok::<(), paramcache::CacheError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod value;

// Storage and notification
pub mod monitor;
pub mod param;
pub mod port;

// Producer/consumer relay
pub mod relay;
pub mod transport;

// Re-export primary types at crate root for convenience
pub use error::{CacheError, CacheResult, ParamError, PortError, RelayError};
pub use value::{Alarm, AlarmSeverity, InterruptReason, IoStatus, ParamType};

pub use monitor::{
    DispatchEngine, DispatchStats, Listener, ListenerKind, Opaque, OpaqueKind, Subscription, SubscriptionFilter,
    SubscriptionId, SubscriptionRegistry, Update,
};
pub use param::{ParameterStore, Slot, SlotId, SlotReport, StoreReport};
pub use port::{Port, PortConfig, PortGuard, PortReport, ReadinessGate};

pub use relay::{
    AveragingListener, Averager, Completion, CompletionScheduler, PollOutcome, PushOutcome, RelayBuffer,
    RelayConfig, RelayListener, SchedulerState, Snapshot,
};
#[cfg(feature = "tokio-transport")]
pub use transport::TokioRequestQueue;
pub use transport::{ProcessTrigger, RequestQueue, WorkerHandle, WorkerQueue};
