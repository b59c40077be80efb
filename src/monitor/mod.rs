//! Change notification: subscriber registry and dispatch.
//!
//! Subscribers register per value kind with an address filter and, for bit
//! fields, a bit mask. A dispatch pass delivers every dirty slot of one
//! address synchronously on the caller's thread.

/// Dispatch pass over a store's pending list.
pub mod dispatcher;
/// Per-kind subscriber channels.
pub mod registry;
/// Subscription handles, filters and the listener trait.
pub mod subscription;

pub use dispatcher::{DispatchEngine, DispatchStats};
pub use registry::{ListenerKind, OpaqueKind, SubscriptionRegistry};
pub use subscription::{Listener, Opaque, Subscription, SubscriptionFilter, SubscriptionId, Update};
