//! Typed parameter storage.
//!
//! A `ParameterStore` holds the named slots of one port address together
//! with the list of slots that changed since the last dispatch pass.

/// Single slot and its payload.
pub mod slot;
/// Ordered slot collection with dirty tracking.
pub mod store;

pub use slot::{Slot, SlotId};
pub use store::{ParameterStore, SlotReport, StoreReport};
