//! Subscriber-facing types: identities, filters, and the listener trait.

use std::any::Any;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::param::SlotId;
use crate::value::{Alarm, IoStatus, ParamType};

/// Unique identifier for a subscription.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    id: SubscriptionId,
    param_type: ParamType,
}

impl Subscription {
    pub(crate) const fn new(id: SubscriptionId, param_type: ParamType) -> Self {
        Self { id, param_type }
    }

    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Value kind of the channel this subscription lives on.
    #[must_use]
    pub const fn param_type(&self) -> ParamType {
        self.param_type
    }
}

/// Which updates a subscriber wants.
///
/// An absent address matches address 0 only. An absent slot matches every
/// slot of the subscribed kind. `mask` only applies to bit-field channels:
/// the subscriber fires when the mask intersects the slot's changed bits and
/// receives `value & mask`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<SlotId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<u32>,
}

impl SubscriptionFilter {
    /// Matches every slot at address 0.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            reason: None,
            address: None,
            mask: None,
        }
    }

    /// Matches one slot at address 0.
    #[must_use]
    pub const fn slot(id: SlotId) -> Self {
        Self {
            reason: Some(id),
            address: None,
            mask: None,
        }
    }

    #[must_use]
    pub const fn at_address(mut self, addr: usize) -> Self {
        self.address = Some(addr);
        self
    }

    #[must_use]
    pub const fn with_mask(mut self, mask: u32) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Address this filter listens on.
    #[must_use]
    pub fn effective_address(&self) -> usize {
        self.address.unwrap_or(0)
    }

    pub(crate) fn matches(&self, reason: SlotId, addr: usize) -> bool {
        self.effective_address() == addr && self.reason.map_or(true, |r| r == reason)
    }
}

/// One delivered change.
///
/// `value` borrows from the store (scalars) or from the publisher (arrays
/// and generic references) and is only valid for the duration of the call.
#[derive(Debug)]
pub struct Update<'a, V: ?Sized> {
    pub reason: SlotId,
    pub addr: usize,
    pub value: &'a V,
    pub timestamp: DateTime<Utc>,
    pub status: IoStatus,
    pub alarm: Alarm,
}

/// Receives updates for one value kind.
///
/// Listeners run synchronously on the dispatching thread while the port lock
/// is held. They must not call back into the same port.
pub trait Listener<V: ?Sized>: Send + Sync {
    fn notify(&self, update: &Update<'_, V>);
}

impl<V: ?Sized, F> Listener<V> for F
where
    F: Fn(&Update<'_, V>) + Send + Sync,
{
    fn notify(&self, update: &Update<'_, V>) {
        self(update);
    }
}

/// Opaque payload type for the generic-reference channel.
pub type Opaque = dyn Any + Send + Sync;
