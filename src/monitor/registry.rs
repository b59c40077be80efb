//! Per-kind subscriber lists.
//!
//! Each value kind has its own channel: an `Arc<Vec<_>>` swapped under a
//! `RwLock` on every subscribe/unsubscribe. A dispatch walk clones the `Arc`
//! and iterates without holding the lock, so registration never waits on a
//! slow listener and a cancelled listener may see at most one stale update.

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::value::ParamType;

use super::subscription::{Listener, Opaque, Subscription, SubscriptionFilter, SubscriptionId, Update};

pub(crate) struct Entry<V: ?Sized> {
    pub id: SubscriptionId,
    pub filter: SubscriptionFilter,
    pub listener: Arc<dyn Listener<V>>,
}

#[doc(hidden)]
pub struct Channel<V: ?Sized> {
    entries: RwLock<Arc<Vec<Entry<V>>>>,
}

impl<V: ?Sized> Default for Channel<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }
}

impl<V: ?Sized> Channel<V> {
    pub(crate) fn snapshot(&self) -> Arc<Vec<Entry<V>>> {
        let guard = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(&guard)
    }

    fn len(&self) -> usize {
        self.snapshot().len()
    }

    fn add(&self, entry: Entry<V>) {
        let mut guard = self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut next: Vec<Entry<V>> = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().map(Entry::share));
        next.push(entry);
        *guard = Arc::new(next);
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut guard = self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !guard.iter().any(|e| e.id == id) {
            return false;
        }
        let next: Vec<Entry<V>> = guard.iter().filter(|e| e.id != id).map(Entry::share).collect();
        *guard = Arc::new(next);
        true
    }
}

impl<V: ?Sized> Entry<V> {
    fn share(&self) -> Self {
        Self {
            id: self.id,
            filter: self.filter,
            listener: Arc::clone(&self.listener),
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A value kind that has a subscriber channel.
///
/// Implemented for `i32`, `u32`, `f64`, `str`, the five array element
/// slices, and [`Opaque`].
pub trait ListenerKind: sealed::Sealed + 'static {
    /// Slot type this channel serves.
    const PARAM_TYPE: ParamType;

    #[doc(hidden)]
    fn channel(registry: &SubscriptionRegistry) -> &Channel<Self>;
}

/// Kinds whose buffers are owned by the caller and delivered through
/// `publish` rather than stored in the cache.
pub trait OpaqueKind: ListenerKind {}

macro_rules! listener_kind {
    ($ty:ty, $variant:ident, $field:ident) => {
        impl sealed::Sealed for $ty {}

        impl ListenerKind for $ty {
            const PARAM_TYPE: ParamType = ParamType::$variant;

            fn channel(registry: &SubscriptionRegistry) -> &Channel<Self> {
                &registry.$field
            }
        }
    };
}

listener_kind!(i32, Integer32, integer32);
listener_kind!(u32, BitField32, bitfield32);
listener_kind!(f64, Float64, float64);
listener_kind!(str, Text, text);
listener_kind!([i8], Int8Array, int8_array);
listener_kind!([i16], Int16Array, int16_array);
listener_kind!([i32], Int32Array, int32_array);
listener_kind!([f32], Float32Array, float32_array);
listener_kind!([f64], Float64Array, float64_array);
listener_kind!(Opaque, GenericPointer, generic);

impl OpaqueKind for [i8] {}
impl OpaqueKind for [i16] {}
impl OpaqueKind for [i32] {}
impl OpaqueKind for [f32] {}
impl OpaqueKind for [f64] {}
impl OpaqueKind for Opaque {}

/// Subscriber lists for every value kind.
#[derive(Default)]
pub struct SubscriptionRegistry {
    integer32: Channel<i32>,
    bitfield32: Channel<u32>,
    float64: Channel<f64>,
    text: Channel<str>,
    int8_array: Channel<[i8]>,
    int16_array: Channel<[i16]>,
    int32_array: Channel<[i32]>,
    float32_array: Channel<[f32]>,
    float64_array: Channel<[f64]>,
    generic: Channel<Opaque>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener on `V`'s channel.
    pub fn subscribe<V: ListenerKind + ?Sized>(
        &self,
        filter: SubscriptionFilter,
        listener: Arc<dyn Listener<V>>,
    ) -> Subscription {
        let id = SubscriptionId::new();
        V::channel(self).add(Entry { id, filter, listener });
        Subscription::new(id, V::PARAM_TYPE)
    }

    /// Closure convenience for [`subscribe`](Self::subscribe).
    pub fn subscribe_fn<V, F>(&self, filter: SubscriptionFilter, f: F) -> Subscription
    where
        V: ListenerKind + ?Sized,
        F: Fn(&Update<'_, V>) + Send + Sync + 'static,
    {
        self.subscribe::<V>(filter, Arc::new(f))
    }

    /// Removes a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let id = subscription.id();
        match subscription.param_type() {
            ParamType::Integer32 => self.integer32.remove(id),
            ParamType::BitField32 => self.bitfield32.remove(id),
            ParamType::Float64 => self.float64.remove(id),
            ParamType::Text => self.text.remove(id),
            ParamType::Int8Array => self.int8_array.remove(id),
            ParamType::Int16Array => self.int16_array.remove(id),
            ParamType::Int32Array => self.int32_array.remove(id),
            ParamType::Float32Array => self.float32_array.remove(id),
            ParamType::Float64Array => self.float64_array.remove(id),
            ParamType::GenericPointer => self.generic.remove(id),
        }
    }

    /// Number of subscribers on one channel.
    #[must_use]
    pub fn count(&self, ty: ParamType) -> usize {
        match ty {
            ParamType::Integer32 => self.integer32.len(),
            ParamType::BitField32 => self.bitfield32.len(),
            ParamType::Float64 => self.float64.len(),
            ParamType::Text => self.text.len(),
            ParamType::Int8Array => self.int8_array.len(),
            ParamType::Int16Array => self.int16_array.len(),
            ParamType::Int32Array => self.int32_array.len(),
            ParamType::Float32Array => self.float32_array.len(),
            ParamType::Float64Array => self.float64_array.len(),
            ParamType::GenericPointer => self.generic.len(),
        }
    }

    /// Subscriber count per kind, in `ParamType::ALL` order.
    #[must_use]
    pub fn counts(&self) -> Vec<(ParamType, usize)> {
        ParamType::ALL.iter().map(|&ty| (ty, self.count(ty))).collect()
    }

    pub(crate) fn entries<V: ListenerKind + ?Sized>(&self) -> Arc<Vec<Entry<V>>> {
        V::channel(self).snapshot()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (ty, n) in self.counts() {
            map.entry(&ty.as_str(), &n);
        }
        map.finish()
    }
}
