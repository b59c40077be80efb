//! Dispatch pass: fans dirty slots out to matching subscribers.
//!
//! A pass walks the store's pending list in first-dirtied order, re-reads
//! each slot's current value, status and alarm, delivers to every matching
//! listener of the slot's kind, and finally clears the pending list in full.
//! Nothing happens while the readiness gate is closed, and dirtiness is kept
//! for the first pass after it opens.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::trace;

use crate::error::ParamError;
use crate::param::{ParameterStore, SlotId};
use crate::port::gate::ReadinessGate;
use crate::value::{Alarm, IoStatus, ParamType};

use super::registry::{ListenerKind, OpaqueKind, SubscriptionRegistry};
use super::subscription::Update;

/// Counters for one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// False when the gate was closed and nothing was touched.
    pub ran: bool,
    /// Pending slots that were fanned out.
    pub visited: usize,
    /// Pending slots skipped because they were never written.
    pub skipped: usize,
    /// Listener invocations.
    pub delivered: usize,
}

/// Composes a subscriber registry with a readiness gate.
#[derive(Debug, Clone)]
pub struct DispatchEngine {
    registry: Arc<SubscriptionRegistry>,
    gate: ReadinessGate,
}

struct Meta {
    reason: SlotId,
    addr: usize,
    timestamp: DateTime<Utc>,
    status: IoStatus,
    alarm: Alarm,
}

impl Meta {
    fn update<'a, V: ?Sized>(&self, value: &'a V) -> Update<'a, V> {
        Update {
            reason: self.reason,
            addr: self.addr,
            value,
            timestamp: self.timestamp,
            status: self.status,
            alarm: self.alarm,
        }
    }
}

impl DispatchEngine {
    #[must_use]
    pub fn new(registry: Arc<SubscriptionRegistry>, gate: ReadinessGate) -> Self {
        Self { registry, gate }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// Runs one pass over `store`, which holds address `addr`.
    ///
    /// The caller must hold the port lock. Listeners run synchronously.
    pub fn dispatch(&self, store: &mut ParameterStore, addr: usize, timestamp: DateTime<Utc>) -> DispatchStats {
        let mut stats = DispatchStats::default();
        if !self.gate.is_open() {
            return stats;
        }
        stats.ran = true;

        for i in 0..store.pending().len() {
            let id = store.pending()[i];
            let Ok(slot) = store.slot(id) else {
                continue;
            };
            if !slot.is_defined() {
                stats.skipped += 1;
                continue;
            }
            let meta = Meta {
                reason: id,
                addr,
                timestamp,
                status: slot.status(),
                alarm: slot.alarm(),
            };

            stats.visited += 1;
            stats.delivered += match slot.param_type() {
                ParamType::Integer32 => slot_value(store.get_integer(id), |v| self.fan_out::<i32>(&meta, &v)),
                ParamType::Float64 => slot_value(store.get_float(id), |v| self.fan_out::<f64>(&meta, &v)),
                ParamType::Text => slot_value(store.get_text(id), |v| self.fan_out::<str>(&meta, v)),
                ParamType::BitField32 => {
                    let pending = store.bit_pending(id);
                    let delivered = slot_value(store.get_bitfield(id, u32::MAX), |v| {
                        self.fan_out_bits(&meta, v, pending)
                    });
                    store.take_bit_pending(id);
                    delivered
                }
                // Caller-owned buffers are delivered through `publish`.
                _ => 0,
            };
        }

        trace!(addr, visited = stats.visited, delivered = stats.delivered, "dispatch pass");
        store.clear_pending();
        stats
    }

    /// Delivers a caller-owned buffer to subscribers of `V` for slot `id`.
    ///
    /// Status and alarm come from the slot. Returns the number of listener
    /// invocations, 0 while the gate is closed.
    ///
    /// # Errors
    ///
    /// `BadIndex` or `TypeMismatch` if `id` is not a slot of kind `V`.
    pub fn publish<V: OpaqueKind + ?Sized>(
        &self,
        store: &ParameterStore,
        addr: usize,
        id: SlotId,
        value: &V,
        timestamp: DateTime<Utc>,
    ) -> Result<usize, ParamError> {
        let slot = store.slot(id)?;
        slot.expect_type(V::PARAM_TYPE)?;
        if !self.gate.is_open() {
            return Ok(0);
        }
        let meta = Meta {
            reason: id,
            addr,
            timestamp,
            status: slot.status(),
            alarm: slot.alarm(),
        };
        Ok(self.fan_out::<V>(&meta, value))
    }

    fn fan_out<V: ListenerKind + ?Sized>(&self, meta: &Meta, value: &V) -> usize {
        let entries = self.registry.entries::<V>();
        let update = meta.update(value);
        let mut delivered = 0;
        for entry in entries.iter() {
            if entry.filter.matches(meta.reason, meta.addr) {
                entry.listener.notify(&update);
                delivered += 1;
            }
        }
        delivered
    }

    fn fan_out_bits(&self, meta: &Meta, value: u32, pending: u32) -> usize {
        let entries = self.registry.entries::<u32>();
        let mut delivered = 0;
        for entry in entries.iter() {
            if !entry.filter.matches(meta.reason, meta.addr) {
                continue;
            }
            let mask = entry.filter.mask.unwrap_or(u32::MAX);
            if mask & pending == 0 {
                continue;
            }
            let masked = value & mask;
            entry.listener.notify(&meta.update(&masked));
            delivered += 1;
        }
        delivered
    }
}

fn slot_value<T>(value: Result<T, ParamError>, deliver: impl FnOnce(T) -> usize) -> usize {
    value.map_or(0, deliver)
}
