//! Append-only store of typed slots for one port address.
//!
//! Identities are assigned in registration order and never reused. Every
//! mutation that changes a slot's persisted state puts the slot on the
//! pending list exactly once; the list is drained in full by a dispatch
//! pass.

use std::fmt;

use serde::Serialize;

use crate::error::ParamError;
use crate::value::{Alarm, AlarmSeverity, InterruptReason, IoStatus, ParamType};

use super::slot::{Slot, SlotId};

/// Ordered slots plus the deduplicated list of dirty identities.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    slots: Vec<Slot>,
    pending: Vec<SlotId>,
}

impl ParameterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new slot.
    ///
    /// Names are unique within a store, compared case-insensitively. The
    /// existence check is a linear scan; stores are small and registration
    /// happens at startup.
    ///
    /// # Errors
    ///
    /// Returns `ParamError::AlreadyExists` if the name is taken.
    pub fn register(&mut self, name: &str, ty: ParamType) -> Result<SlotId, ParamError> {
        if self.find(name).is_ok() {
            return Err(ParamError::AlreadyExists {
                name: name.to_string(),
            });
        }
        let id = SlotId::new(self.slots.len());
        self.slots.push(Slot::new(id, name, ty));
        Ok(id)
    }

    /// Looks up a slot by name (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns `ParamError::NotFound` on a miss.
    pub fn find(&self, name: &str) -> Result<SlotId, ParamError> {
        self.slots
            .iter()
            .find(|slot| slot.name_matches(name))
            .map(Slot::id)
            .ok_or_else(|| ParamError::NotFound {
                name: name.to_string(),
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Borrow a slot for inspection.
    ///
    /// # Errors
    ///
    /// Returns `ParamError::BadIndex` for an unknown identity.
    pub fn slot(&self, id: SlotId) -> Result<&Slot, ParamError> {
        self.slots
            .get(id.index())
            .ok_or(ParamError::BadIndex { index: id.index() })
    }

    fn slot_mut(&mut self, id: SlotId) -> Result<&mut Slot, ParamError> {
        self.slots
            .get_mut(id.index())
            .ok_or(ParamError::BadIndex { index: id.index() })
    }

    /// Iterates slots in identity order.
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    pub fn name(&self, id: SlotId) -> Result<&str, ParamError> {
        self.slot(id).map(Slot::name)
    }

    pub fn param_type(&self, id: SlotId) -> Result<ParamType, ParamError> {
        self.slot(id).map(Slot::param_type)
    }

    pub fn is_defined(&self, id: SlotId) -> Result<bool, ParamError> {
        self.slot(id).map(Slot::is_defined)
    }

    pub fn is_changed(&self, id: SlotId) -> Result<bool, ParamError> {
        self.slot(id).map(Slot::is_changed)
    }

    /// Dirty identities in first-dirtied order.
    #[must_use]
    pub fn pending(&self) -> &[SlotId] {
        &self.pending
    }

    fn mark(&mut self, id: SlotId) {
        let slot = &mut self.slots[id.index()];
        if !slot.is_changed() {
            slot.set_changed(true);
            self.pending.push(id);
        }
    }

    fn apply(
        &mut self,
        id: SlotId,
        op: impl FnOnce(&mut Slot) -> Result<bool, ParamError>,
    ) -> Result<(), ParamError> {
        if op(self.slot_mut(id)?)? {
            self.mark(id);
        }
        Ok(())
    }

    /// Stores an integer; marks dirty only if the value differs or the slot
    /// was undefined.
    ///
    /// # Errors
    ///
    /// `BadIndex` or `TypeMismatch`; the slot is untouched on error.
    pub fn set_integer(&mut self, id: SlotId, value: i32) -> Result<(), ParamError> {
        self.apply(id, |slot| slot.set_integer(value))
    }

    /// Applies `value` under `value_mask`: bits set in both are set, bits set
    /// in the mask and clear in the value are cleared.
    ///
    /// Flipped bits are added to the pending-callback mask. A non-zero
    /// `interrupt_mask` is OR'd into the pending-callback mask and marks the
    /// slot dirty even when no bit changed.
    pub fn set_bitfield(
        &mut self,
        id: SlotId,
        value: u32,
        value_mask: u32,
        interrupt_mask: u32,
    ) -> Result<(), ParamError> {
        self.apply(id, |slot| slot.set_bitfield(value, value_mask, interrupt_mask))
    }

    pub fn set_float(&mut self, id: SlotId, value: f64) -> Result<(), ParamError> {
        self.apply(id, |slot| slot.set_float(value))
    }

    pub fn set_text(&mut self, id: SlotId, value: &str) -> Result<(), ParamError> {
        self.apply(id, |slot| slot.set_text(value))
    }

    /// # Errors
    ///
    /// `BadIndex`, `TypeMismatch`, or `Undefined` before the first write.
    pub fn get_integer(&self, id: SlotId) -> Result<i32, ParamError> {
        self.slot(id)?.integer()
    }

    /// Returns the stored bits AND'ed with `mask`.
    pub fn get_bitfield(&self, id: SlotId, mask: u32) -> Result<u32, ParamError> {
        self.slot(id)?.bitfield(mask)
    }

    pub fn get_float(&self, id: SlotId) -> Result<f64, ParamError> {
        self.slot(id)?.float()
    }

    pub fn get_text(&self, id: SlotId) -> Result<&str, ParamError> {
        self.slot(id)?.text()
    }

    pub fn set_bit_interrupt(&mut self, id: SlotId, mask: u32, reason: InterruptReason) -> Result<(), ParamError> {
        self.slot_mut(id)?.set_bit_interrupt(mask, reason)
    }

    pub fn clear_bit_interrupt(&mut self, id: SlotId, mask: u32) -> Result<(), ParamError> {
        self.slot_mut(id)?.clear_bit_interrupt(mask)
    }

    pub fn get_bit_interrupt(&self, id: SlotId, reason: InterruptReason) -> Result<u32, ParamError> {
        self.slot(id)?.bit_interrupt(reason)
    }

    /// Sets the I/O status; a change marks the slot dirty.
    ///
    /// # Errors
    ///
    /// `BadIndex` only.
    pub fn set_status(&mut self, id: SlotId, status: IoStatus) -> Result<(), ParamError> {
        self.apply(id, |slot| Ok(slot.set_status(status)))
    }

    pub fn get_status(&self, id: SlotId) -> Result<IoStatus, ParamError> {
        self.slot(id).map(Slot::status)
    }

    pub fn set_alarm_status(&mut self, id: SlotId, status: u16) -> Result<(), ParamError> {
        self.apply(id, |slot| Ok(slot.set_alarm_status(status)))
    }

    pub fn get_alarm_status(&self, id: SlotId) -> Result<u16, ParamError> {
        self.slot(id).map(|slot| slot.alarm().status)
    }

    pub fn set_alarm_severity(&mut self, id: SlotId, severity: AlarmSeverity) -> Result<(), ParamError> {
        self.apply(id, |slot| Ok(slot.set_alarm_severity(severity)))
    }

    pub fn get_alarm_severity(&self, id: SlotId) -> Result<AlarmSeverity, ParamError> {
        self.slot(id).map(|slot| slot.alarm().severity)
    }

    pub fn get_alarm(&self, id: SlotId) -> Result<Alarm, ParamError> {
        self.slot(id).map(Slot::alarm)
    }

    /// Resets and returns a bit-field slot's pending-callback mask.
    pub(crate) fn take_bit_pending(&mut self, id: SlotId) -> u32 {
        self.slots
            .get_mut(id.index())
            .map_or(0, Slot::take_bit_pending)
    }

    pub(crate) fn bit_pending(&self, id: SlotId) -> u32 {
        self.slot(id)
            .ok()
            .and_then(|slot| slot.bits().ok())
            .map_or(0, |bits| bits.pending)
    }

    /// Drops every pending identity and clears the changed flags.
    pub(crate) fn clear_pending(&mut self) {
        for id in self.pending.drain(..) {
            if let Some(slot) = self.slots.get_mut(id.index()) {
                slot.set_changed(false);
            }
        }
    }

    /// Snapshot of every slot for diagnostics.
    #[must_use]
    pub fn report(&self) -> StoreReport {
        StoreReport {
            slots: self
                .slots
                .iter()
                .map(|slot| {
                    let bits = slot.bits().ok();
                    SlotReport {
                        index: slot.id().index(),
                        name: slot.name().to_string(),
                        param_type: slot.param_type(),
                        defined: slot.is_defined(),
                        changed: slot.is_changed(),
                        value: slot.value_text(),
                        status: slot.status(),
                        alarm: slot.alarm(),
                        rising_mask: bits.map(|b| b.rising),
                        falling_mask: bits.map(|b| b.falling),
                        pending_mask: bits.map(|b| b.pending),
                    }
                })
                .collect(),
        }
    }
}

/// Serializable per-slot diagnostics.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotReport {
    pub index: usize,
    pub name: String,
    pub param_type: ParamType,
    pub defined: bool,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub status: IoStatus,
    pub alarm: Alarm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rising_mask: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub falling_mask: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_mask: Option<u32>,
}

/// Diagnostics for a whole store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreReport {
    pub slots: Vec<SlotReport>,
}

impl fmt::Display for StoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of parameters is: {}", self.slots.len())?;
        for s in &self.slots {
            write!(f, "Parameter {} type={}, name={}, ", s.index, s.param_type, s.name)?;
            match &s.value {
                Some(v) => write!(f, "value={v}")?,
                None if s.param_type.is_opaque() => write!(f, "value is caller-owned")?,
                None => write!(f, "value is undefined")?,
            }
            if let (Some(r), Some(fl), Some(p)) = (s.rising_mask, s.falling_mask, s.pending_mask) {
                write!(f, ", risingMask={r:#x}, fallingMask={fl:#x}, callbackMask={p:#x}")?;
            }
            if !s.status.is_success() || s.alarm.is_raised() {
                write!(f, ", status={:?}, alarm={}/{:?}", s.status, s.alarm.status, s.alarm.severity)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(names: &[(&str, ParamType)]) -> (ParameterStore, Vec<SlotId>) {
        let mut store = ParameterStore::new();
        let ids = names
            .iter()
            .map(|(name, ty)| store.register(name, *ty).unwrap())
            .collect();
        (store, ids)
    }

    #[test]
    fn register_then_find_returns_same_identity() {
        let (mut store, ids) = store_with(&[("Voltage", ParamType::Float64), ("Mode", ParamType::Integer32)]);
        assert_eq!(ids, vec![SlotId::new(0), SlotId::new(1)]);
        assert_eq!(store.find("Voltage").unwrap(), ids[0]);
        assert_eq!(store.find("MODE").unwrap(), ids[1]);

        let err = store.register("voltage", ParamType::Text).unwrap_err();
        assert_eq!(
            err,
            ParamError::AlreadyExists {
                name: "voltage".to_string()
            }
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn find_miss_is_not_found() {
        let store = ParameterStore::new();
        assert!(matches!(store.find("nope"), Err(ParamError::NotFound { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn get_before_set_is_undefined_then_round_trips() {
        let (mut store, ids) = store_with(&[
            ("i", ParamType::Integer32),
            ("f", ParamType::Float64),
            ("t", ParamType::Text),
            ("b", ParamType::BitField32),
        ]);
        assert!(store.get_integer(ids[0]).unwrap_err().is_undefined());
        assert!(store.get_float(ids[1]).unwrap_err().is_undefined());
        assert!(store.get_text(ids[2]).unwrap_err().is_undefined());
        assert!(store.get_bitfield(ids[3], u32::MAX).unwrap_err().is_undefined());
        assert!(store.pending().is_empty());

        store.set_integer(ids[0], -5).unwrap();
        store.set_float(ids[1], 2.5).unwrap();
        store.set_text(ids[2], "abc").unwrap();
        store.set_bitfield(ids[3], 0b1010, 0b1111, 0).unwrap();

        assert_eq!(store.get_integer(ids[0]).unwrap(), -5);
        assert!((store.get_float(ids[1]).unwrap() - 2.5).abs() < f64::EPSILON);
        assert_eq!(store.get_text(ids[2]).unwrap(), "abc");
        assert_eq!(store.get_bitfield(ids[3], u32::MAX).unwrap(), 0b1010);
        assert!(store.is_defined(ids[0]).unwrap());
    }

    #[test]
    fn bad_index_and_type_mismatch_do_not_mutate() {
        let (mut store, ids) = store_with(&[("i", ParamType::Integer32)]);
        let bogus = SlotId::new(9);
        assert_eq!(store.set_integer(bogus, 1), Err(ParamError::BadIndex { index: 9 }));
        assert_eq!(store.get_status(bogus), Err(ParamError::BadIndex { index: 9 }));

        let err = store.set_float(ids[0], 1.0).unwrap_err();
        assert!(err.is_programming_error());
        assert!(!store.is_defined(ids[0]).unwrap());
        assert!(store.pending().is_empty());
    }

    #[test]
    fn repeated_integer_write_marks_dirty_once() {
        let (mut store, ids) = store_with(&[("i", ParamType::Integer32)]);
        store.set_integer(ids[0], 4).unwrap();
        store.set_integer(ids[0], 4).unwrap();
        assert_eq!(store.pending(), &[ids[0]]);

        store.clear_pending();
        assert!(!store.is_changed(ids[0]).unwrap());

        store.set_integer(ids[0], 4).unwrap();
        assert!(!store.is_changed(ids[0]).unwrap());
        assert!(store.pending().is_empty());
    }

    #[test]
    fn unchanged_text_does_not_mark_dirty() {
        let (mut store, ids) = store_with(&[("t", ParamType::Text)]);
        store.set_text(ids[0], "abc").unwrap();
        store.clear_pending();
        store.set_text(ids[0], "abc").unwrap();
        assert!(!store.is_changed(ids[0]).unwrap());
        store.set_text(ids[0], "abd").unwrap();
        assert!(store.is_changed(ids[0]).unwrap());
    }

    #[test]
    fn bitfield_repeat_is_clean_unless_interrupt_forced() {
        let (mut store, ids) = store_with(&[("bits", ParamType::BitField32)]);
        let id = ids[0];
        store.set_bitfield(id, 0b1010, 0b1111, 0).unwrap();
        assert!(store.is_changed(id).unwrap());
        store.clear_pending();
        store.take_bit_pending(id);

        store.set_bitfield(id, 0b1010, 0b1111, 0).unwrap();
        assert!(!store.is_changed(id).unwrap());

        store.set_bitfield(id, 0b1010, 0b1111, 0b0001).unwrap();
        assert!(store.is_changed(id).unwrap());
        assert_eq!(store.bit_pending(id), 0b0001);
    }

    #[test]
    fn pending_list_keeps_first_dirtied_order() {
        let (mut store, ids) = store_with(&[
            ("a", ParamType::Integer32),
            ("b", ParamType::Integer32),
            ("c", ParamType::Integer32),
        ]);
        store.set_integer(ids[2], 1).unwrap();
        store.set_integer(ids[0], 1).unwrap();
        store.set_integer(ids[2], 2).unwrap();
        assert_eq!(store.pending(), &[ids[2], ids[0]]);
    }

    #[test]
    fn status_and_alarm_changes_mark_dirty() {
        let (mut store, ids) = store_with(&[("f", ParamType::Float64)]);
        let id = ids[0];
        store.set_status(id, IoStatus::Success).unwrap();
        assert!(store.pending().is_empty());

        store.set_status(id, IoStatus::Timeout).unwrap();
        store.set_alarm_status(id, 17).unwrap();
        store.set_alarm_severity(id, AlarmSeverity::Major).unwrap();
        assert_eq!(store.pending(), &[id]);
        assert_eq!(store.get_status(id).unwrap(), IoStatus::Timeout);
        assert_eq!(store.get_alarm(id).unwrap(), Alarm::new(17, AlarmSeverity::Major));
    }

    #[test]
    fn report_renders_each_slot() {
        let (mut store, ids) = store_with(&[
            ("Count", ParamType::Integer32),
            ("Bits", ParamType::BitField32),
            ("Wave", ParamType::Float64Array),
        ]);
        store.set_integer(ids[0], 12).unwrap();
        store.set_bit_interrupt(ids[1], 0x3, InterruptReason::Both).unwrap();

        let report = store.report();
        assert_eq!(report.slots.len(), 3);
        assert_eq!(report.slots[0].value.as_deref(), Some("12"));
        assert_eq!(report.slots[1].rising_mask, Some(0x3));
        assert!(report.slots[2].value.is_none());

        let text = report.to_string();
        assert!(text.contains("Number of parameters is: 3"));
        assert!(text.contains("name=Count, value=12"));
        assert!(text.contains("name=Bits, value is undefined"));
        assert!(text.contains("value is caller-owned"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["slots"][0]["param_type"], "integer32");
    }
}
