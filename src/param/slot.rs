//! A single named, typed cache entry.
//!
//! The value lives in a `Payload` sum type whose variant is fixed at
//! registration, so every typed access is an exhaustive match and a
//! mismatched access is an error rather than a reinterpretation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ParamError;
use crate::value::{Alarm, AlarmSeverity, InterruptReason, IoStatus, ParamType};

/// Stable identity of a slot within a store (0..N-1, append-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(usize);

impl SlotId {
    /// Wrap a raw index, e.g. one received from an external collaborator.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for SlotId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bit-field storage plus its edge and pending-callback masks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BitState {
    pub value: u32,
    pub rising: u32,
    pub falling: u32,
    pub pending: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Payload {
    Integer32(i32),
    BitField32(BitState),
    Float64(f64),
    Text(String),
    /// Array and generic kinds: the buffer is owned by the caller.
    Opaque(ParamType),
}

impl Payload {
    fn empty(ty: ParamType) -> Self {
        match ty {
            ParamType::Integer32 => Self::Integer32(0),
            ParamType::BitField32 => Self::BitField32(BitState::default()),
            ParamType::Float64 => Self::Float64(0.0),
            ParamType::Text => Self::Text(String::new()),
            other => Self::Opaque(other),
        }
    }

    const fn param_type(&self) -> ParamType {
        match self {
            Self::Integer32(_) => ParamType::Integer32,
            Self::BitField32(_) => ParamType::BitField32,
            Self::Float64(_) => ParamType::Float64,
            Self::Text(_) => ParamType::Text,
            Self::Opaque(ty) => *ty,
        }
    }
}

/// One named, typed cache entry.
#[derive(Debug, Clone)]
pub struct Slot {
    id: SlotId,
    name: String,
    payload: Payload,
    defined: bool,
    changed: bool,
    status: IoStatus,
    alarm: Alarm,
}

impl Slot {
    pub(crate) fn new(id: SlotId, name: &str, ty: ParamType) -> Self {
        Self {
            id,
            name: name.to_string(),
            payload: Payload::empty(ty),
            defined: false,
            changed: false,
            status: IoStatus::Success,
            alarm: Alarm::NONE,
        }
    }

    #[must_use]
    pub const fn id(&self) -> SlotId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn param_type(&self) -> ParamType {
        self.payload.param_type()
    }

    /// Returns true once a typed setter has stored a value.
    #[must_use]
    pub const fn is_defined(&self) -> bool {
        self.defined
    }

    /// Returns true while the slot is on its store's pending list.
    #[must_use]
    pub const fn is_changed(&self) -> bool {
        self.changed
    }

    #[must_use]
    pub const fn status(&self) -> IoStatus {
        self.status
    }

    #[must_use]
    pub const fn alarm(&self) -> Alarm {
        self.alarm
    }

    pub(crate) fn name_matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub(crate) fn set_changed(&mut self, changed: bool) {
        self.changed = changed;
    }

    fn mismatch(&self, expected: ParamType) -> ParamError {
        ParamError::TypeMismatch {
            index: self.id.0,
            expected,
            actual: self.param_type(),
        }
    }

    fn undefined(&self) -> ParamError {
        ParamError::Undefined { index: self.id.0 }
    }

    pub(crate) fn expect_type(&self, expected: ParamType) -> Result<(), ParamError> {
        if self.param_type() == expected {
            Ok(())
        } else {
            Err(self.mismatch(expected))
        }
    }

    // Setters return whether the slot became dirty.

    pub(crate) fn set_integer(&mut self, value: i32) -> Result<bool, ParamError> {
        let defined = self.defined;
        let Payload::Integer32(current) = &mut self.payload else {
            return Err(self.mismatch(ParamType::Integer32));
        };
        if defined && *current == value {
            return Ok(false);
        }
        *current = value;
        self.defined = true;
        Ok(true)
    }

    pub(crate) fn set_bitfield(
        &mut self,
        value: u32,
        value_mask: u32,
        interrupt_mask: u32,
    ) -> Result<bool, ParamError> {
        let Payload::BitField32(bits) = &mut self.payload else {
            return Err(self.mismatch(ParamType::BitField32));
        };
        let old = bits.value;
        bits.value |= value & value_mask;
        bits.value &= value | !value_mask;

        let mut dirty = false;
        if bits.value != old {
            bits.pending |= bits.value ^ old;
            dirty = true;
        }
        if interrupt_mask != 0 {
            bits.pending |= interrupt_mask;
            dirty = true;
        }
        self.defined = true;
        Ok(dirty)
    }

    #[allow(clippy::float_cmp)]
    pub(crate) fn set_float(&mut self, value: f64) -> Result<bool, ParamError> {
        let defined = self.defined;
        let Payload::Float64(current) = &mut self.payload else {
            return Err(self.mismatch(ParamType::Float64));
        };
        // NaN never compares equal, so a NaN write always notifies.
        if defined && *current == value {
            return Ok(false);
        }
        *current = value;
        self.defined = true;
        Ok(true)
    }

    pub(crate) fn set_text(&mut self, value: &str) -> Result<bool, ParamError> {
        let defined = self.defined;
        let Payload::Text(current) = &mut self.payload else {
            return Err(self.mismatch(ParamType::Text));
        };
        if defined && current == value {
            return Ok(false);
        }
        current.clear();
        current.push_str(value);
        self.defined = true;
        Ok(true)
    }

    pub(crate) fn integer(&self) -> Result<i32, ParamError> {
        match &self.payload {
            Payload::Integer32(v) if self.defined => Ok(*v),
            Payload::Integer32(_) => Err(self.undefined()),
            _ => Err(self.mismatch(ParamType::Integer32)),
        }
    }

    pub(crate) fn bitfield(&self, mask: u32) -> Result<u32, ParamError> {
        match &self.payload {
            Payload::BitField32(bits) if self.defined => Ok(bits.value & mask),
            Payload::BitField32(_) => Err(self.undefined()),
            _ => Err(self.mismatch(ParamType::BitField32)),
        }
    }

    pub(crate) fn float(&self) -> Result<f64, ParamError> {
        match &self.payload {
            Payload::Float64(v) if self.defined => Ok(*v),
            Payload::Float64(_) => Err(self.undefined()),
            _ => Err(self.mismatch(ParamType::Float64)),
        }
    }

    pub(crate) fn text(&self) -> Result<&str, ParamError> {
        match &self.payload {
            Payload::Text(v) if self.defined => Ok(v),
            Payload::Text(_) => Err(self.undefined()),
            _ => Err(self.mismatch(ParamType::Text)),
        }
    }

    fn bits_mut(&mut self) -> Result<&mut BitState, ParamError> {
        let err = self.mismatch(ParamType::BitField32);
        match &mut self.payload {
            Payload::BitField32(bits) => Ok(bits),
            _ => Err(err),
        }
    }

    pub(crate) fn bits(&self) -> Result<&BitState, ParamError> {
        match &self.payload {
            Payload::BitField32(bits) => Ok(bits),
            _ => Err(self.mismatch(ParamType::BitField32)),
        }
    }

    /// Current pending-callback mask, reset to zero.
    pub(crate) fn take_bit_pending(&mut self) -> u32 {
        match &mut self.payload {
            Payload::BitField32(bits) => std::mem::take(&mut bits.pending),
            _ => 0,
        }
    }

    pub(crate) fn set_bit_interrupt(&mut self, mask: u32, reason: InterruptReason) -> Result<(), ParamError> {
        let bits = self.bits_mut()?;
        match reason {
            InterruptReason::ZeroToOne => bits.rising = mask,
            InterruptReason::OneToZero => bits.falling = mask,
            InterruptReason::Both => {
                bits.rising = mask;
                bits.falling = mask;
            }
        }
        Ok(())
    }

    pub(crate) fn clear_bit_interrupt(&mut self, mask: u32) -> Result<(), ParamError> {
        let bits = self.bits_mut()?;
        bits.rising &= !mask;
        bits.falling &= !mask;
        Ok(())
    }

    pub(crate) fn bit_interrupt(&self, reason: InterruptReason) -> Result<u32, ParamError> {
        let bits = self.bits()?;
        Ok(match reason {
            InterruptReason::ZeroToOne => bits.rising,
            InterruptReason::OneToZero => bits.falling,
            InterruptReason::Both => bits.rising | bits.falling,
        })
    }

    // A status or alarm change re-notifies every bit of a bit field.
    fn force_all_bits(&mut self) {
        if let Payload::BitField32(bits) = &mut self.payload {
            bits.pending = u32::MAX;
        }
    }

    pub(crate) fn set_status(&mut self, status: IoStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.force_all_bits();
        true
    }

    pub(crate) fn set_alarm_status(&mut self, status: u16) -> bool {
        if self.alarm.status == status {
            return false;
        }
        self.alarm.status = status;
        self.force_all_bits();
        true
    }

    pub(crate) fn set_alarm_severity(&mut self, severity: AlarmSeverity) -> bool {
        if self.alarm.severity == severity {
            return false;
        }
        self.alarm.severity = severity;
        self.force_all_bits();
        true
    }

    /// Value rendered for reports; `None` while undefined or opaque.
    #[must_use]
    pub fn value_text(&self) -> Option<String> {
        if !self.defined {
            return None;
        }
        match &self.payload {
            Payload::Integer32(v) => Some(v.to_string()),
            Payload::BitField32(bits) => Some(format!("{:#x}", bits.value)),
            Payload::Float64(v) => Some(v.to_string()),
            Payload::Text(v) => Some(v.clone()),
            Payload::Opaque(_) => None,
        }
    }
}
