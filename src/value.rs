//! Type tags and status codes carried by every slot.
//!
//! A slot's value kind is fixed at registration by its `ParamType`. Each
//! slot also carries an I/O status and an alarm (status + severity) that
//! travel with the value to subscribers and through relay buffers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Value kind of a slot.
///
/// Scalar kinds hold their value in the cache. Array and generic kinds are
/// opaque references: the store tracks only identity, status and alarm,
/// and the buffer itself is supplied by the caller on each publish.
///
/// # Examples
///
/// ```
/// use paramcache::ParamType;
///
/// assert!(ParamType::Float64.is_scalar());
/// assert!(ParamType::Int16Array.is_opaque());
/// assert_eq!(ParamType::BitField32.to_string(), "BitField32");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Integer32,
    BitField32,
    Float64,
    Text,
    Int8Array,
    Int16Array,
    Int32Array,
    Float32Array,
    Float64Array,
    GenericPointer,
}

impl ParamType {
    /// All kinds, in registry order.
    pub const ALL: [Self; 10] = [
        Self::Integer32,
        Self::BitField32,
        Self::Float64,
        Self::Text,
        Self::Int8Array,
        Self::Int16Array,
        Self::Int32Array,
        Self::Float32Array,
        Self::Float64Array,
        Self::GenericPointer,
    ];

    /// Returns true if the cache stores values of this kind.
    #[must_use]
    pub const fn is_scalar(self) -> bool {
        matches!(self, Self::Integer32 | Self::BitField32 | Self::Float64 | Self::Text)
    }

    /// Returns true if values of this kind are owned by the caller.
    #[must_use]
    pub const fn is_opaque(self) -> bool {
        !self.is_scalar()
    }

    /// Stable name used in reports and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Integer32 => "Integer32",
            Self::BitField32 => "BitField32",
            Self::Float64 => "Float64",
            Self::Text => "Text",
            Self::Int8Array => "Int8Array",
            Self::Int16Array => "Int16Array",
            Self::Int32Array => "Int32Array",
            Self::Float32Array => "Float32Array",
            Self::Float64Array => "Float64Array",
            Self::GenericPointer => "GenericPointer",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the last I/O that produced a slot's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoStatus {
    #[default]
    Success,
    Timeout,
    Overflow,
    Error,
    Disconnected,
    Disabled,
}

impl IoStatus {
    /// Returns true for `Success`.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Alarm severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmSeverity {
    #[default]
    NoAlarm,
    Minor,
    Major,
    Invalid,
}

/// Alarm condition attached to a value.
///
/// `status` is an opaque condition code owned by the consumer's alarm
/// vocabulary; zero means no alarm condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Alarm {
    pub status: u16,
    pub severity: AlarmSeverity,
}

impl Alarm {
    /// No alarm condition.
    pub const NONE: Self = Self {
        status: 0,
        severity: AlarmSeverity::NoAlarm,
    };

    #[must_use]
    pub const fn new(status: u16, severity: AlarmSeverity) -> Self {
        Self { status, severity }
    }

    /// Returns true if the alarm is raised at any severity.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.severity > AlarmSeverity::NoAlarm
    }
}

/// Which edge of a bit-field transition a consumer wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptReason {
    ZeroToOne,
    OneToZero,
    Both,
}
