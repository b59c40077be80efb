//! Error types for paramcache.
//!
//! All errors are strongly typed using thiserror. Parameter errors are
//! local and non-fatal: they are returned to the immediate caller, who
//! decides whether to alarm on them. `Undefined` is the one expected
//! condition (a consumer polling before the first write) and is kept
//! distinguishable from programming errors.

use thiserror::Error;

use crate::value::ParamType;

/// Errors raised by typed slot access in a `ParameterStore`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("Bad parameter index {index}")]
    BadIndex {
        index: usize,
    },

    #[error("Parameter '{name}' already exists")]
    AlreadyExists {
        name: String,
    },

    #[error("Parameter '{name}' not found")]
    NotFound {
        name: String,
    },

    #[error("Parameter {index} has type {actual}, operation requires {expected}")]
    TypeMismatch {
        index: usize,
        expected: ParamType,
        actual: ParamType,
    },

    #[error("Parameter {index} value is undefined")]
    Undefined {
        index: usize,
    },
}

impl ParamError {
    /// Bad identities and type confusion indicate a bug in the caller.
    #[must_use]
    pub const fn is_programming_error(&self) -> bool {
        matches!(self, Self::BadIndex { .. } | Self::TypeMismatch { .. })
    }

    /// Returns true for read-before-first-write.
    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined { .. })
    }
}

/// Errors raised by `Port` construction and locking.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("Address {addr} out of range (max_addr: {max_addr})")]
    BadAddress {
        addr: usize,
        max_addr: usize,
    },

    #[error("Invalid port configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },

    #[error("Poisoned lock: {context}")]
    Poisoned {
        context: &'static str,
    },

    #[error("Failed to spawn worker: {message}")]
    Spawn {
        message: String,
    },
}

/// Errors raised by the relay scheduler and its transport seams.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Request submission failed: {message}")]
    QueueRequest {
        message: String,
    },

    #[error("Completion already running; re-entrant invocation refused")]
    Reentrant,

    #[error("No request is pending")]
    NoRequestPending,

    #[error("Queue '{path}' disconnected")]
    Disconnected {
        path: String,
    },

    #[error("Queue full (capacity: {capacity})")]
    QueueFull {
        capacity: usize,
    },
}

/// Top-level error type for paramcache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Parameter error: {0}")]
    Param(#[from] ParamError),

    #[error("Port error: {0}")]
    Port(#[from] PortError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl CacheError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a parameter error.
    #[must_use]
    pub const fn is_param(&self) -> bool {
        matches!(self, Self::Param(_))
    }

    /// Returns true if this is a port error.
    #[must_use]
    pub const fn is_port(&self) -> bool {
        matches!(self, Self::Port(_))
    }

    /// Returns true if this is a relay error.
    #[must_use]
    pub const fn is_relay(&self) -> bool {
        matches!(self, Self::Relay(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if callers should not raise an alarm for this error.
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        matches!(self, Self::Param(ParamError::Undefined { .. }))
    }
}

/// Result type alias for paramcache operations.
pub type CacheResult<T> = Result<T, CacheError>;
