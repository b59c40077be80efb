//! Process-wide readiness gate.
//!
//! Dispatch is suppressed until the gate opens. Opening is a one-way
//! transition; each watcher registered before or after it receives exactly
//! one signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender};

#[derive(Debug, Default)]
struct GateState {
    open: AtomicBool,
    watchers: Mutex<Vec<Sender<()>>>,
}

/// Shared readiness flag with one-shot open notifications.
///
/// Clones share the same flag. A port built with a gate performs one
/// catch-up dispatch over every address when the gate opens.
#[derive(Debug, Clone, Default)]
pub struct ReadinessGate {
    inner: Arc<GateState>,
}

impl ReadinessGate {
    /// A closed gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A gate that is already open, for callers with no startup phase.
    #[must_use]
    pub fn opened() -> Self {
        let gate = Self::new();
        gate.inner.open.store(true, Ordering::Release);
        gate
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Opens the gate. Returns true only for the call that performed the
    /// transition; that call signals every registered watcher.
    pub fn open(&self) -> bool {
        if self.inner.open.swap(true, Ordering::AcqRel) {
            return false;
        }
        let watchers = {
            let mut guard = self.inner.watchers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        for tx in watchers {
            // Receiver may already be gone; nothing to do then.
            let _ = tx.try_send(());
        }
        true
    }

    /// Closes the gate again (test and teardown use). Watchers registered
    /// afterwards wait for the next `open`.
    pub fn close(&self) {
        self.inner.open.store(false, Ordering::Release);
    }

    /// Returns a receiver that yields one `()` when the gate is open.
    ///
    /// If the gate is already open the signal is immediately available.
    #[must_use]
    pub fn watch(&self) -> Receiver<()> {
        let (tx, rx) = bounded(1);
        let mut guard = self.inner.watchers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        // Checked under the watcher lock so a concurrent `open` cannot slip
        // between the check and the registration.
        if self.is_open() {
            let _ = tx.try_send(());
        } else {
            guard.push(tx);
        }
        rx
    }
}
