//! Port: per-address parameter stores behind one lock.
//!
//! A `Port` owns one `ParameterStore` per address, the dispatch engine, and
//! a current timestamp. All mutation and dispatch goes through a
//! `PortGuard`, so a caller can make a sequence such as set-then-dispatch
//! appear atomic. A named background thread waits for the readiness gate and
//! performs the catch-up pass over every address when it opens.

/// Readiness gate shared by ports.
pub mod gate;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{CacheError, CacheResult, ParamError, PortError};
use crate::monitor::{
    DispatchEngine, DispatchStats, Listener, ListenerKind, OpaqueKind, Subscription, SubscriptionFilter,
    SubscriptionRegistry, Update,
};
use crate::param::{ParameterStore, SlotId, StoreReport};
use crate::value::{Alarm, AlarmSeverity, InterruptReason, IoStatus, ParamType};

pub use gate::ReadinessGate;

/// Port configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Port name, used in thread names and log fields.
    pub name: String,
    /// Number of addresses; valid addresses are `0..max_addr`.
    pub max_addr: usize,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            name: "port".to_string(),
            max_addr: 1,
        }
    }
}

impl PortConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, max_addr: usize) -> Self {
        Self {
            name: name.into(),
            max_addr,
        }
    }

    /// Parses a JSON object; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// `PortError::InvalidConfig` on malformed JSON or a failed `validate`.
    pub fn from_json(json: &str) -> CacheResult<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| PortError::InvalidConfig {
            reason: format!("invalid port config: {e}"),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    ///
    /// `PortError::InvalidConfig` for an empty name or zero addresses.
    pub fn validate(&self) -> Result<(), PortError> {
        if self.name.trim().is_empty() {
            return Err(PortError::InvalidConfig {
                reason: "port name must not be empty".to_string(),
            });
        }
        if self.max_addr == 0 {
            return Err(PortError::InvalidConfig {
                reason: "max_addr must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
struct PortState {
    stores: Vec<ParameterStore>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct Shared {
    name: String,
    state: Mutex<PortState>,
    engine: DispatchEngine,
}

/// A set of per-address parameter stores sharing one lock and one
/// subscriber registry.
#[derive(Debug)]
pub struct Port {
    shared: Arc<Shared>,
    shutdown_tx: Option<Sender<()>>,
    catch_up: Option<JoinHandle<()>>,
}

impl Port {
    /// Creates the port and starts its catch-up thread.
    ///
    /// # Errors
    ///
    /// `PortError::InvalidConfig` or `PortError::Spawn`.
    pub fn new(config: PortConfig, gate: ReadinessGate) -> CacheResult<Self> {
        config.validate()?;

        let engine = DispatchEngine::new(Arc::new(SubscriptionRegistry::new()), gate.clone());
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            state: Mutex::new(PortState {
                stores: (0..config.max_addr).map(|_| ParameterStore::new()).collect(),
                timestamp: Utc::now(),
            }),
            engine,
        });

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let ready_rx = gate.watch();
        let weak = Arc::downgrade(&shared);
        let catch_up = thread::Builder::new()
            .name(format!("paramcache-catchup-{}", config.name))
            .spawn(move || catch_up_loop(&weak, &ready_rx, &shutdown_rx))
            .map_err(|e| PortError::Spawn { message: e.to_string() })?;

        Ok(Self {
            shared,
            shutdown_tx: Some(shutdown_tx),
            catch_up: Some(catch_up),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[must_use]
    pub fn gate(&self) -> &ReadinessGate {
        self.shared.engine.gate()
    }

    /// Subscriber registry; usable without the port lock.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        self.shared.engine.registry()
    }

    pub fn subscribe<V: ListenerKind + ?Sized>(
        &self,
        filter: SubscriptionFilter,
        listener: Arc<dyn Listener<V>>,
    ) -> Subscription {
        self.registry().subscribe::<V>(filter, listener)
    }

    pub fn subscribe_fn<V, F>(&self, filter: SubscriptionFilter, f: F) -> Subscription
    where
        V: ListenerKind + ?Sized,
        F: Fn(&Update<'_, V>) + Send + Sync + 'static,
    {
        self.registry().subscribe_fn::<V, F>(filter, f)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.registry().unsubscribe(subscription)
    }

    /// Takes the port lock.
    ///
    /// Listeners run while the lock is held; calling `lock` from inside a
    /// listener of the same port deadlocks.
    ///
    /// # Errors
    ///
    /// `PortError::Poisoned` if a previous holder panicked.
    pub fn lock(&self) -> CacheResult<PortGuard<'_>> {
        let guard = self.shared.state.lock().map_err(|_| PortError::Poisoned {
            context: "port state",
        })?;
        Ok(PortGuard {
            name: &self.shared.name,
            engine: &self.shared.engine,
            state: guard,
        })
    }

    /// Diagnostics for every address plus subscriber counts.
    ///
    /// # Errors
    ///
    /// `PortError::Poisoned`.
    pub fn report(&self) -> CacheResult<PortReport> {
        let guard = self.lock()?;
        Ok(PortReport {
            name: self.shared.name.clone(),
            timestamp: guard.state.timestamp,
            addresses: guard.state.stores.iter().map(ParameterStore::report).collect(),
            subscribers: self.registry().counts(),
        })
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        // Closing the shutdown channel wakes the catch-up thread if the gate
        // never opened.
        drop(self.shutdown_tx.take());
        if let Some(handle) = self.catch_up.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn catch_up_loop(shared: &Weak<Shared>, ready: &Receiver<()>, shutdown: &Receiver<()>) {
    select! {
        recv(ready) -> msg => {
            if msg.is_err() {
                return;
            }
        }
        recv(shutdown) -> _ => return,
    }

    let Some(shared) = shared.upgrade() else {
        return;
    };
    let Ok(mut guard) = shared.state.lock() else {
        error!(port = %shared.name, "catch-up dispatch skipped: port lock poisoned");
        return;
    };
    let state = &mut *guard;
    let timestamp = state.timestamp;
    let mut delivered = 0;
    for (addr, store) in state.stores.iter_mut().enumerate() {
        delivered += shared.engine.dispatch(store, addr, timestamp).delivered;
    }
    debug!(port = %shared.name, addresses = state.stores.len(), delivered, "catch-up dispatch complete");
}

/// Locked access to a port's stores.
pub struct PortGuard<'a> {
    name: &'a str,
    engine: &'a DispatchEngine,
    state: MutexGuard<'a, PortState>,
}

impl fmt::Debug for PortGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortGuard")
            .field("name", &self.name)
            .field("addresses", &self.state.stores.len())
            .finish()
    }
}

fn logged<T>(port: &str, op: &'static str, addr: usize, result: Result<T, ParamError>) -> CacheResult<T> {
    result.map_err(|err| {
        match &err {
            ParamError::Undefined { .. } | ParamError::NotFound { .. } => {
                debug!(port, addr, op, error = %err, "parameter access failed");
            }
            _ => {
                error!(port, addr, op, error = %err, "parameter access failed");
            }
        }
        CacheError::from(err)
    })
}

impl PortGuard<'_> {
    /// Number of addresses.
    #[must_use]
    pub fn max_addr(&self) -> usize {
        self.state.stores.len()
    }

    /// Store for one address.
    ///
    /// # Errors
    ///
    /// `PortError::BadAddress`.
    pub fn store(&self, addr: usize) -> CacheResult<&ParameterStore> {
        let max_addr = self.max_addr();
        self.state
            .stores
            .get(addr)
            .ok_or_else(|| PortError::BadAddress { addr, max_addr }.into())
    }

    fn store_mut(&mut self, addr: usize) -> CacheResult<&mut ParameterStore> {
        let max_addr = self.max_addr();
        self.state
            .stores
            .get_mut(addr)
            .ok_or_else(|| PortError::BadAddress { addr, max_addr }.into())
    }

    /// Registers a slot at every address. The identity is the same at all
    /// addresses.
    ///
    /// # Errors
    ///
    /// `ParamError::AlreadyExists` if the name is taken.
    pub fn create_param(&mut self, name: &str, ty: ParamType) -> CacheResult<SlotId> {
        let port = self.name;
        let mut id = None;
        for (addr, store) in self.state.stores.iter_mut().enumerate() {
            let registered = logged(port, "create_param", addr, store.register(name, ty))?;
            debug_assert!(id.map_or(true, |prev| prev == registered));
            id = Some(registered);
        }
        id.ok_or_else(|| CacheError::internal("port has no addresses"))
    }

    /// # Errors
    ///
    /// `PortError::BadAddress` or `ParamError::NotFound`.
    pub fn find_param(&self, addr: usize, name: &str) -> CacheResult<SlotId> {
        logged(self.name, "find_param", addr, self.store(addr)?.find(name))
    }

    pub fn set_integer(&mut self, addr: usize, id: SlotId, value: i32) -> CacheResult<()> {
        let result = self.store_mut(addr)?.set_integer(id, value);
        logged(self.name, "set_integer", addr, result)
    }

    pub fn set_bitfield(
        &mut self,
        addr: usize,
        id: SlotId,
        value: u32,
        value_mask: u32,
        interrupt_mask: u32,
    ) -> CacheResult<()> {
        let result = self.store_mut(addr)?.set_bitfield(id, value, value_mask, interrupt_mask);
        logged(self.name, "set_bitfield", addr, result)
    }

    pub fn set_float(&mut self, addr: usize, id: SlotId, value: f64) -> CacheResult<()> {
        let result = self.store_mut(addr)?.set_float(id, value);
        logged(self.name, "set_float", addr, result)
    }

    pub fn set_text(&mut self, addr: usize, id: SlotId, value: &str) -> CacheResult<()> {
        let result = self.store_mut(addr)?.set_text(id, value);
        logged(self.name, "set_text", addr, result)
    }

    pub fn get_integer(&self, addr: usize, id: SlotId) -> CacheResult<i32> {
        logged(self.name, "get_integer", addr, self.store(addr)?.get_integer(id))
    }

    pub fn get_bitfield(&self, addr: usize, id: SlotId, mask: u32) -> CacheResult<u32> {
        logged(self.name, "get_bitfield", addr, self.store(addr)?.get_bitfield(id, mask))
    }

    pub fn get_float(&self, addr: usize, id: SlotId) -> CacheResult<f64> {
        logged(self.name, "get_float", addr, self.store(addr)?.get_float(id))
    }

    pub fn get_text(&self, addr: usize, id: SlotId) -> CacheResult<&str> {
        logged(self.name, "get_text", addr, self.store(addr)?.get_text(id))
    }

    pub fn set_status(&mut self, addr: usize, id: SlotId, status: IoStatus) -> CacheResult<()> {
        let result = self.store_mut(addr)?.set_status(id, status);
        logged(self.name, "set_status", addr, result)
    }

    pub fn get_status(&self, addr: usize, id: SlotId) -> CacheResult<IoStatus> {
        logged(self.name, "get_status", addr, self.store(addr)?.get_status(id))
    }

    pub fn set_alarm_status(&mut self, addr: usize, id: SlotId, status: u16) -> CacheResult<()> {
        let result = self.store_mut(addr)?.set_alarm_status(id, status);
        logged(self.name, "set_alarm_status", addr, result)
    }

    pub fn get_alarm_status(&self, addr: usize, id: SlotId) -> CacheResult<u16> {
        logged(self.name, "get_alarm_status", addr, self.store(addr)?.get_alarm_status(id))
    }

    pub fn set_alarm_severity(&mut self, addr: usize, id: SlotId, severity: AlarmSeverity) -> CacheResult<()> {
        let result = self.store_mut(addr)?.set_alarm_severity(id, severity);
        logged(self.name, "set_alarm_severity", addr, result)
    }

    pub fn get_alarm_severity(&self, addr: usize, id: SlotId) -> CacheResult<AlarmSeverity> {
        logged(self.name, "get_alarm_severity", addr, self.store(addr)?.get_alarm_severity(id))
    }

    pub fn get_alarm(&self, addr: usize, id: SlotId) -> CacheResult<Alarm> {
        logged(self.name, "get_alarm", addr, self.store(addr)?.get_alarm(id))
    }

    pub fn set_bit_interrupt(&mut self, addr: usize, id: SlotId, mask: u32, reason: InterruptReason) -> CacheResult<()> {
        let result = self.store_mut(addr)?.set_bit_interrupt(id, mask, reason);
        logged(self.name, "set_bit_interrupt", addr, result)
    }

    pub fn clear_bit_interrupt(&mut self, addr: usize, id: SlotId, mask: u32) -> CacheResult<()> {
        let result = self.store_mut(addr)?.clear_bit_interrupt(id, mask);
        logged(self.name, "clear_bit_interrupt", addr, result)
    }

    pub fn get_bit_interrupt(&self, addr: usize, id: SlotId, reason: InterruptReason) -> CacheResult<u32> {
        logged(self.name, "get_bit_interrupt", addr, self.store(addr)?.get_bit_interrupt(id, reason))
    }

    /// Current port timestamp, stamped onto every delivered update.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.state.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.state.timestamp = timestamp;
    }

    /// Sets the port timestamp to now.
    pub fn update_timestamp(&mut self) -> DateTime<Utc> {
        self.state.timestamp = Utc::now();
        self.state.timestamp
    }

    /// Fans the dirty slots of one address out to subscribers.
    ///
    /// # Errors
    ///
    /// `PortError::BadAddress`.
    pub fn dispatch(&mut self, addr: usize) -> CacheResult<DispatchStats> {
        let timestamp = self.state.timestamp;
        let engine = self.engine;
        let store = self.store_mut(addr)?;
        Ok(engine.dispatch(store, addr, timestamp))
    }

    /// Runs `dispatch` for every address and sums the counters.
    pub fn dispatch_all(&mut self) -> DispatchStats {
        let timestamp = self.state.timestamp;
        let engine = self.engine;
        let mut total = DispatchStats::default();
        for (addr, store) in self.state.stores.iter_mut().enumerate() {
            let stats = engine.dispatch(store, addr, timestamp);
            total.ran |= stats.ran;
            total.visited += stats.visited;
            total.skipped += stats.skipped;
            total.delivered += stats.delivered;
        }
        total
    }

    /// Delivers a caller-owned array or generic value for slot `id`.
    ///
    /// # Errors
    ///
    /// `PortError::BadAddress`, `ParamError::BadIndex` or
    /// `ParamError::TypeMismatch`.
    pub fn publish<V: OpaqueKind + ?Sized>(&self, addr: usize, id: SlotId, value: &V) -> CacheResult<usize> {
        let store = self.store(addr)?;
        let result = self.engine.publish::<V>(store, addr, id, value, self.state.timestamp);
        logged(self.name, "publish", addr, result)
    }
}

/// Diagnostics for a whole port.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortReport {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub addresses: Vec<StoreReport>,
    pub subscribers: Vec<(ParamType, usize)>,
}

impl fmt::Display for PortReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Port {} timestamp {}", self.name, self.timestamp.to_rfc3339())?;
        for (ty, n) in self.subscribers.iter().filter(|(_, n)| *n > 0) {
            writeln!(f, "  {ty} subscribers: {n}")?;
        }
        for (addr, report) in self.addresses.iter().enumerate() {
            writeln!(f, "Parameter list {addr}")?;
            write!(f, "{report}")?;
        }
        Ok(())
    }
}
