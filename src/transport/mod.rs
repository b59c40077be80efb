//! Seams to the external transport and record scheduler.
//!
//! The relay consumes two primitives from its environment: "submit a request
//! and call me back later" (`RequestQueue`) and "re-invoke my processing
//! entry point" (`ProcessTrigger`). Both are implemented for plain closures.
//! `WorkerQueue` is a bounded, single-threaded job runner that can back
//! either one; with the `tokio-transport` feature, `TokioRequestQueue` runs
//! requests on a tokio runtime instead.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::debug;

use crate::error::{CacheResult, PortError, RelayError};

/// Submits one asynchronous request whose completion is reported back
/// through `CompletionScheduler::complete_request`.
///
/// Called outside every scheduler lock. Must not block on the request.
pub trait RequestQueue: Send + Sync {
    /// # Errors
    ///
    /// `RelayError::QueueRequest` (or a queue error) if the request could
    /// not be submitted.
    fn queue_request(&self) -> Result<(), RelayError>;
}

impl<F> RequestQueue for F
where
    F: Fn() -> Result<(), RelayError> + Send + Sync,
{
    fn queue_request(&self) -> Result<(), RelayError> {
        self()
    }
}

/// Asks the consumer's scheduler to run the consumer again, possibly on
/// another thread.
pub trait ProcessTrigger: Send + Sync {
    fn request_process(&self);
}

impl<F> ProcessTrigger for F
where
    F: Fn() + Send + Sync,
{
    fn request_process(&self) {
        self();
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Cloneable submission side of a `WorkerQueue`.
#[derive(Clone)]
pub struct WorkerHandle {
    name: Arc<str>,
    tx: Sender<Job>,
    capacity: usize,
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("queued", &self.tx.len())
            .finish()
    }
}

impl WorkerHandle {
    /// Queues a job without blocking.
    ///
    /// # Errors
    ///
    /// `RelayError::QueueFull` or `RelayError::Disconnected`.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), RelayError> {
        match self.tx.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RelayError::QueueFull {
                capacity: self.capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(RelayError::Disconnected {
                path: self.name.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Bounded job queue drained by one named worker thread.
///
/// Dropping the queue closes its own sender; the worker finishes queued jobs
/// and exits once every `WorkerHandle` is gone as well.
#[derive(Debug)]
pub struct WorkerQueue {
    handle: WorkerHandle,
    worker: Option<JoinHandle<()>>,
}

impl WorkerQueue {
    /// Starts the worker thread `paramcache-{name}`.
    ///
    /// # Errors
    ///
    /// `PortError::Spawn` if the thread could not be created.
    pub fn start(name: &str, capacity: usize) -> CacheResult<Self> {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded::<Job>(capacity);
        let thread_name = format!("paramcache-{name}");
        let worker = thread::Builder::new()
            .name(thread_name)
            .spawn(move || worker_loop(&rx))
            .map_err(|e| PortError::Spawn { message: e.to_string() })?;
        Ok(Self {
            handle: WorkerHandle {
                name: Arc::from(name),
                tx,
                capacity,
            },
            worker: Some(worker),
        })
    }

    /// A submission handle; clone it into request and trigger closures.
    #[must_use]
    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    fn close(&mut self) {
        let (dummy_tx, _) = bounded::<Job>(1);
        drop(std::mem::replace(&mut self.handle.tx, dummy_tx));
    }

    /// Closes the queue and waits for the worker.
    ///
    /// Blocks until every outstanding `WorkerHandle` has been dropped and the
    /// queued jobs have run.
    pub fn shutdown(mut self) {
        self.close();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerQueue {
    fn drop(&mut self) {
        self.close();
        // Do not join: handles cloned into closures may outlive the queue,
        // and the worker exits once the last sender is dropped.
        drop(self.worker.take());
    }
}

fn worker_loop(rx: &Receiver<Job>) {
    let mut ran: u64 = 0;
    while let Ok(job) = rx.recv() {
        job();
        ran += 1;
    }
    debug!(jobs = ran, "worker queue drained");
}

/// Runs each request body on a tokio runtime's blocking pool.
#[cfg(feature = "tokio-transport")]
pub struct TokioRequestQueue {
    runtime: tokio::runtime::Handle,
    body: Arc<dyn Fn() + Send + Sync>,
}

#[cfg(feature = "tokio-transport")]
impl TokioRequestQueue {
    #[must_use]
    pub fn new(runtime: tokio::runtime::Handle, body: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self { runtime, body }
    }
}

#[cfg(feature = "tokio-transport")]
impl fmt::Debug for TokioRequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioRequestQueue").finish_non_exhaustive()
    }
}

#[cfg(feature = "tokio-transport")]
impl RequestQueue for TokioRequestQueue {
    fn queue_request(&self) -> Result<(), RelayError> {
        let body = Arc::clone(&self.body);
        drop(self.runtime.spawn_blocking(move || body()));
        Ok(())
    }
}
