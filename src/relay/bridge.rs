//! Listeners that feed subscriber updates into a completion scheduler.

use std::sync::{Arc, Mutex};

use crate::monitor::{Listener, Update};
use crate::param::SlotId;

use super::average::{round_to_i32, Averager};
use super::buffer::Snapshot;
use super::scheduler::CompletionScheduler;

/// Pushes an owned copy of every update into a scheduler.
///
/// Works for any channel whose value has an owned form: `i32`, `u32`, `f64`,
/// `str` (as `String`) and the array slices (as `Vec<_>`).
#[derive(Debug)]
pub struct RelayListener<T> {
    scheduler: Arc<CompletionScheduler<T>>,
}

impl<T> RelayListener<T> {
    #[must_use]
    pub fn new(scheduler: Arc<CompletionScheduler<T>>) -> Self {
        Self { scheduler }
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<CompletionScheduler<T>> {
        &self.scheduler
    }
}

impl<V, T> Listener<V> for RelayListener<T>
where
    V: ?Sized + ToOwned<Owned = T>,
    T: Send + 'static,
{
    fn notify(&self, update: &Update<'_, V>) {
        self.scheduler.push(
            Snapshot::new(update.value.to_owned())
                .with_timestamp(update.timestamp)
                .with_status(update.status)
                .with_alarm(update.alarm),
        );
    }
}

/// Averages every `n` numeric updates and pushes the mean.
///
/// The `i32` channel pushes means rounded half away from zero; the `f64`
/// channel pushes them unrounded.
#[derive(Debug)]
pub struct AveragingListener<T> {
    scheduler: Arc<CompletionScheduler<T>>,
    averager: Mutex<Averager>,
}

impl<T> AveragingListener<T> {
    #[must_use]
    pub fn new(scheduler: Arc<CompletionScheduler<T>>, reason: SlotId, every: usize) -> Self {
        Self {
            scheduler,
            averager: Mutex::new(Averager::new(reason, Some(every))),
        }
    }

    fn add(&self, sample: f64) -> Option<f64> {
        self.averager
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .add(sample)
    }
}

impl Listener<i32> for AveragingListener<i32> {
    fn notify(&self, update: &Update<'_, i32>) {
        if let Some(mean) = self.add(f64::from(*update.value)) {
            self.scheduler.push(
                Snapshot::new(round_to_i32(mean))
                    .with_timestamp(update.timestamp)
                    .with_status(update.status)
                    .with_alarm(update.alarm),
            );
        }
    }
}

impl Listener<f64> for AveragingListener<f64> {
    fn notify(&self, update: &Update<'_, f64>) {
        if let Some(mean) = self.add(*update.value) {
            self.scheduler.push(
                Snapshot::new(mean)
                    .with_timestamp(update.timestamp)
                    .with_status(update.status)
                    .with_alarm(update.alarm),
            );
        }
    }
}
