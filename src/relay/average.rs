//! Sample averaging between consumer reads.
//!
//! In relay mode every `n`-th sample yields the mean of the last `n`, ready
//! to be pushed into a relay. In polled mode the consumer takes the mean of
//! everything accumulated since its previous read.

use crate::error::ParamError;
use crate::param::SlotId;

/// Running sum and count for one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Averager {
    reason: SlotId,
    every: Option<usize>,
    sum: f64,
    count: usize,
}

impl Averager {
    /// `every = Some(n)` emits a mean every `n` samples (`n` of 0 is treated
    /// as 1); `None` accumulates until `take`.
    #[must_use]
    pub fn new(reason: SlotId, every: Option<usize>) -> Self {
        Self {
            reason,
            every: every.map(|n| n.max(1)),
            sum: 0.0,
            count: 0,
        }
    }

    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Adds a sample. In relay mode returns the mean once `n` samples have
    /// accumulated, and starts over.
    pub fn add(&mut self, sample: f64) -> Option<f64> {
        self.sum += sample;
        self.count += 1;
        match self.every {
            Some(n) if self.count >= n => Some(self.drain()),
            _ => None,
        }
    }

    /// Mean of the samples since the last read.
    ///
    /// # Errors
    ///
    /// `ParamError::Undefined` if no sample arrived.
    pub fn take(&mut self) -> Result<f64, ParamError> {
        if self.count == 0 {
            return Err(ParamError::Undefined {
                index: self.reason.index(),
            });
        }
        Ok(self.drain())
    }

    #[allow(clippy::cast_precision_loss)]
    fn drain(&mut self) -> f64 {
        let mean = self.sum / self.count as f64;
        self.sum = 0.0;
        self.count = 0;
        mean
    }
}

/// Rounds a mean to the nearest integer, halves away from zero, saturating
/// at the `i32` range.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn round_to_i32(mean: f64) -> i32 {
    mean.round() as i32
}
