use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::sequencer::SequenceError;

/// Parameters of a single sequencing run.
///
/// With a positive `interval`, `start` is the beginning of the captured range
/// and frames move forward in time. With a negative `interval`, `start` is the
/// end of the range and frames walk backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceConfig {
    pub start:           DateTime<Utc>,
    pub interval:        TimeDelta,
    pub start_padding:   TimeDelta,
    pub end_padding:     TimeDelta,
    /// Worker `n` waits `worker_delay * n` before taking its first frame.
    pub worker_delay:    Duration,
    pub max_concurrency: usize,
}

impl SequenceConfig {
    #[inline]
    pub fn new(start: DateTime<Utc>, interval: TimeDelta) -> Self {
        Self {
            start,
            interval,
            ..Default::default()
        }
    }

    #[inline]
    pub fn validate(&self) -> Result<(), SequenceError> {
        if self.max_concurrency == 0 {
            return Err(SequenceError::NoWorkers);
        }

        Ok(())
    }

    /// Number of workers a run over `frames` frames will start.
    #[inline]
    pub fn workers_for(&self, frames: usize) -> usize {
        self.max_concurrency.min(frames)
    }
}

impl Default for SequenceConfig {
    #[inline]
    fn default() -> Self {
        Self {
            start:           DateTime::<Utc>::UNIX_EPOCH,
            interval:        TimeDelta::minutes(5),
            start_padding:   TimeDelta::zero(),
            end_padding:     TimeDelta::zero(),
            worker_delay:    Duration::from_secs(2),
            max_concurrency: 5,
        }
    }
}
