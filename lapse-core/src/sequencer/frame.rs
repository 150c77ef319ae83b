use chrono::{DateTime, TimeDelta, Utc};

use crate::{sequencer::SequenceError, settings::SequenceConfig};

/// One time window of a sequence, identified by its 1-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub index: u32,
    pub start: DateTime<Utc>,
    pub end:   DateTime<Utc>,
}

impl Frame {
    /// Computes the window of frame `index`.
    ///
    /// The unpadded window always runs forward in time, even with a negative
    /// interval. Padding is applied after that and is not re-normalized, so
    /// the result can still come out inverted; [`Frame::is_inverted`] reports
    /// that case.
    #[inline]
    pub fn compute(index: u32, config: &SequenceConfig) -> Result<Self, SequenceError> {
        if index == 0 {
            return Err(SequenceError::InvalidFrame {
                index,
            });
        }
        let out_of_range = || SequenceError::WindowOutOfRange {
            index,
        };

        let steps = i32::try_from(index - 1).map_err(|_| out_of_range())?;
        let offset = config.interval.checked_mul(steps).ok_or_else(out_of_range)?;
        let mut start = config.start.checked_add_signed(offset).ok_or_else(out_of_range)?;
        let mut end = start.checked_add_signed(config.interval).ok_or_else(out_of_range)?;

        if start > end {
            std::mem::swap(&mut start, &mut end);
        }

        Ok(Self {
            index,
            start: start.checked_add_signed(config.start_padding).ok_or_else(out_of_range)?,
            end: end.checked_add_signed(config.end_padding).ok_or_else(out_of_range)?,
        })
    }

    #[inline]
    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    #[inline]
    pub fn is_inverted(&self) -> bool {
        self.start > self.end
    }
}

/// Expands the inclusive range `first..=last` into frame indices.
#[inline]
pub fn frame_range(first: u32, last: u32) -> Result<Vec<u32>, SequenceError> {
    if first < 1 || first > last {
        return Err(SequenceError::MalformedRange {
            first,
            last,
        });
    }

    Ok((first..=last).collect())
}
