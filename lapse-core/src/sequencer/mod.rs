use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;
use tracing::{debug, error, info, trace};

pub use crate::sequencer::{
    frame::{frame_range, Frame},
    outcome::{FrameError, Outcome, RenderError, SequenceReport},
};
use crate::settings::SequenceConfig;

mod frame;
mod outcome;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Raw response of the render capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResponse {
    pub bytes:  Vec<u8>,
    pub status: u16,
}

impl RenderResponse {
    #[inline]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Renders every frame of a sequence through a bounded pool of workers.
///
/// `render` receives the window of a frame and `save` receives the rendered
/// bytes along with the frame index. Both are called from several worker
/// threads at once.
pub struct FrameSequencer<R, S> {
    config:    SequenceConfig,
    render:    R,
    save:      S,
    cancelled: Option<Arc<AtomicBool>>,
}

impl<R, S> FrameSequencer<R, S>
where
    R: Fn(DateTime<Utc>, DateTime<Utc>) -> Result<RenderResponse, RenderError> + Sync,
    S: Fn(&[u8], u32) -> anyhow::Result<()> + Sync,
{
    #[inline]
    pub fn new(config: SequenceConfig, render: R, save: S) -> Self {
        Self {
            config,
            render,
            save,
            cancelled: None,
        }
    }

    /// Once `cancelled` is set, frames that have not started rendering are
    /// reported as [`FrameError::Cancelled`] instead of being rendered.
    #[inline]
    #[must_use]
    pub fn with_cancellation(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(cancelled);
        self
    }

    #[inline]
    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    /// Computes and validates the window of every frame.
    #[inline]
    pub fn frames(&self, indices: &[u32]) -> Result<Vec<Frame>, SequenceError> {
        indices
            .iter()
            .map(|&index| {
                let frame = Frame::compute(index, &self.config)?;
                if frame.is_inverted() {
                    return Err(SequenceError::InvertedWindow {
                        index,
                        start: frame.start,
                        end: frame.end,
                    });
                }
                Ok(frame)
            })
            .collect()
    }

    /// Renders and saves every frame in `indices`, blocking until each one has
    /// produced an [`Outcome`].
    ///
    /// Only configuration problems are returned as errors, and always before
    /// the first render. Failed frames are logged and left in the report.
    #[tracing::instrument(level = "debug", skip(self, indices), fields(frames = indices.len()))]
    #[inline]
    pub fn run(&self, indices: &[u32]) -> Result<SequenceReport, SequenceError> {
        self.config.validate()?;
        let frames = self.frames(indices)?;
        let total = frames.len();
        if total == 0 {
            return Ok(SequenceReport::default());
        }

        let started = Instant::now();
        let workers = self.config.workers_for(total);
        let (job_tx, job_rx) = crossbeam_channel::bounded(total);
        let (outcome_tx, outcome_rx) = crossbeam_channel::bounded(total);
        for frame in frames {
            // `job_rx` is held below and the queue fits every frame.
            let _ = job_tx.send(frame);
        }
        drop(job_tx);

        info!("Rendering {} frames with {} workers", total, workers);

        let outcomes = thread::scope(|s| {
            for worker in 0..workers {
                let job_rx = job_rx.clone();
                let outcome_tx = outcome_tx.clone();
                s.spawn(move || self.render_worker(worker, &job_rx, &outcome_tx));
            }
            // Workers hold the only senders, so a dead pool ends collection
            // instead of blocking forever.
            drop(outcome_tx);

            let mut outcomes = Vec::with_capacity(total);
            for outcome in outcome_rx.iter().take(total) {
                match &outcome.result {
                    Ok(()) => debug!(
                        "Frame {} completed by worker {} ({}/{})",
                        outcome.frame,
                        outcome.worker,
                        outcomes.len() + 1,
                        total
                    ),
                    Err(err) => error!("{}", err),
                }
                outcomes.push(outcome);
            }
            outcomes
        });

        let report = SequenceReport {
            workers,
            outcomes,
            elapsed: started.elapsed(),
        };
        info!(
            "Sequence finished in {:.3} seconds: {}/{} frames saved",
            report.elapsed.as_secs_f64(),
            report.succeeded(),
            total
        );

        Ok(report)
    }

    fn render_worker(&self, worker: usize, jobs: &Receiver<Frame>, outcomes: &Sender<Outcome>) {
        let delay = stagger(self.config.worker_delay, worker);
        if !delay.is_zero() {
            trace!("Worker {} waiting {:?} before starting", worker, delay);
            self.wait(delay);
        }

        for frame in jobs {
            let started = Instant::now();
            let result = if self.is_cancelled() {
                Err(FrameError::Cancelled {
                    frame: frame.index,
                })
            } else {
                self.process(worker, &frame, started)
            };

            let outcome = Outcome {
                frame: frame.index,
                worker,
                elapsed: started.elapsed(),
                result,
            };
            if outcomes.send(outcome).is_err() {
                // Collector is gone; nobody is left to report to.
                return;
            }
        }

        trace!("Worker {} done", worker);
    }

    fn process(&self, worker: usize, frame: &Frame, started: Instant) -> Result<(), FrameError> {
        debug!(
            "Worker {} rendering frame {} ({} to {})",
            worker, frame.index, frame.start, frame.end
        );

        let response = (self.render)(frame.start, frame.end).map_err(|source| {
            FrameError::Render {
                frame: frame.index,
                worker,
                source,
            }
        })?;
        if !response.is_success() {
            return Err(FrameError::Status {
                frame: frame.index,
                worker,
                status: response.status,
            });
        }

        debug!(
            "Frame {} rendered in {:.3} seconds ({} bytes)",
            frame.index,
            started.elapsed().as_secs_f64(),
            response.bytes.len()
        );

        (self.save)(&response.bytes, frame.index).map_err(|err| FrameError::Save {
            frame:  frame.index,
            source: err.into(),
        })
    }

    /// Sleeps for `delay`, waking early once the run is cancelled.
    fn wait(&self, delay: Duration) {
        let started = Instant::now();
        while !self.is_cancelled() {
            let remaining = delay.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return;
            }
            thread::sleep(remaining.min(CANCEL_POLL_INTERVAL));
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.as_ref().is_some_and(|cancelled| cancelled.load(Ordering::Relaxed))
    }
}

fn stagger(delay: Duration, worker: usize) -> Duration {
    delay.saturating_mul(u32::try_from(worker).unwrap_or(u32::MAX))
}

#[derive(Debug, Clone, Error)]
pub enum SequenceError {
    #[error("frame index must be 1 or higher, got {index}")]
    InvalidFrame { index: u32 },
    #[error("malformed sequence: frames {first} to {last}")]
    MalformedRange { first: u32, last: u32 },
    #[error("must have at least one worker")]
    NoWorkers,
    #[error("padding inverts the window of frame {index}: {start} is after {end}")]
    InvertedWindow {
        index: u32,
        start: DateTime<Utc>,
        end:   DateTime<Utc>,
    },
    #[error("window of frame {index} is out of the representable time range")]
    WindowOutOfRange { index: u32 },
}
