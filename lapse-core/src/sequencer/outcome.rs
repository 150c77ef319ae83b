use std::{error::Error as StdError, time::Duration};

use thiserror::Error;

/// Result of driving one frame through render and save.
#[derive(Debug)]
pub struct Outcome {
    pub frame:   u32,
    pub worker:  usize,
    pub elapsed: Duration,
    pub result:  Result<(), FrameError>,
}

impl Outcome {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Everything a finished run produced, in completion order.
#[derive(Debug, Default)]
pub struct SequenceReport {
    pub workers:  usize,
    pub outcomes: Vec<Outcome>,
    pub elapsed:  Duration,
}

impl SequenceReport {
    #[inline]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_success()).count()
    }

    #[inline]
    pub fn failures(&self) -> impl Iterator<Item = &FrameError> {
        self.outcomes.iter().filter_map(|outcome| outcome.result.as_ref().err())
    }

    /// Indices of the frames that did not make it to disk, ascending.
    #[inline]
    pub fn failed_frames(&self) -> Vec<u32> {
        let mut frames = self.failures().map(FrameError::frame).collect::<Vec<_>>();
        frames.sort_unstable();
        frames
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(Outcome::is_success)
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("worker {worker} failed to render frame {frame}: {source}")]
    Render {
        frame:  u32,
        worker: usize,
        #[source]
        source: RenderError,
    },
    #[error("worker {worker} failed to render frame {frame}: code {status}")]
    Status {
        frame:  u32,
        worker: usize,
        status: u16,
    },
    #[error("failed to save frame {frame}: {source}")]
    Save {
        frame:  u32,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("frame {frame} skipped: sequence cancelled")]
    Cancelled { frame: u32 },
}

impl FrameError {
    #[inline]
    pub fn frame(&self) -> u32 {
        match self {
            FrameError::Render {
                frame, ..
            }
            | FrameError::Status {
                frame, ..
            }
            | FrameError::Save {
                frame, ..
            }
            | FrameError::Cancelled {
                frame,
            } => *frame,
        }
    }

    /// HTTP status reported by the renderer, if it got that far.
    #[inline]
    pub fn status(&self) -> Option<u16> {
        match self {
            FrameError::Render {
                source, ..
            } => source.status(),
            FrameError::Status {
                status, ..
            } => Some(*status),
            FrameError::Save {
                ..
            }
            | FrameError::Cancelled {
                ..
            } => None,
        }
    }
}

/// Failure of the render capability itself, as opposed to an unsuccessful
/// response.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{0}")]
    Transport(#[source] Box<dyn StdError + Send + Sync>),
    #[error("{message}")]
    Backend {
        status:  Option<u16>,
        message: String,
    },
}

impl RenderError {
    /// Wraps whatever the renderer's transport reported.
    #[inline]
    pub fn transport(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        RenderError::Transport(err.into())
    }

    #[inline]
    pub fn backend(message: impl Into<String>) -> Self {
        RenderError::Backend {
            status:  None,
            message: message.into(),
        }
    }

    #[inline]
    pub fn status(&self) -> Option<u16> {
        match self {
            RenderError::Transport(_) => None,
            RenderError::Backend {
                status, ..
            } => *status,
        }
    }
}
