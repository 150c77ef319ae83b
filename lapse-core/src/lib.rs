//! Time-lapse capture of Grafana dashboards.
//!
//! [`sequencer::FrameSequencer`] expands a frame range into time windows and
//! drives them through a bounded pool of render workers. The render and save
//! steps are plain closures, so the pool can be driven by
//! [`client::GrafanaClient`] or by anything else that produces image bytes.

pub mod client;
pub mod sequencer;
pub mod settings;

pub use crate::{
    client::{ClientError, GrafanaClient, RenderRequest},
    sequencer::{
        frame_range,
        Frame,
        FrameError,
        FrameSequencer,
        Outcome,
        RenderError,
        RenderResponse,
        SequenceError,
        SequenceReport,
    },
    settings::SequenceConfig,
};
