use std::{path::PathBuf, time::Duration};

use chrono::TimeDelta;
use clap::{Args, Parser as ClapParser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::utils::duration_parser::{parse_duration, parse_signed_duration};

pub mod image;
pub mod sequence;

#[derive(ClapParser, Debug)]
#[command(
    name = "lapse",
    about = "Renders Grafana dashboards and panels as images or time-lapse frame sequences.",
    version
)]
pub struct LapseCli {
    #[command(subcommand)]
    pub command:     Commands,
    /// JSON file with defaults for the render options. Flags take precedence.
    #[arg(long, global = true)]
    pub config_file: Option<PathBuf>,
    /// Also write debug logs to this file.
    #[arg(long, global = true)]
    pub logs:        Option<PathBuf>,
    /// Console log level. `RUST_LOG` takes precedence when set.
    #[arg(long, global = true, default_value_t = LevelFilter::INFO)]
    pub log_level:   LevelFilter,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a single image covering a fixed time range
    Image {
        #[command(flatten)]
        render:   RenderArgs,
        /// The ending timestamp (Unix ms) of the render
        #[arg(long)]
        end_time: Option<i64>,
        /// The file to write
        #[arg(long, default_value = "img.png")]
        out_file: PathBuf,
    },
    /// Render a sequence of frames, one image per time window
    Sequence {
        #[command(flatten)]
        render:   RenderArgs,
        #[command(flatten)]
        sequence: SequenceArgs,
    },
}

/// Connection and render options shared by every command. Unset options
/// fall back to the configuration file, then to built-in defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct RenderArgs {
    /// Grafana API URL
    #[arg(long)]
    pub api_url:               Option<String>,
    /// Grafana authorization, either an API key or `user:password`
    #[arg(long, env = "GRAFANA_API_KEY", hide_env_values = true)]
    pub api_key_or_basic_auth: Option<String>,
    /// UID of the dashboard, optionally followed by its slug (`uid/slug`)
    #[arg(long)]
    pub dashboard:             Option<String>,
    /// ID of the panel, 0 renders the entire dashboard
    #[arg(long)]
    pub panel:                 Option<u32>,
    /// The width of the image [default: 1920]
    #[arg(long)]
    pub width:                 Option<u32>,
    /// The height of the image [default: 1080]
    #[arg(long)]
    pub height:                Option<u32>,
    /// Timeout of each render request [default: 1m]
    #[arg(long, value_parser = parse_duration)]
    pub timeout:               Option<Duration>,
    /// The starting timestamp (Unix ms) of the render
    #[arg(long, allow_hyphen_values = true)]
    pub start_time:            Option<i64>,
}

#[derive(Args, Debug, Clone)]
pub struct SequenceArgs {
    /// The first frame to render
    #[arg(long, default_value_t = 1)]
    pub start_frame:     u32,
    /// The last frame to render
    #[arg(long, default_value_t = 2)]
    pub end_frame:       u32,
    /// Time progression between frames, positive = forward, negative = backward
    #[arg(long, default_value = "5m", value_parser = parse_signed_duration, allow_hyphen_values = true)]
    pub frame_interval:  TimeDelta,
    /// Duration to add to the start of each frame
    #[arg(long, default_value = "0", value_parser = parse_signed_duration, allow_hyphen_values = true)]
    pub start_padding:   TimeDelta,
    /// Duration to add to the end of each frame
    #[arg(long, default_value = "0", value_parser = parse_signed_duration, allow_hyphen_values = true)]
    pub end_padding:     TimeDelta,
    /// Maximum number of concurrent render requests
    #[arg(long, short('w'), default_value_t = 5)]
    pub max_concurrency: usize,
    /// Delay between the startup of consecutive workers
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pub worker_delay:    Duration,
    /// Directory to write rendered frames to
    #[arg(long, default_value = "frames")]
    pub out_directory:   PathBuf,
}
