use std::{
    panic,
    path::PathBuf,
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use anyhow::{bail, Result};
use clap::Parser;
use thiserror::Error;
use tracing::{error, info, level_filters::LevelFilter, warn};

use crate::{
    commands::{image::image_handler, sequence::sequence_handler, Commands, LapseCli},
    logging::init_logging,
};

mod commands;
mod configuration;
mod logging;
mod utils;

fn main() -> anyhow::Result<()> {
    let orig_hook = panic::take_hook();
    // Catch panics in worker threads
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(1);
    }));
    run()
}

fn run() -> anyhow::Result<()> {
    let cli = LapseCli::parse();
    let _guard = init_logging(cli.log_level, cli.logs.as_deref(), LevelFilter::DEBUG)?;
    let config_file = cli.config_file.as_deref();
    let started = Instant::now();

    match cli.command {
        Commands::Image {
            render,
            end_time,
            out_file,
        } => {
            image_handler(config_file, render, end_time, &out_file)?;
        },
        Commands::Sequence {
            render,
            sequence,
        } => {
            sequence_handler(config_file, render, sequence, cancellation_flag())?;
        },
    }

    info!(
        "Completed all work in {:.3} seconds",
        started.elapsed().as_secs_f64()
    );

    Ok(())
}

/// Returns a flag raised by the first Ctrl-C. A second Ctrl-C exits at once.
fn cancellation_flag() -> Arc<AtomicBool> {
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    if let Err(err) = ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::Relaxed) {
            process::exit(130);
        }
        warn!("Cancelling, in-flight frames will finish. Press Ctrl-C again to exit immediately");
    }) {
        warn!("Failed to install Ctrl-C handler: {}", err);
    }
    cancelled
}

/// Logs every collected argument problem and fails if there were any.
pub fn report_invalid_arguments(errors: &[LapseCliError]) -> Result<()> {
    for err in errors {
        error!("{}", err);
    }
    if !errors.is_empty() {
        bail!(LapseCliError::InvalidArguments(errors.len()));
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum LapseCliError {
    #[error("{0} is required")]
    MissingArgument(&'static str),
    #[error("{argument} {millis} is not a representable Unix millisecond timestamp")]
    TimestampOutOfRange { argument: &'static str, millis: i64 },
    #[error("Invalid {field} in config file: {reason}")]
    InvalidConfigValue {
        field:  &'static str,
        reason: String,
    },
    #[error("No config file found at: {0}")]
    ConfigFileNotFound(PathBuf),
    #[error("Failed to load config file: {0}")]
    ConfigLoadError(PathBuf),
    #[error("max-concurrency must be at least 1")]
    NoWorkers,
    #[error("start-frame must be 1 or higher")]
    StartFrameTooLow,
    #[error("end-frame must be after start-frame")]
    FrameRangeInverted,
    #[error("end-time must be after start-time")]
    EndBeforeStart,
    #[error("{0} invalid argument(s), see --help for usage")]
    InvalidArguments(usize),
    #[error("Render failed with code {status}: {body}")]
    RenderFailed { status: u16, body: String },
    #[error("{} of {total} frames failed: {failed:?}", .failed.len())]
    FramesFailed { failed: Vec<u32>, total: usize },
}
