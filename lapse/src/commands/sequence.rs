use std::{
    fs,
    path::{Path, PathBuf},
    sync::{atomic::AtomicBool, Arc},
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use lapse_core::{frame_range, FrameSequencer, GrafanaClient, RenderError, SequenceConfig};
use tracing::{info, trace, warn};

use crate::{
    commands::{RenderArgs, SequenceArgs},
    configuration::Configuration,
    report_invalid_arguments,
    LapseCliError,
};

#[tracing::instrument(skip_all)]
pub fn sequence_handler(
    config_file: Option<&Path>,
    render: RenderArgs,
    sequence: SequenceArgs,
    cancelled: Arc<AtomicBool>,
) -> Result<()> {
    let configuration = Configuration::load_optional(config_file)?;
    let mut errors = Vec::new();
    let settings = render.resolve(&configuration, &mut errors);
    if sequence.max_concurrency < 1 {
        errors.push(LapseCliError::NoWorkers);
    }
    if sequence.start_frame < 1 {
        errors.push(LapseCliError::StartFrameTooLow);
    }
    if sequence.start_frame > sequence.end_frame {
        errors.push(LapseCliError::FrameRangeInverted);
    }
    report_invalid_arguments(&errors)?;
    let Some(settings) = settings else {
        bail!(LapseCliError::InvalidArguments(errors.len()));
    };

    let frames = frame_range(sequence.start_frame, sequence.end_frame)?;
    let out_directory = sequence.out_directory.as_path();
    fs::create_dir_all(out_directory)
        .with_context(|| format!("failed to create {}", out_directory.display()))?;

    let client = GrafanaClient::new(&settings.api_url, &settings.credentials)?;
    let request = &settings.request;
    let config = SequenceConfig {
        start:           settings.start,
        interval:        sequence.frame_interval,
        start_padding:   sequence.start_padding,
        end_padding:     sequence.end_padding,
        worker_delay:    sequence.worker_delay,
        max_concurrency: sequence.max_concurrency,
    };
    let sequencer = FrameSequencer::new(
        config,
        |from: DateTime<Utc>, to: DateTime<Utc>| {
            client.render(request, from, to).map_err(RenderError::from)
        },
        |bytes: &[u8], index: u32| save_frame(out_directory, bytes, index),
    )
    .with_cancellation(cancelled);

    let report = sequencer.run(&frames)?;
    if !report.is_success() {
        bail!(LapseCliError::FramesFailed {
            failed: report.failed_frames(),
            total:  frames.len(),
        });
    }

    info!(
        "Saved {} frames to {}",
        report.succeeded(),
        out_directory.display()
    );

    Ok(())
}

#[inline]
pub fn frame_path(directory: &Path, index: u32) -> PathBuf {
    directory.join(format!("{:06}.png", index))
}

/// Writes a frame next to its final path first, then renames it into place so
/// a crash never leaves a truncated image behind. The temporary file is
/// removed again when either step fails.
pub fn save_frame(directory: &Path, bytes: &[u8], index: u32) -> Result<()> {
    let output = frame_path(directory, index);
    let temp_output = output.with_extension("png.tmp");
    let saved = fs::write(&temp_output, bytes)
        .with_context(|| format!("failed to write {}", temp_output.display()))
        .and_then(|()| {
            fs::rename(&temp_output, &output)
                .with_context(|| format!("failed to move frame into {}", output.display()))
        });
    if saved.is_err() && temp_output.exists() {
        if let Err(err) = fs::remove_file(&temp_output) {
            warn!("Failed to remove {}: {}", temp_output.display(), err);
        }
    }
    saved?;
    trace!("Saved frame {} to {}", index, output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn frame_names(directory: &Path) -> Vec<String> {
        fs::read_dir(directory)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect()
    }

    #[test]
    fn frames_are_named_by_zero_padded_index() {
        assert_eq!(frame_path(Path::new("frames"), 7), Path::new("frames/000007.png"));
        assert_eq!(
            frame_path(Path::new("frames"), 1_234_567),
            Path::new("frames/1234567.png")
        );
    }

    #[test]
    fn save_frame_leaves_only_the_final_file() {
        let directory = TempDir::new().unwrap();

        save_frame(directory.path(), b"\x89PNG", 12).unwrap();

        assert_eq!(frame_names(directory.path()), vec!["000012.png"]);
        assert_eq!(fs::read(frame_path(directory.path(), 12)).unwrap(), b"\x89PNG");
    }

    #[test]
    fn save_frame_reports_missing_directory() {
        let directory = TempDir::new().unwrap();
        let missing = directory.path().join("missing");

        let err = save_frame(&missing, b"\x89PNG", 1).unwrap_err();

        assert!(err.to_string().starts_with("failed to write"));
    }

    #[test]
    fn failed_rename_removes_the_temporary_file() {
        let directory = TempDir::new().unwrap();
        // A non-empty directory in the way makes the rename fail.
        let blocker = frame_path(directory.path(), 3);
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), b"").unwrap();

        let err = save_frame(directory.path(), b"\x89PNG", 3).unwrap_err();

        assert!(err.to_string().starts_with("failed to move frame into"));
        assert!(!directory.path().join("000003.png.tmp").exists());
        assert_eq!(frame_names(directory.path()), vec!["000003.png"]);
    }
}
