use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use lapse_core::GrafanaClient;
use tracing::{debug, info};

use crate::{
    commands::RenderArgs,
    configuration::{timestamp, Configuration},
    report_invalid_arguments,
    LapseCliError,
};

#[tracing::instrument(skip_all)]
pub fn image_handler(
    config_file: Option<&Path>,
    render: RenderArgs,
    end_time: Option<i64>,
    out_file: &Path,
) -> Result<()> {
    let configuration = Configuration::load_optional(config_file)?;
    let mut errors = Vec::new();
    let settings = render.resolve(&configuration, &mut errors);
    let end = match end_time {
        None | Some(0) => {
            errors.push(LapseCliError::MissingArgument("end-time"));
            None
        },
        Some(millis) => timestamp(millis, "end-time", &mut errors),
    };
    if let (Some(settings), Some(end)) = (&settings, end) {
        if settings.start > end {
            errors.push(LapseCliError::EndBeforeStart);
        }
    }
    report_invalid_arguments(&errors)?;
    let (Some(settings), Some(end)) = (settings, end) else {
        bail!(LapseCliError::InvalidArguments(errors.len()));
    };

    let client = GrafanaClient::new(&settings.api_url, &settings.credentials)?;
    debug!(
        "Rendering {} from {} to {}",
        settings.request.dashboard, settings.start, end
    );
    let response = client
        .render(&settings.request, settings.start, end)
        .context("failed to render image")?;
    if !response.is_success() {
        bail!(LapseCliError::RenderFailed {
            status: response.status,
            body:   String::from_utf8_lossy(&response.bytes).trim().chars().take(200).collect(),
        });
    }

    fs::write(out_file, &response.bytes)
        .with_context(|| format!("failed to write {}", out_file.display()))?;
    info!(
        "Wrote {} bytes to {}",
        response.bytes.len(),
        out_file.display()
    );

    Ok(())
}
