use std::{
    fs,
    io::{stderr, IsTerminal},
    path::Path,
};

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Installs the global subscriber. Console output goes to stderr at
/// `console_level` unless `RUST_LOG` says otherwise. When `log_path` is set,
/// events up to `file_level` are also appended to that file.
///
/// The returned guard flushes the file writer on drop and must be held until
/// the program exits.
pub fn init_logging(
    console_level: LevelFilter,
    log_path: Option<&Path>,
    file_level: LevelFilter,
) -> Result<Option<WorkerGuard>> {
    let console_filter = EnvFilter::builder()
        .with_default_directive(console_level.into())
        .from_env_lossy();
    let console_layer = fmt::layer()
        .with_writer(stderr)
        .with_ansi(stderr().is_terminal())
        .with_target(false)
        .with_filter(console_filter);

    let (file_layer, guard) = match log_path {
        Some(path) => {
            let directory = path.parent().filter(|parent| !parent.as_os_str().is_empty());
            if let Some(directory) = directory {
                fs::create_dir_all(directory).with_context(|| {
                    format!("failed to create log directory {}", directory.display())
                })?;
            }
            let file_name = path
                .file_name()
                .with_context(|| format!("log path {} has no file name", path.display()))?;
            let appender =
                tracing_appender::rolling::never(directory.unwrap_or(Path::new(".")), file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_level);
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
