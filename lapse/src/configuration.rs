use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lapse_core::RenderRequest;
use serde::{Deserialize, Serialize};

use crate::{
    commands::RenderArgs,
    utils::duration_parser::parse_duration,
    LapseCliError,
};

pub const DEFAULT_WIDTH: u32 = 1920;
pub const DEFAULT_HEIGHT: u32 = 1080;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Defaults for the render options, loaded from a JSON file.
///
/// ```json
/// {
///   "api_url": "https://grafana.example.com",
///   "api_key_or_basic_auth": "eyJrIjoi...",
///   "dashboard": "abc123/node-exporter",
///   "panel": 4,
///   "timeout": "90s"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    pub api_url:               Option<String>,
    pub api_key_or_basic_auth: Option<String>,
    pub dashboard:             Option<String>,
    pub panel:                 Option<u32>,
    pub width:                 Option<u32>,
    pub height:                Option<u32>,
    pub timeout:               Option<String>,
}

impl Configuration {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LapseCliError::ConfigFileNotFound(path.to_path_buf()).into());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        serde_json::from_str(&contents)
            .with_context(|| LapseCliError::ConfigLoadError(path.to_path_buf()))
    }

    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }
}

/// Fully resolved connection and render options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSettings {
    pub api_url:     String,
    pub credentials: String,
    pub request:     RenderRequest,
    pub start:       DateTime<Utc>,
}

impl RenderArgs {
    /// Merges the flags with `configuration`, recording every problem in
    /// `errors` instead of stopping at the first one.
    pub fn resolve(
        self,
        configuration: &Configuration,
        errors: &mut Vec<LapseCliError>,
    ) -> Option<RenderSettings> {
        let api_url = self.api_url.or_else(|| configuration.api_url.clone());
        if api_url.is_none() {
            errors.push(LapseCliError::MissingArgument("api-url"));
        }
        let dashboard = self.dashboard.or_else(|| configuration.dashboard.clone());
        if dashboard.is_none() {
            errors.push(LapseCliError::MissingArgument("dashboard"));
        }
        let start = match self.start_time {
            None | Some(0) => {
                errors.push(LapseCliError::MissingArgument("start-time"));
                None
            },
            Some(millis) => timestamp(millis, "start-time", errors),
        };
        let timeout = match (self.timeout, &configuration.timeout) {
            (Some(timeout), _) => Some(timeout),
            (None, Some(timeout)) => match parse_duration(timeout) {
                Ok(timeout) => Some(timeout),
                Err(err) => {
                    errors.push(LapseCliError::InvalidConfigValue {
                        field:  "timeout",
                        reason: err.to_string(),
                    });
                    None
                },
            },
            (None, None) => Some(DEFAULT_TIMEOUT),
        };
        let panel = self.panel.or(configuration.panel).filter(|&panel| panel != 0);

        Some(RenderSettings {
            api_url: api_url?,
            credentials: self
                .api_key_or_basic_auth
                .or_else(|| configuration.api_key_or_basic_auth.clone())
                .unwrap_or_default(),
            request: RenderRequest {
                dashboard: dashboard?,
                panel,
                width: self.width.or(configuration.width).unwrap_or(DEFAULT_WIDTH),
                height: self.height.or(configuration.height).unwrap_or(DEFAULT_HEIGHT),
                timeout: Some(timeout?).filter(|timeout| !timeout.is_zero()),
            },
            start: start?,
        })
    }
}

/// Converts a Unix millisecond timestamp, recording an error when it is out
/// of range.
pub fn timestamp(
    millis: i64,
    argument: &'static str,
    errors: &mut Vec<LapseCliError>,
) -> Option<DateTime<Utc>> {
    let time = DateTime::<Utc>::from_timestamp_millis(millis);
    if time.is_none() {
        errors.push(LapseCliError::TimestampOutOfRange {
            argument,
            millis,
        });
    }
    time
}
