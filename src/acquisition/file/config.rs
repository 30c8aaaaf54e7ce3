// SPDX-License-Identifier: Apache-2.0

//! Configuration for the file source.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Format, Yaml};
use serde::Deserialize;
use tracing::Level;

use crate::acquisition::AcquisitionMode;
use crate::acquisition::event::Labels;
use crate::acquisition::file::error::{Error, Result};
use crate::acquisition::file::resolver::ExcludeFilter;
use crate::acquisition::file::watcher::DEFAULT_POLL_INTERVAL;

/// Line-scan buffer ceiling used when `max_buffer_size` is not set.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 64 * 1024;

/// File source configuration as written in a YAML acquisition document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSourceConfig {
    /// Glob patterns or exact paths to track
    #[serde(default)]
    pub filenames: Vec<String>,
    /// Single pattern, appended to `filenames`
    #[serde(default)]
    pub filename: Option<String>,
    /// Regular expressions; a matching path is never read
    #[serde(default)]
    pub exclude_regexps: Vec<String>,
    /// Watch every pattern's directory, glob or not
    #[serde(default)]
    pub force_inotify: bool,
    /// Line-scan buffer ceiling in bytes
    #[serde(default)]
    pub max_buffer_size: Option<usize>,
    /// Unset: auto-detect network filesystems. Set: force the poll decision.
    #[serde(default)]
    pub poll_without_inotify: Option<bool>,
    /// `tail` (default) or `cat`
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub unique_id: Option<String>,
    /// Timestamp tailed lines as historical
    #[serde(default)]
    pub use_time_machine: bool,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Poll cadence of poll-based following
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

impl FileSourceConfig {
    /// Parse a YAML document, rejecting unknown keys.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Figment::from(Yaml::string(yaml))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Parse a YAML document from disk.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        Figment::from(Yaml::file_exact(path.as_ref()))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate and freeze the configuration.
    pub fn build(mut self) -> Result<SourceConfig> {
        if let Some(filename) = self.filename.take() {
            if !filename.is_empty() {
                self.filenames.push(filename);
            }
        }
        if self.filenames.is_empty() {
            return Err(Error::NoFilenames);
        }

        let mode = match self.mode.as_deref() {
            None | Some("") => AcquisitionMode::Tail,
            Some(mode) => mode
                .parse()
                .map_err(|_| Error::UnsupportedMode(mode.to_string()))?,
        };

        let exclude = ExcludeFilter::new(&self.exclude_regexps)?;

        let log_level = match self.log_level.as_deref() {
            None | Some("") => None,
            Some(level) => Some(parse_level(level).map_err(Error::Config)?),
        };

        let poll_interval = match self.poll_interval_ms {
            Some(0) => return Err(Error::Config("poll_interval_ms must be positive".to_string())),
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_POLL_INTERVAL,
        };

        Ok(SourceConfig {
            patterns: self.filenames,
            exclude,
            mode,
            force_inotify: self.force_inotify,
            max_buffer_size: self.max_buffer_size.filter(|size| *size > 0),
            poll_without_inotify: self.poll_without_inotify,
            labels: Arc::new(self.labels),
            unique_id: self.unique_id.unwrap_or_default(),
            use_time_machine: self.use_time_machine,
            log_level,
            name: self.name,
            poll_interval,
        })
    }
}

/// Parse a log level name the way the DSN and YAML forms accept it.
pub(crate) fn parse_level(level: &str) -> std::result::Result<Level, String> {
    match level.to_lowercase().as_str() {
        "warning" => Ok(Level::WARN),
        // Levels above error have no tracing counterpart.
        "fatal" | "panic" => Ok(Level::ERROR),
        other => other
            .parse::<Level>()
            .map_err(|_| format!("unknown log level {}", level)),
    }
}

/// Validated, immutable file source configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub patterns: Vec<String>,
    pub exclude: ExcludeFilter,
    pub mode: AcquisitionMode,
    pub force_inotify: bool,
    pub max_buffer_size: Option<usize>,
    pub poll_without_inotify: Option<bool>,
    pub labels: Labels,
    pub unique_id: String,
    pub use_time_machine: bool,
    pub log_level: Option<Level>,
    pub name: Option<String>,
    pub poll_interval: Duration,
}

impl SourceConfig {
    /// Whether per-line debug logging is allowed for this source. Without an
    /// explicit level the subscriber's filter decides.
    pub fn line_debug_enabled(&self) -> bool {
        self.log_level.is_none_or(|level| level >= Level::DEBUG)
    }

    pub fn buffer_limit(&self) -> usize {
        self.max_buffer_size.unwrap_or(DEFAULT_MAX_BUFFER_SIZE)
    }
}
