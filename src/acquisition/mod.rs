// SPDX-License-Identifier: Apache-2.0

pub mod event;
pub mod file;
pub mod supervisor;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use opentelemetry::global;
use opentelemetry::metrics::Meter;

use crate::acquisition::event::LineEvent;
use crate::acquisition::file::FileSource;
use crate::acquisition::supervisor::Supervisor;
use crate::bounded_channel::BoundedSender;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub fn get_meter() -> Meter {
    global::meter("acquisition")
}

/// How a source reads its files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// Follow files indefinitely.
    Tail,
    /// Read files once.
    Cat,
}

impl FromStr for AcquisitionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tail" => Ok(AcquisitionMode::Tail),
            "cat" => Ok(AcquisitionMode::Cat),
            _ => Err(format!("unsupported mode {}", s)),
        }
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionMode::Tail => write!(f, "tail"),
            AcquisitionMode::Cat => write!(f, "cat"),
        }
    }
}

/// Verbosity of per-source line counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetricsLevel {
    /// No counting.
    None,
    /// Count by file name, bounding label cardinality.
    Aggregated,
    /// Count by full path.
    #[default]
    Full,
}

impl FromStr for MetricsLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(MetricsLevel::None),
            "aggregated" | "aggregate" => Ok(MetricsLevel::Aggregated),
            "full" => Ok(MetricsLevel::Full),
            _ => Err(format!(
                "Invalid metrics level '{}'. Valid options: none, aggregated, full",
                s
            )),
        }
    }
}

/// Every kind of acquisition source, behind one interface.
#[derive(Clone)]
pub enum DataSource {
    File(FileSource),
}

impl DataSource {
    pub fn name(&self) -> &'static str {
        match self {
            DataSource::File(source) => source.name(),
        }
    }

    pub fn mode(&self) -> AcquisitionMode {
        match self {
            DataSource::File(source) => source.mode(),
        }
    }

    pub fn unique_id(&self) -> &str {
        match self {
            DataSource::File(source) => source.unique_id(),
        }
    }

    pub fn supported_modes(&self) -> &'static [AcquisitionMode] {
        match self {
            DataSource::File(_) => FileSource::supported_modes(),
        }
    }

    /// Lines counted so far, keyed by source label.
    pub fn metrics(&self) -> BTreeMap<String, u64> {
        match self {
            DataSource::File(source) => source.metrics().snapshot(),
        }
    }

    pub async fn streaming_acquisition(
        &self,
        out: BoundedSender<LineEvent>,
        supervisor: &Supervisor,
    ) -> Result<(), BoxError> {
        match self {
            DataSource::File(source) => Ok(source.streaming_acquisition(out, supervisor).await?),
        }
    }

    pub async fn one_shot_acquisition(
        &self,
        out: BoundedSender<LineEvent>,
        supervisor: &Supervisor,
    ) -> Result<(), BoxError> {
        match self {
            DataSource::File(source) => Ok(source.one_shot_acquisition(out, supervisor).await?),
        }
    }

    /// Start acquisition in the configured mode.
    ///
    /// Streaming workers are joined to `supervisor` and this returns once they
    /// run. A one-shot pass is itself joined as a worker; it cancels the scope
    /// when done, or fails it with its error.
    pub async fn start(
        &self,
        out: BoundedSender<LineEvent>,
        supervisor: &Supervisor,
    ) -> Result<(), BoxError> {
        match self.mode() {
            AcquisitionMode::Tail => self.streaming_acquisition(out, supervisor).await,
            AcquisitionMode::Cat => {
                let source = self.clone();
                let scope = supervisor.clone();
                supervisor.spawn(async move { source.one_shot_acquisition(out, &scope).await });
                Ok(())
            }
        }
    }
}

impl From<FileSource> for DataSource {
    fn from(source: FileSource) -> Self {
        DataSource::File(source)
    }
}
