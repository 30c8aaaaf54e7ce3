// SPDX-License-Identifier: Apache-2.0

//! Turns raw lines into [`LineEvent`]s and publishes them on the output queue.

use std::path::Path;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::acquisition::AcquisitionMode;
use crate::acquisition::event::{ExpectMode, Labels, LineEvent};
use crate::acquisition::file::config::SourceConfig;
use crate::acquisition::file::metrics::FileMetrics;
use crate::bounded_channel::{BoundedSender, SendError};

pub const MODULE_NAME: &str = "file";

/// Timestamp mode of events produced in `mode`.
pub fn expect_mode(mode: AcquisitionMode, use_time_machine: bool) -> ExpectMode {
    match mode {
        AcquisitionMode::Cat => ExpectMode::Replay,
        AcquisitionMode::Tail if use_time_machine => ExpectMode::Replay,
        AcquisitionMode::Tail => ExpectMode::Live,
    }
}

#[derive(Clone)]
pub struct LineEmitter {
    labels: Labels,
    expect_mode: ExpectMode,
    line_debug: bool,
    metrics: FileMetrics,
    output: BoundedSender<LineEvent>,
}

impl LineEmitter {
    pub fn new(
        config: &SourceConfig,
        metrics: FileMetrics,
        output: BoundedSender<LineEvent>,
    ) -> Self {
        Self {
            labels: config.labels.clone(),
            expect_mode: expect_mode(config.mode, config.use_time_machine),
            line_debug: config.line_debug_enabled(),
            metrics,
            output,
        }
    }

    /// Same emitter, timestamping every event as historical.
    pub fn replay(mut self) -> Self {
        self.expect_mode = ExpectMode::Replay;
        self
    }

    pub fn expect_mode(&self) -> ExpectMode {
        self.expect_mode
    }

    /// Build the event for one line, counting it. Blank lines yield `None`
    /// and are not counted.
    pub fn event(&self, path: &Path, raw: String) -> Option<LineEvent> {
        if raw.is_empty() {
            return None;
        }
        self.metrics.record_line(path);

        let event = LineEvent {
            raw,
            src: self.metrics.source_label(path),
            labels: self.labels.clone(),
            time: Utc::now(),
            expect_mode: self.expect_mode,
            module: MODULE_NAME,
        };
        if self.line_debug {
            debug!(path = ?path, raw = %event.raw, "pushing line");
        }
        Some(event)
    }

    /// Publish one line, waiting for queue capacity unless `cancel` fires.
    pub async fn emit(
        &self,
        path: &Path,
        raw: String,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        match self.event(path, raw) {
            Some(event) => self.output.send(event, cancel).await,
            None => Ok(()),
        }
    }

    /// Blocking flavour of [`LineEmitter::emit`] for reader threads.
    pub fn emit_blocking(
        &self,
        path: &Path,
        raw: String,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        match self.event(path, raw) {
            Some(event) => self.output.send_blocking(event, cancel),
            None => Ok(()),
        }
    }
}
