// SPDX-License-Identifier: Apache-2.0

//! Normalized line events published on the shared output queue.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Label mapping attached to every event of a source.
pub type Labels = Arc<BTreeMap<String, String>>;

/// How downstream should interpret an event's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectMode {
    /// Real-time ingestion.
    Live,
    /// Historical or batch reading.
    Replay,
}

/// A single non-empty line read from a source.
#[derive(Debug, Clone, Serialize)]
pub struct LineEvent {
    pub raw: String,
    /// Exact path, or basename when metrics are aggregated.
    pub src: String,
    pub labels: Labels,
    pub time: DateTime<Utc>,
    pub expect_mode: ExpectMode,
    pub module: &'static str,
}
