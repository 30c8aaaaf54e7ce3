// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Meter};

use crate::acquisition::MetricsLevel;

/// Line counters of one file source instance.
///
/// Counters are created from the meter handed in by the caller, and every
/// increment is mirrored into a per-instance snapshot so that independent
/// sources never observe each other's counts.
#[derive(Clone)]
pub struct FileMetrics {
    level: MetricsLevel,
    hits: Counter<u64>,
    aggregated_hits: Counter<u64>,
    snapshot: Arc<Mutex<BTreeMap<String, u64>>>,
}

impl FileMetrics {
    pub fn new(meter: &Meter, level: MetricsLevel) -> Self {
        Self {
            level,
            hits: meter
                .u64_counter("filesource_hits_total")
                .with_description("Total lines that were read, by file path.")
                .with_unit("lines")
                .build(),
            aggregated_hits: meter
                .u64_counter("filesource_aggregated_hits_total")
                .with_description("Total lines that were read, by file name.")
                .with_unit("lines")
                .build(),
            snapshot: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn level(&self) -> MetricsLevel {
        self.level
    }

    /// Source label of `path` under the configured level: the basename when
    /// aggregated, the full path otherwise.
    pub fn source_label(&self, path: &Path) -> String {
        match self.level {
            MetricsLevel::Aggregated => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
            MetricsLevel::Full | MetricsLevel::None => path.to_string_lossy().into_owned(),
        }
    }

    /// Count one line read from `path`.
    pub fn record_line(&self, path: &Path) {
        let counter = match self.level {
            MetricsLevel::None => return,
            MetricsLevel::Full => &self.hits,
            MetricsLevel::Aggregated => &self.aggregated_hits,
        };
        let source = self.source_label(path);
        counter.add(1, &[KeyValue::new("source", source.clone())]);

        let mut snapshot = match self.snapshot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *snapshot.entry(source).or_default() += 1;
    }

    /// Lines counted so far, keyed by source label.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        match self.snapshot.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
