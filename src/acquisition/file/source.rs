// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;

use opentelemetry::metrics::Meter;
use tracing::{debug, error, info, warn};

use crate::acquisition::event::LineEvent;
use crate::acquisition::file::config::{FileSourceConfig, SourceConfig};
use crate::acquisition::file::directory::DirectoryWatcher;
use crate::acquisition::file::dsn::FileDsn;
use crate::acquisition::file::emitter::{LineEmitter, MODULE_NAME};
use crate::acquisition::file::error::{Error, Result};
use crate::acquisition::file::follow::StartAt;
use crate::acquisition::file::metrics::FileMetrics;
use crate::acquisition::file::netfs;
use crate::acquisition::file::oneshot;
use crate::acquisition::file::registry::TailRegistry;
use crate::acquisition::file::resolver::{ExcludeFilter, PathResolver, ResolvedFile};
use crate::acquisition::file::tail::{TailContext, warn_if_symlink};
use crate::acquisition::file::wake::WakeHub;
use crate::acquisition::file::watcher::{DEFAULT_POLL_INTERVAL, WatchMode};
use crate::acquisition::supervisor::Supervisor;
use crate::acquisition::{AcquisitionMode, MetricsLevel};
use crate::bounded_channel::BoundedSender;

/// File-based log source: a configuration plus the files it resolved to.
#[derive(Clone)]
pub struct FileSource {
    config: Arc<SourceConfig>,
    files: Vec<ResolvedFile>,
    metrics: FileMetrics,
    registry: TailRegistry,
}

impl FileSource {
    /// Configure from a YAML acquisition document.
    pub fn configure(yaml: &str, metrics_level: MetricsLevel, meter: &Meter) -> Result<Self> {
        Self::from_config(FileSourceConfig::from_yaml(yaml)?, metrics_level, meter)
    }

    pub fn from_config(
        config: FileSourceConfig,
        metrics_level: MetricsLevel,
        meter: &Meter,
    ) -> Result<Self> {
        let config = config.build()?;
        let files = PathResolver::new(&config.patterns, &config.exclude).resolve(false)?;
        Ok(Self::new(config, files, metrics_level, meter))
    }

    /// Configure from a `file://` descriptor. Always reads in one shot, and
    /// fails if the pattern matches nothing.
    pub fn configure_by_dsn(
        dsn: &str,
        labels: BTreeMap<String, String>,
        unique_id: &str,
        metrics_level: MetricsLevel,
        meter: &Meter,
    ) -> Result<Self> {
        let dsn = FileDsn::parse(dsn)?;
        let config = SourceConfig {
            patterns: vec![dsn.pattern],
            exclude: ExcludeFilter::default(),
            mode: AcquisitionMode::Cat,
            force_inotify: false,
            max_buffer_size: dsn.max_buffer_size.filter(|size| *size > 0),
            poll_without_inotify: None,
            labels: Arc::new(labels),
            unique_id: unique_id.to_string(),
            use_time_machine: false,
            log_level: dsn.log_level,
            name: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        };
        let files = PathResolver::new(&config.patterns, &config.exclude).resolve(true)?;
        info!(count = files.len(), "Will read files");
        Ok(Self::new(config, files, metrics_level, meter))
    }

    fn new(
        config: SourceConfig,
        files: Vec<ResolvedFile>,
        metrics_level: MetricsLevel,
        meter: &Meter,
    ) -> Self {
        Self {
            config: Arc::new(config),
            files,
            metrics: FileMetrics::new(meter, metrics_level),
            registry: TailRegistry::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        MODULE_NAME
    }

    pub fn mode(&self) -> AcquisitionMode {
        self.config.mode
    }

    pub fn unique_id(&self) -> &str {
        &self.config.unique_id
    }

    pub fn supported_modes() -> &'static [AcquisitionMode] {
        &[AcquisitionMode::Tail, AcquisitionMode::Cat]
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn files(&self) -> &[ResolvedFile] {
        &self.files
    }

    pub fn metrics(&self) -> &FileMetrics {
        &self.metrics
    }

    pub fn registry(&self) -> &TailRegistry {
        &self.registry
    }

    fn emitter(&self, out: BoundedSender<LineEvent>) -> LineEmitter {
        LineEmitter::new(&self.config, self.metrics.clone(), out)
    }

    /// Start following every resolved file from its end, and watch for new
    /// files. Workers are joined to `supervisor` and run until it is
    /// cancelled; this returns once they are started.
    ///
    /// A resolved file that cannot be stat'ed fails the start.
    pub async fn streaming_acquisition(
        &self,
        out: BoundedSender<LineEvent>,
        supervisor: &Supervisor,
    ) -> Result<()> {
        debug!("Starting live acquisition");
        let hub = WakeHub::new(self.config.poll_interval);
        supervisor.spawn(hub.clone().run(supervisor.token().clone()));

        let registry = self.registry.clone();
        supervisor.on_shutdown(move || {
            if !registry.is_empty() {
                debug!(count = registry.len(), "Releasing tailed files");
                registry.clear();
            }
        });

        let ctx = TailContext {
            config: self.config.clone(),
            registry: self.registry.clone(),
            emitter: self.emitter(out),
            hub,
            supervisor: supervisor.clone(),
        };

        let resolver = PathResolver::new(&self.config.patterns, &self.config.exclude);
        let mut directories = DirectoryWatcher::new(
            &self.config.patterns,
            WatchMode::Auto,
            self.config.poll_interval,
        )?;
        for dir in resolver.watch_directories(&self.files, self.config.force_inotify) {
            directories.add(&dir);
        }
        supervisor.spawn(directories.run(ctx.clone()));

        for file in &self.files {
            let path = &file.path;
            if self.config.exclude.is_excluded(path) {
                continue;
            }

            // Check readability without keeping a descriptor the follower would race with.
            if let Err(e) = File::open(path) {
                error!(path = ?path, error = %e, "Unable to read file");
                continue;
            }

            let metadata = fs::metadata(path).map_err(|source| Error::Stat {
                path: path.clone(),
                source,
            })?;
            if metadata.is_dir() {
                warn!(path = ?path, "Path is a directory, ignoring it");
                continue;
            }

            let poll = netfs::should_poll(path, self.config.poll_without_inotify);

            if let Err(e) = warn_if_symlink(path, poll) {
                error!(path = ?path, error = %e, "Could not lstat() file, ignoring it");
                continue;
            }

            if !self.registry.try_register(path) {
                debug!(path = ?path, "Already tailing file");
                continue;
            }
            if let Err(e) = ctx.spawn(path.clone(), StartAt::End, poll) {
                error!(path = ?path, error = %e, "Could not start tailing file");
                self.registry.release(path);
            }
        }

        Ok(())
    }

    /// Read every resolved file once and signal "done, no error" to
    /// `supervisor`. Every event is timestamped as historical.
    pub async fn one_shot_acquisition(
        &self,
        out: BoundedSender<LineEvent>,
        supervisor: &Supervisor,
    ) -> Result<()> {
        debug!("In oneshot");
        let files: Vec<PathBuf> = self.files.iter().map(|f| f.path.clone()).collect();
        let emitter = self.emitter(out).replay();
        let limit = self.config.buffer_limit();
        let cancel = supervisor.token().clone();

        tokio::task::spawn_blocking(move || oneshot::read_files(&files, &emitter, limit, &cancel))
            .await??;

        supervisor.kill(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::global;
    use tempfile::TempDir;

    #[test]
    fn test_configure_from_yaml() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.log"), "a\n").unwrap();
        fs::write(dir.path().join("b.log"), "b\n").unwrap();

        let yaml = format!(
            "filenames:\n  - {}/*.log\nexclude_regexps:\n  - b\\.log$\nunique_id: abc\n",
            dir.path().display()
        );
        let source =
            FileSource::configure(&yaml, MetricsLevel::Full, &global::meter("test")).unwrap();

        assert_eq!(source.name(), "file");
        assert_eq!(source.mode(), AcquisitionMode::Tail);
        assert_eq!(source.unique_id(), "abc");
        assert_eq!(source.files().len(), 1);
        assert!(source.files()[0].path.ends_with("a.log"));
    }

    #[test]
    fn test_configure_by_dsn() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.log"), "a\n").unwrap();

        let mut labels = BTreeMap::new();
        labels.insert("type".to_string(), "syslog".to_string());
        let dsn = format!("file://{}/*.log?max_buffer_size=128", dir.path().display());
        let source = FileSource::configure_by_dsn(
            &dsn,
            labels,
            "uuid-1",
            MetricsLevel::None,
            &global::meter("test"),
        )
        .unwrap();

        assert_eq!(source.mode(), AcquisitionMode::Cat);
        assert_eq!(source.unique_id(), "uuid-1");
        assert_eq!(source.config().buffer_limit(), 128);
        assert_eq!(source.files().len(), 1);

        let missing = format!("file://{}/*.missing", dir.path().display());
        let err = FileSource::configure_by_dsn(
            &missing,
            BTreeMap::new(),
            "uuid-2",
            MetricsLevel::None,
            &global::meter("test"),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::NoMatchingFiles(_)));
    }

    #[test]
    fn test_supported_modes() {
        assert_eq!(
            FileSource::supported_modes(),
            &[AcquisitionMode::Tail, AcquisitionMode::Cat]
        );
    }
}
