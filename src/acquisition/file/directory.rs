// SPDX-License-Identifier: Apache-2.0

//! Discovery of files created after startup.
//!
//! The [`DirectoryWatcher`] subscribes once to every directory that may hold
//! future matches. A creation notification for a path matching one of the
//! configured patterns starts a tail from the beginning of that file.

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use glob::{MatchOptions, Pattern};
use tokio::select;
use tracing::{debug, error, info, warn};

use crate::acquisition::file::error::{Error, Result};
use crate::acquisition::file::follow::StartAt;
use crate::acquisition::file::netfs;
use crate::acquisition::file::resolver::absolute_pattern;
use crate::acquisition::file::tail::{TailContext, warn_if_symlink};
use crate::acquisition::file::watcher::{
    self, FileEvent, FileEventKind, FileWatcher, WatchMode,
};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

pub struct DirectoryWatcher {
    watcher: Box<dyn FileWatcher>,
    events: flume::Receiver<FileEvent>,
    watched: HashSet<PathBuf>,
    patterns: Vec<Pattern>,
}

impl DirectoryWatcher {
    pub fn new(patterns: &[String], mode: WatchMode, poll_interval: Duration) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(&absolute_pattern(p)).map_err(|e| Error::InvalidGlob {
                    pattern: p.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (tx, events) = flume::unbounded();
        let watcher = watcher::create_watcher(mode, tx, poll_interval)?;
        debug!(backend = watcher.backend_name(), "Created directory watcher");

        Ok(Self {
            watcher,
            events,
            watched: HashSet::new(),
            patterns,
        })
    }

    /// Subscribe to `dir` unless it already is. Failures are logged and
    /// reported as false.
    pub fn add(&mut self, dir: &Path) -> bool {
        if self.watched.contains(dir) {
            debug!(directory = ?dir, "Watch for directory already exists");
            return true;
        }
        match self.watcher.watch(dir) {
            Ok(()) => {
                debug!(directory = ?dir, "Watching directory");
                self.watched.insert(dir.to_path_buf());
                true
            }
            Err(e) => {
                error!(directory = ?dir, error = %e, "Could not create watch on directory");
                false
            }
        }
    }

    /// Handle creation notifications until the scope is cancelled or the
    /// notification channel closes. Both are clean exits.
    pub async fn run(mut self, ctx: TailContext) -> Result<()> {
        loop {
            select! {
                biased;

                _ = ctx.supervisor.cancelled() => {
                    self.release();
                    return Ok(());
                }

                event = self.events.recv_async() => match event {
                    Ok(event) if event.kind == FileEventKind::Create => {
                        for path in &event.paths {
                            self.on_create(&ctx, path);
                        }
                    }
                    Ok(_) => {}
                    Err(_) => {
                        debug!("Directory notification channel closed");
                        return Ok(());
                    }
                },
            }
        }
    }

    fn release(&mut self) {
        for dir in self.watched.drain() {
            if let Err(e) = self.watcher.unwatch(&dir) {
                debug!(directory = ?dir, error = %e, "Could not remove watch");
            }
        }
    }

    fn matches(&self, path: &Path) -> bool {
        self.patterns.iter().any(|pattern| {
            let matched = pattern.matches_path_with(path, MATCH_OPTIONS);
            if matched {
                debug!(path = ?path, pattern = %pattern, "Matched new file");
            }
            matched
        })
    }

    fn on_create(&self, ctx: &TailContext, path: &Path) {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                error!(path = ?path, error = %e, "Could not stat() new file, ignoring it");
                return;
            }
        };
        if metadata.is_dir() {
            return;
        }
        debug!(path = ?path, "Detected new file");

        if !self.matches(path) {
            return;
        }

        if let Some(re) = ctx.config.exclude.matching(path) {
            info!(path = ?path, exclude = %re, "File matches exclusion pattern, skipping");
            return;
        }

        if !ctx.registry.try_register(path) {
            debug!(path = ?path, "Already tailing file, not creating a new tail");
            return;
        }

        // Check readability without keeping a descriptor the follower would race with.
        if let Err(e) = File::open(path) {
            error!(path = ?path, error = %e, "Unable to read new file");
            ctx.registry.release(path);
            return;
        }

        let poll = netfs::should_poll(path, ctx.config.poll_without_inotify);

        if let Err(e) = warn_if_symlink(path, poll) {
            error!(path = ?path, error = %e, "Could not lstat() new file, ignoring it");
            ctx.registry.release(path);
            return;
        }

        if let Err(e) = ctx.spawn(path.to_path_buf(), StartAt::Beginning, poll) {
            warn!(path = ?path, error = %e, "Could not start tailing file");
            ctx.registry.release(path);
        }
    }
}
