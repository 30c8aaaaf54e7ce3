// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::select;
use tracing::{debug, info, warn};

use crate::acquisition::file::config::SourceConfig;
use crate::acquisition::file::emitter::LineEmitter;
use crate::acquisition::file::error::{Error, Result};
use crate::acquisition::file::follow::{FollowConfig, Follower, ReaderStatus, StartAt};
use crate::acquisition::file::registry::TailRegistry;
use crate::acquisition::file::wake::WakeHub;
use crate::acquisition::supervisor::Supervisor;
use crate::bounded_channel::SendError;

/// Everything needed to start tail workers, shared by startup scanning and
/// the directory watcher.
#[derive(Clone)]
pub struct TailContext {
    pub config: Arc<SourceConfig>,
    pub registry: TailRegistry,
    pub emitter: LineEmitter,
    pub hub: WakeHub,
    pub supervisor: Supervisor,
}

impl TailContext {
    /// Start following an already registered `path` and join a worker for it.
    pub fn spawn(&self, path: PathBuf, start_at: StartAt, poll: bool) -> Result<()> {
        let follower = Follower::start(
            path,
            FollowConfig {
                start_at,
                poll,
                poll_interval: self.config.poll_interval,
                max_line_size: self.config.buffer_limit(),
            },
            &self.hub,
        )?;
        info!(
            path = ?follower.path(),
            backend = follower.backend_name(),
            "Tailing file"
        );
        self.supervisor.spawn(tail_file(
            follower,
            self.emitter.clone(),
            self.supervisor.clone(),
        ));
        Ok(())
    }
}

/// Warn about symlinks followed without polling, whose rotation goes unseen.
pub fn warn_if_symlink(path: &Path, poll: bool) -> std::io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() && !poll {
        warn!(
            path = ?path,
            "File is a symlink but inotify is used, rotation will not be detected. \
             Consider setting poll_without_inotify to true"
        );
    }
    Ok(())
}

/// Publish every line of `follower` until the scope is cancelled or the
/// follower dies.
///
/// Cancellation is a clean exit. A dying follower ends only this worker. A
/// read error is returned, which fails the whole scope.
pub async fn tail_file(
    mut follower: Follower,
    emitter: LineEmitter,
    supervisor: Supervisor,
) -> Result<()> {
    let path = follower.path().to_path_buf();
    debug!(path = ?path, "Starting tail");

    loop {
        let batch = select! {
            biased;

            _ = supervisor.cancelled() => {
                stopping(&path);
                return Ok(());
            }
            batch = follower.read() => batch,
        };

        for line in batch.lines {
            match emitter.emit(&path, line, supervisor.token()).await {
                Ok(()) => {}
                Err(SendError::Cancelled) => {
                    stopping(&path);
                    return Ok(());
                }
                Err(SendError::Disconnected) => return Err(Error::OutputClosed),
            }
        }

        match batch.status {
            ReaderStatus::Alive => {}
            ReaderStatus::Failed(e) => {
                warn!(path = ?path, error = %e, "Fetch error");
                return Err(e);
            }
            ReaderStatus::Dead(e) => {
                warn!(path = ?path, error = %e, "File reader died");
                return Ok(());
            }
        }

        if !batch.more {
            select! {
                biased;

                _ = supervisor.cancelled() => {
                    stopping(&path);
                    return Ok(());
                }
                _ = follower.wait() => {}
            }
        }
    }
}

fn stopping(path: &Path) {
    info!(path = ?path, "File datasource stopping");
}
