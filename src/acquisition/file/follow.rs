// SPDX-License-Identifier: Apache-2.0

//! Resilient follower of a single file.
//!
//! A [`Follower`] reads appended lines from one path in short steps, each run
//! as its own blocking task so that no pool thread is held between wakeups.
//! It holds partial lines until their newline arrives, reopens the path from
//! the start when it is rotated or recreated, rewinds when the file is
//! truncated, and keeps waiting while the path is missing. Wakeups come from
//! the shared [`WakeHub`] plus a periodic re-check.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::select;
use tracing::{debug, info};

use crate::acquisition::file::error::{Error, Result};
use crate::acquisition::file::file_id::FileId;
use crate::acquisition::file::wake::{Subscription, WakeHub};

const READ_CHUNK: usize = 8 * 1024;
/// Bytes read by a single step before yielding back to the runtime.
const STEP_BUDGET: usize = 32 * READ_CHUNK;

/// Where a new follower starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAt {
    Beginning,
    End,
}

#[derive(Debug, Clone)]
pub struct FollowConfig {
    pub start_at: StartAt,
    /// Poll the directory instead of relying on native notifications.
    pub poll: bool,
    pub poll_interval: Duration,
    /// Longer lines are split at this many bytes.
    pub max_line_size: usize,
}

/// Outcome of one read step.
#[derive(Debug)]
pub struct Batch {
    /// Complete lines in file order.
    pub lines: Vec<String>,
    /// Unread data remains; read again without waiting.
    pub more: bool,
    pub status: ReaderStatus,
}

#[derive(Debug)]
pub enum ReaderStatus {
    Alive,
    /// Reading the open file failed.
    Failed(Error),
    /// The path can no longer be followed.
    Dead(Error),
}

impl Batch {
    fn alive(lines: Vec<String>, more: bool) -> Self {
        Self {
            lines,
            more,
            status: ReaderStatus::Alive,
        }
    }

    fn ended(lines: Vec<String>, status: ReaderStatus) -> Self {
        Self {
            lines,
            more: false,
            status,
        }
    }
}

pub struct Follower {
    path: PathBuf,
    state: Option<FollowState>,
    wake: Subscription,
    poll_interval: Duration,
}

impl Follower {
    /// Open `path`, position it according to `config.start_at` and subscribe
    /// to its changes.
    pub fn start(path: impl Into<PathBuf>, config: FollowConfig, hub: &WakeHub) -> Result<Self> {
        let path = path.into();

        let mut file = File::open(&path).map_err(|source| Error::Read {
            path: path.clone(),
            source,
        })?;
        let metadata = file.metadata().map_err(|source| Error::Stat {
            path: path.clone(),
            source,
        })?;
        let offset = match config.start_at {
            StartAt::Beginning => 0,
            StartAt::End => file
                .seek(SeekFrom::End(0))
                .map_err(|source| Error::Read {
                    path: path.clone(),
                    source,
                })?,
        };

        let wake = hub.subscribe(&path, config.poll)?;
        debug!(path = ?path, backend = wake.backend_name(), offset, "Starting follower");

        Ok(Self {
            state: Some(FollowState {
                path: path.clone(),
                file,
                id: FileId::from_metadata(&metadata),
                offset,
                partial: Vec::new(),
                max_line_size: config.max_line_size.max(1),
                missing: false,
            }),
            path,
            wake,
            poll_interval: config.poll_interval,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backend_name(&self) -> &'static str {
        self.wake.backend_name()
    }

    /// Read whatever is available now. Once a batch carries a status other
    /// than [`ReaderStatus::Alive`] the follower is spent and further calls
    /// report it dead.
    pub async fn read(&mut self) -> Batch {
        let Some(mut state) = self.state.take() else {
            return Batch::ended(
                Vec::new(),
                ReaderStatus::Dead(Error::ReaderGone(self.path.clone())),
            );
        };
        let step = tokio::task::spawn_blocking(move || {
            let batch = state.step();
            (state, batch)
        });
        match step.await {
            Ok((state, batch)) => {
                if let ReaderStatus::Alive = batch.status {
                    self.state = Some(state);
                }
                batch
            }
            Err(e) => Batch::ended(Vec::new(), ReaderStatus::Dead(Error::Join(e))),
        }
    }

    /// Sleep until the file changes or the poll interval elapses.
    pub async fn wait(&self) {
        select! {
            _ = self.wake.notified() => {}
            _ = tokio::time::sleep(self.poll_interval) => {}
        }
    }
}

struct FollowState {
    path: PathBuf,
    file: File,
    id: FileId,
    offset: u64,
    partial: Vec<u8>,
    max_line_size: usize,
    missing: bool,
}

enum Drained {
    Eof,
    Budget,
}

enum PathCheck {
    Unchanged,
    Switched,
}

impl FollowState {
    fn step(&mut self) -> Batch {
        let mut lines = Vec::new();
        let mut budget = STEP_BUDGET;
        loop {
            match self.read_available(&mut lines, &mut budget) {
                Ok(Drained::Eof) => {}
                Ok(Drained::Budget) => return Batch::alive(lines, true),
                Err(e) => return Batch::ended(lines, ReaderStatus::Failed(e)),
            }
            match self.check_path(&mut lines) {
                Ok(PathCheck::Unchanged) => return Batch::alive(lines, false),
                Ok(PathCheck::Switched) => {}
                Err(e) => return Batch::ended(lines, ReaderStatus::Dead(e)),
            }
        }
    }

    fn read_error(&self, source: io::Error) -> Error {
        Error::Read {
            path: self.path.clone(),
            source,
        }
    }

    fn read_available(&mut self, lines: &mut Vec<String>, budget: &mut usize) -> Result<Drained> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if *budget == 0 {
                return Ok(Drained::Budget);
            }
            let want = READ_CHUNK.min(*budget);
            let n = match self.file.read(&mut buf[..want]) {
                Ok(0) => return Ok(Drained::Eof),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(self.read_error(source)),
            };
            *budget -= n;
            self.offset += n as u64;

            let mut chunk = &buf[..n];
            while let Some(pos) = chunk.iter().position(|b| *b == b'\n') {
                self.partial.extend_from_slice(&chunk[..pos]);
                chunk = &chunk[pos + 1..];
                lines.push(decode(std::mem::take(&mut self.partial)));
            }
            self.partial.extend_from_slice(chunk);

            while self.partial.len() > self.max_line_size {
                let rest = self.partial.split_off(self.max_line_size);
                lines.push(decode(std::mem::replace(&mut self.partial, rest)));
            }
        }
    }

    /// Compare what the path names now with the open file.
    fn check_path(&mut self, lines: &mut Vec<String>) -> Result<PathCheck> {
        let metadata = match fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !self.missing {
                    info!(path = ?self.path, "File was removed, waiting for it to reappear");
                    self.missing = true;
                }
                return Ok(PathCheck::Unchanged);
            }
            Err(source) => {
                return Err(Error::Stat {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if FileId::from_metadata(&metadata) != self.id {
            return self.reopen(lines);
        }
        self.missing = false;

        if metadata.len() < self.offset {
            info!(path = ?self.path, "File truncated, reading from the start");
            self.file
                .seek(SeekFrom::Start(0))
                .map_err(|source| self.read_error(source))?;
            self.offset = 0;
            self.partial.clear();
            return Ok(PathCheck::Switched);
        }
        Ok(PathCheck::Unchanged)
    }

    /// Switch to the file now present at the path, reading it from the start.
    fn reopen(&mut self, lines: &mut Vec<String>) -> Result<PathCheck> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            // Lost a race with another rotation step; retry on the next wake.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PathCheck::Unchanged),
            Err(source) => return Err(self.read_error(source)),
        };
        let metadata = file.metadata().map_err(|source| Error::Stat {
            path: self.path.clone(),
            source,
        })?;

        if self.missing {
            info!(path = ?self.path, "File reappeared, re-opening");
        } else {
            info!(path = ?self.path, "File was rotated, re-opening");
        }

        // A partial line left in the old file is complete as far as we know.
        if !self.partial.is_empty() {
            lines.push(decode(std::mem::take(&mut self.partial)));
        }

        self.file = file;
        self.id = FileId::from_metadata(&metadata);
        self.offset = 0;
        self.missing = false;
        Ok(PathCheck::Switched)
    }
}

fn decode(mut line: Vec<u8>) -> String {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8_lossy(&line).into_owned()
}
