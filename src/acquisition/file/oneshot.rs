// SPDX-License-Identifier: Apache-2.0

//! Sequential, non-streaming reading of resolved files.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::acquisition::file::emitter::LineEmitter;
use crate::acquisition::file::error::{Error, Result};
use crate::bounded_channel::SendError;

enum Flow {
    Continue,
    Stop,
}

/// Read every file once, in order, on the calling thread.
///
/// Stops early and cleanly when `cancel` fires. A stat or read error aborts
/// the remaining files.
pub fn read_files(
    files: &[PathBuf],
    emitter: &LineEmitter,
    buffer_limit: usize,
    cancel: &CancellationToken,
) -> Result<()> {
    for path in files {
        let metadata = fs::metadata(path).map_err(|source| Error::Stat {
            path: path.clone(),
            source,
        })?;
        if metadata.is_dir() {
            warn!(path = ?path, "Path is a directory, ignoring it");
            continue;
        }

        info!(path = ?path, "Reading file at once");
        if let Flow::Stop = read_file(path, emitter, buffer_limit, cancel)? {
            info!(path = ?path, "File datasource stopping");
            return Ok(());
        }
    }
    Ok(())
}

fn open(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(MultiGzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

fn read_file(
    path: &Path,
    emitter: &LineEmitter,
    buffer_limit: usize,
    cancel: &CancellationToken,
) -> Result<Flow> {
    let mut reader = BufReader::new(open(path)?);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = (&mut reader)
            .take(buffer_limit as u64 + 1)
            .read_until(b'\n', &mut buf)
            .map_err(|source| {
                error!(path = ?path, error = %source, "Error while reading file");
                Error::Read {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        if n == 0 {
            return Ok(Flow::Continue);
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        } else if buf.len() > buffer_limit {
            error!(path = ?path, limit = buffer_limit, "Line exceeds buffer size");
            return Err(Error::LineTooLong {
                path: path.to_path_buf(),
                limit: buffer_limit,
            });
        }

        if cancel.is_cancelled() {
            return Ok(Flow::Stop);
        }

        let text = String::from_utf8_lossy(&buf).into_owned();
        match emitter.emit_blocking(path, text, cancel) {
            Ok(()) => {}
            Err(SendError::Cancelled) => return Ok(Flow::Stop),
            Err(SendError::Disconnected) => return Err(Error::OutputClosed),
        }
    }
}
