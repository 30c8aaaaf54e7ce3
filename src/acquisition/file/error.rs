// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

use crate::acquisition::file::watcher::WatcherError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot parse file source configuration: {0}")]
    Config(String),

    #[error("no filename or filenames configuration provided")]
    NoFilenames,

    #[error("unsupported mode {0} for file source")]
    UnsupportedMode(String),

    #[error("could not compile regexp {pattern}: {source}")]
    InvalidExclude {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("glob failure for pattern {pattern}: {message}")]
    InvalidGlob { pattern: String, message: String },

    #[error("invalid DSN {0} for file source, must start with file://")]
    DsnScheme(String),

    #[error("empty file:// DSN")]
    DsnEmpty,

    #[error("unknown parameter {0}")]
    DsnUnknownParameter(String),

    #[error("expected zero or one value for '{0}'")]
    DsnArity(String),

    #[error("could not parse {key} {value}: {message}")]
    DsnValue {
        key: String,
        value: String,
        message: String,
    },

    #[error("no matching files for pattern {0}")]
    NoMatchingFiles(String),

    #[error("could not stat file {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line in {path} exceeds the {limit} byte buffer")]
    LineTooLong { path: PathBuf, limit: usize },

    #[error("watcher error: {0}")]
    Watcher(#[from] WatcherError),

    #[error("output queue closed")]
    OutputClosed,

    #[error("reader for {0} is no longer running")]
    ReaderGone(PathBuf),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;
