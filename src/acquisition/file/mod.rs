// SPDX-License-Identifier: Apache-2.0

//! File source: discovers log files from glob patterns, follows them through
//! rotation, truncation and late creation, or reads them once, and publishes
//! one [`LineEvent`](crate::acquisition::event::LineEvent) per non-empty line.

pub mod config;
pub mod directory;
pub mod dsn;
pub mod emitter;
pub mod error;
mod file_id;
pub mod follow;
pub mod metrics;
pub mod netfs;
pub mod oneshot;
pub mod registry;
pub mod resolver;
pub mod source;
pub mod tail;
pub mod wake;
pub mod watcher;

pub use config::{FileSourceConfig, SourceConfig};
pub use error::{Error, Result};
pub use source::FileSource;
