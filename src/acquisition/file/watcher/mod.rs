// SPDX-License-Identifier: Apache-2.0

//! File system watcher abstractions for the file source.
//!
//! Two watching strategies are available:
//! - **Native watching**: OS-level notifications (inotify on Linux, FSEvents on
//!   macOS, ReadDirectoryChangesW on Windows).
//! - **Poll watching**: periodic directory scans, for environments where native
//!   watching isn't available or reliable (e.g., NFS, network shares).
//!
//! Both push [`FileEvent`]s into a `flume` channel, which can be drained from
//! blocking threads and async tasks alike.

mod native;
mod poll;
mod traits;

pub use native::NativeWatcher;
pub use poll::PollWatcher;
pub use traits::{FileEvent, FileEventKind, FileWatcher, WatcherError};

use std::time::Duration;

use flume::Sender;

/// Default cadence of poll-based watching.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Watch mode configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatchMode {
    /// Tries native watching first, falls back to polling on failure.
    #[default]
    Auto,
    /// Force native file system watching. Fails if it cannot be initialised.
    Native,
    /// Force polling mode.
    Poll,
}

/// Create a watcher publishing on `events`.
///
/// In `Auto` mode, native watching is tried first, falling back to polling at
/// `poll_interval` when it cannot be initialised.
pub fn create_watcher(
    mode: WatchMode,
    events: Sender<FileEvent>,
    poll_interval: Duration,
) -> Result<Box<dyn FileWatcher>, WatcherError> {
    match mode {
        WatchMode::Native => Ok(Box::new(NativeWatcher::new(events)?)),
        WatchMode::Poll => Ok(Box::new(PollWatcher::new(events, poll_interval)?)),
        WatchMode::Auto => match NativeWatcher::new(events.clone()) {
            Ok(watcher) => Ok(Box::new(watcher)),
            Err(e) => {
                tracing::warn!(
                    "Native file watching unavailable ({}), falling back to polling",
                    e
                );
                Ok(Box::new(PollWatcher::new(events, poll_interval)?))
            }
        },
    }
}
