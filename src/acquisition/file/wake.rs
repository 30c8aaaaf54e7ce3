// SPDX-License-Identifier: Apache-2.0

//! Change notifications shared by every follower of one acquisition run.
//!
//! A [`WakeHub`] owns at most two watchers, one native and one polling, and
//! subscribes each directory once however many followed files it holds. Its
//! dispatcher routes every event to the followers of the paths involved, so
//! the number of inotify instances and scanner threads does not grow with the
//! number of tailed files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::select;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::acquisition::file::error::Result;
use crate::acquisition::file::watcher::{self, FileEvent, FileWatcher, WatchMode};

#[derive(Clone)]
pub struct WakeHub {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    events: flume::Receiver<FileEvent>,
}

struct State {
    sender: flume::Sender<FileEvent>,
    poll_interval: Duration,
    native: Option<Box<dyn FileWatcher>>,
    polling: Option<Box<dyn FileWatcher>>,
    /// Followed files per subscribed (directory, polled) pair.
    directories: HashMap<(PathBuf, bool), usize>,
    followers: HashMap<PathBuf, Vec<Arc<Notify>>>,
}

impl State {
    fn watcher(&mut self, poll: bool) -> Result<&mut Box<dyn FileWatcher>> {
        let slot = if poll {
            &mut self.polling
        } else {
            &mut self.native
        };
        let watcher = match slot.take() {
            Some(watcher) => watcher,
            None => {
                let mode = if poll { WatchMode::Poll } else { WatchMode::Auto };
                let watcher =
                    watcher::create_watcher(mode, self.sender.clone(), self.poll_interval)?;
                debug!(
                    backend = watcher.backend_name(),
                    native = watcher.is_native(),
                    "Created follower watcher"
                );
                watcher
            }
        };
        Ok(slot.insert(watcher))
    }
}

/// Directory holding `path`, as watchers report it.
pub fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf()
}

impl WakeHub {
    /// `poll_interval` is the scan cadence of the polling watcher.
    pub fn new(poll_interval: Duration) -> Self {
        let (sender, events) = flume::unbounded();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    sender,
                    poll_interval,
                    native: None,
                    polling: None,
                    directories: HashMap::new(),
                    followers: HashMap::new(),
                }),
                events,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Receive wakeups for changes to `path`, through the polling watcher
    /// when `poll` is set. The parent directory must exist.
    pub fn subscribe(&self, path: &Path, poll: bool) -> Result<Subscription> {
        let dir = parent_dir(path);
        let mut guard = self.lock();
        let state = &mut *guard;

        let key = (dir.clone(), poll);
        let backend = state.watcher(poll)?.backend_name();
        if !state.directories.contains_key(&key) {
            state.watcher(poll)?.watch(&dir)?;
            debug!(directory = ?dir, backend, "Watching directory for followed files");
        }
        *state.directories.entry(key).or_default() += 1;

        let notify = Arc::new(Notify::new());
        state
            .followers
            .entry(path.to_path_buf())
            .or_default()
            .push(notify.clone());

        Ok(Subscription {
            hub: self.clone(),
            path: path.to_path_buf(),
            dir,
            poll,
            backend,
            notify,
        })
    }

    fn unsubscribe(&self, sub: &Subscription) {
        let mut guard = self.lock();
        let state = &mut *guard;

        if let Some(list) = state.followers.get_mut(&sub.path) {
            list.retain(|n| !Arc::ptr_eq(n, &sub.notify));
            if list.is_empty() {
                state.followers.remove(&sub.path);
            }
        }

        let key = (sub.dir.clone(), sub.poll);
        let Some(count) = state.directories.get_mut(&key) else {
            return;
        };
        *count -= 1;
        if *count > 0 {
            return;
        }
        state.directories.remove(&key);

        let watcher = if sub.poll {
            state.polling.as_mut()
        } else {
            state.native.as_mut()
        };
        if let Some(watcher) = watcher {
            if let Err(e) = watcher.unwatch(&sub.dir) {
                debug!(directory = ?sub.dir, error = %e, "Could not remove watch");
            }
        }
    }

    /// Route events to followers until `cancel` fires, then drop the
    /// watchers.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    self.shutdown();
                    return Ok(());
                }

                event = self.inner.events.recv_async() => match event {
                    Ok(event) => self.dispatch(&event),
                    Err(_) => return Ok(()),
                },
            }
        }
    }

    fn dispatch(&self, event: &FileEvent) {
        let state = self.lock();
        for path in &event.paths {
            let dir = parent_dir(path);
            // An event on a subscribed directory itself wakes everything in it.
            let whole_dir = state.directories.keys().any(|(watched, _)| watched == path);
            state
                .followers
                .iter()
                .filter(|(followed, _)| {
                    let followed_dir = parent_dir(followed);
                    (followed_dir == dir && followed.file_name() == path.file_name())
                        || (whole_dir && followed_dir == *path)
                })
                .flat_map(|(_, list)| list.iter())
                .for_each(|n| n.notify_one());
        }
    }

    fn shutdown(&self) {
        let (native, polling) = {
            let mut state = self.lock();
            (state.native.take(), state.polling.take())
        };
        // Dropped outside the lock: the poll watcher joins its thread.
        drop(native);
        drop(polling);
        debug!("Follower watchers released");
    }
}

/// Wakeups for one followed path. Dropping it releases the directory watch
/// once no other follower needs it.
pub struct Subscription {
    hub: WakeHub,
    path: PathBuf,
    dir: PathBuf,
    poll: bool,
    backend: &'static str,
    notify: Arc<Notify>,
}

impl Subscription {
    pub fn backend_name(&self) -> &'static str {
        self.backend
    }

    /// Resolves on the next change reported since the previous wakeup.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self);
    }
}
