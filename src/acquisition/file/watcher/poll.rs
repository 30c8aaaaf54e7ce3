// SPDX-License-Identifier: Apache-2.0

//! Polling-based file watcher as a fallback for systems where native
//! file system notifications are unavailable or unreliable (e.g., NFS).

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use flume::Sender;

use super::traits::{FileEvent, FileWatcher, WatcherError};

/// File metadata for change detection
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileState {
    modified: SystemTime,
    size: u64,
}

impl FileState {
    fn from_metadata(metadata: &fs::Metadata) -> Option<Self> {
        Some(Self {
            modified: metadata.modified().ok()?,
            size: metadata.len(),
        })
    }
}

/// Paths being polled and what was last seen under them. A watched regular
/// file is tracked on its own; a watched directory contributes every regular
/// file directly inside it.
#[derive(Default)]
struct Targets {
    paths: Vec<PathBuf>,
    file_states: HashMap<PathBuf, FileState>,
}

impl Targets {
    /// Record what is under `target` now, without reporting it.
    fn baseline(&mut self, target: &Path) {
        for (path, state) in list_files(target) {
            self.file_states.insert(path, state);
        }
    }

    /// Forget `target` and every file recorded under it.
    fn forget(&mut self, target: &Path) {
        self.paths.retain(|p| p != target);
        self.file_states
            .retain(|path, _| path != target && path.parent() != Some(target));
    }

    /// Rescan every target and report what changed since the last scan.
    fn scan(&mut self) -> Vec<FileEvent> {
        let mut events = Vec::new();
        let mut seen_files: HashSet<PathBuf> = HashSet::with_capacity(self.file_states.len());

        for target in &self.paths {
            for (path, state) in list_files(target) {
                seen_files.insert(path.clone());
                match self.file_states.entry(path) {
                    Entry::Vacant(entry) => {
                        events.push(FileEvent::create(entry.key().clone()));
                        entry.insert(state);
                    }
                    Entry::Occupied(mut entry) => {
                        if *entry.get() != state {
                            events.push(FileEvent::modify(entry.key().clone()));
                            entry.insert(state);
                        }
                    }
                }
            }
        }

        self.file_states.retain(|path, _| {
            if seen_files.contains(path) {
                true
            } else {
                events.push(FileEvent::remove(path.clone()));
                false
            }
        });

        events
    }
}

fn list_files(target: &Path) -> Vec<(PathBuf, FileState)> {
    let metadata = match fs::metadata(target) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!("Error scanning {:?}: {}", target, e);
            return Vec::new();
        }
    };

    if metadata.is_file() {
        return FileState::from_metadata(&metadata)
            .map(|state| vec![(target.to_path_buf(), state)])
            .unwrap_or_default();
    }
    if !metadata.is_dir() {
        return Vec::new();
    }

    let entries = match fs::read_dir(target) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Error scanning directory {:?}: {}", target, e);
            return Vec::new();
        }
    };
    entries
        .flatten()
        .filter_map(|entry| {
            let m = entry.metadata().ok()?;
            if !m.is_file() {
                return None;
            }
            Some((entry.path(), FileState::from_metadata(&m)?))
        })
        .collect()
}

/// Polling-based file watcher.
///
/// A background thread rescans the watched paths every `poll_interval` and
/// publishes create, modify and remove events for what changed since the
/// previous scan. Files present when a path is watched are its baseline and
/// are never reported as created. The thread exits when the watcher is
/// dropped or the event receiver goes away.
pub struct PollWatcher {
    targets: Arc<Mutex<Targets>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PollWatcher {
    pub fn new(events: Sender<FileEvent>, poll_interval: Duration) -> Result<Self, WatcherError> {
        let targets = Arc::new(Mutex::new(Targets::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let scanner = Scanner {
            targets: targets.clone(),
            events,
        };
        let thread_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("file-poll-watcher".to_string())
            .spawn(move || scanner.run(poll_interval, thread_stop))
            .map_err(|e| WatcherError::Init(e.to_string()))?;

        Ok(Self {
            targets,
            stop,
            handle: Some(handle),
        })
    }
}

fn lock(targets: &Mutex<Targets>) -> MutexGuard<'_, Targets> {
    match targets.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Drop for PollWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl FileWatcher for PollWatcher {
    fn watch(&mut self, path: &Path) -> Result<(), WatcherError> {
        // Fail early on paths that do not exist, like the native backend.
        fs::metadata(path)?;

        let mut targets = lock(&self.targets);
        if !targets.paths.iter().any(|p| p == path) {
            targets.baseline(path);
            targets.paths.push(path.to_path_buf());
        }
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> Result<(), WatcherError> {
        lock(&self.targets).forget(path);
        Ok(())
    }

    fn is_native(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "poll"
    }
}

struct Scanner {
    targets: Arc<Mutex<Targets>>,
    events: Sender<FileEvent>,
}

/// Granularity at which the scanner thread re-checks its stop flag.
const STOP_CHECK_SLICE: Duration = Duration::from_millis(25);

impl Scanner {
    fn run(&self, poll_interval: Duration, stop: Arc<AtomicBool>) {
        while !stop.load(Ordering::SeqCst) {
            // Scanning under the lock keeps a concurrent `watch` baseline intact.
            let events = lock(&self.targets).scan();

            for event in events {
                if self.events.send(event).is_err() {
                    return;
                }
            }

            let mut slept = Duration::ZERO;
            while slept < poll_interval && !stop.load(Ordering::SeqCst) {
                let slice = STOP_CHECK_SLICE.min(poll_interval - slept);
                std::thread::sleep(slice);
                slept += slice;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::traits::FileEventKind;
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn wait_for(
        rx: &flume::Receiver<FileEvent>,
        kind: FileEventKind,
        name: &str,
    ) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            if let Ok(event) = rx.recv_timeout(Duration::from_millis(50)) {
                if event.kind == kind && event.paths.iter().any(|p| p.ends_with(name)) {
                    return true;
                }
            }
        }
        false
    }

    #[test]
    fn test_poll_watcher_detects_new_file() {
        let temp_dir = TempDir::new().unwrap();
        File::create(temp_dir.path().join("existing.log")).unwrap();

        let (tx, rx) = flume::unbounded();
        let mut watcher = PollWatcher::new(tx, Duration::from_millis(20)).unwrap();
        watcher.watch(temp_dir.path()).unwrap();
        File::create(temp_dir.path().join("test.log")).unwrap();

        assert!(wait_for(&rx, FileEventKind::Create, "test.log"));
        assert!(
            rx.try_iter()
                .all(|e| !e.paths.iter().any(|p| p.ends_with("existing.log"))
                    || e.kind != FileEventKind::Create),
            "baseline files must not be reported as created"
        );
    }

    #[test]
    fn test_poll_watcher_detects_file_modify() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.log");
        fs::write(&file_path, "initial\n").unwrap();

        let (tx, rx) = flume::unbounded();
        let mut watcher = PollWatcher::new(tx, Duration::from_millis(20)).unwrap();
        watcher.watch(temp_dir.path()).unwrap();
        std::thread::sleep(Duration::from_millis(60));

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&file_path)
            .unwrap();
        file.write_all(b"more content\n").unwrap();

        assert!(wait_for(&rx, FileEventKind::Modify, "test.log"));
    }

    #[test]
    fn test_poll_watcher_detects_file_remove() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.log");
        File::create(&file_path).unwrap();

        let (tx, rx) = flume::unbounded();
        let mut watcher = PollWatcher::new(tx, Duration::from_millis(20)).unwrap();
        watcher.watch(temp_dir.path()).unwrap();
        std::thread::sleep(Duration::from_millis(60));

        fs::remove_file(&file_path).unwrap();

        assert!(wait_for(&rx, FileEventKind::Remove, "test.log"));
    }

    #[test]
    fn test_file_created_right_after_watch_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, rx) = flume::unbounded();
        // A long interval: the first scan happens well after the creation.
        let mut watcher = PollWatcher::new(tx, Duration::from_millis(300)).unwrap();

        // Let the scanner finish its initial pass over no targets.
        std::thread::sleep(Duration::from_millis(50));
        watcher.watch(temp_dir.path()).unwrap();
        File::create(temp_dir.path().join("racy.log")).unwrap();

        assert!(wait_for(&rx, FileEventKind::Create, "racy.log"));
    }

    #[test]
    fn test_unwatch_forgets_files_silently() {
        let temp_dir = TempDir::new().unwrap();
        File::create(temp_dir.path().join("kept.log")).unwrap();

        let (tx, rx) = flume::unbounded();
        let mut watcher = PollWatcher::new(tx, Duration::from_millis(20)).unwrap();
        watcher.watch(temp_dir.path()).unwrap();
        watcher.unwatch(temp_dir.path()).unwrap();

        std::thread::sleep(Duration::from_millis(100));
        assert!(rx.try_iter().next().is_none());
    }

    #[test]
    fn test_poll_watcher_rejects_missing_path() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, _rx) = flume::unbounded();
        let mut watcher = PollWatcher::new(tx, Duration::from_millis(20)).unwrap();

        assert!(watcher.watch(&temp_dir.path().join("missing")).is_err());
        assert!(!watcher.is_native());
        assert_eq!(watcher.backend_name(), "poll");
    }
}
