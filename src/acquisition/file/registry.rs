// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Set of paths currently under an active tail.
///
/// Startup scanning and the directory watcher both claim paths through
/// [`TailRegistry::try_register`], so a file discovered by both is tailed
/// once. The lock is only held for the check-and-set itself.
#[derive(Debug, Clone, Default)]
pub struct TailRegistry {
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl TailRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claim `path`. Returns false if it is already tailed.
    pub fn try_register(&self, path: &Path) -> bool {
        self.lock().insert(path.to_path_buf())
    }

    /// Give back a claim whose follower could not be started.
    pub fn release(&self, path: &Path) {
        self.lock().remove(path);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget every claim. Only used at full shutdown.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_register_is_exclusive() {
        let registry = TailRegistry::new();
        let path = Path::new("/var/log/syslog");

        assert!(registry.try_register(path));
        assert!(!registry.try_register(path));
        assert_eq!(registry.len(), 1);

        registry.release(path);
        assert!(registry.try_register(path));

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_registration_has_single_winner() {
        let registry = TailRegistry::new();
        let winners = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let winners = winners.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    for i in 0..100 {
                        let path = PathBuf::from(format!("/var/log/app-{}.log", i));
                        if registry.try_register(&path) {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 100);
        assert_eq!(registry.len(), 100);
    }
}
