// SPDX-License-Identifier: Apache-2.0

//! Supervision scope shared by every worker of one acquisition run.
//!
//! Workers are spawned through [`Supervisor::spawn`]. The first worker that
//! returns an error becomes the run's fatal error and cancels every other
//! joined worker. [`Supervisor::kill`] does the same from outside a worker,
//! and `kill(None)` is the "done, no error" signal of a one-shot pass.
//! Hooks registered with [`Supervisor::on_shutdown`] run once every worker
//! has finished.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::acquisition::BoxError;

#[derive(Clone, Default)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancel: CancellationToken,
    tracker: TaskTracker,
    first_error: Mutex<Option<Arc<BoxError>>>,
    shutdown_hooks: Mutex<Vec<ShutdownHook>>,
}

type ShutdownHook = Box<dyn FnOnce() + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a scope that is also cancelled when `parent` is.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancel: parent.child_token(),
                ..Default::default()
            }),
        }
    }

    /// Spawn a joined worker. An `Err` result kills the whole scope.
    pub fn spawn<F, E>(&self, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let supervisor = self.clone();
        self.inner.tracker.spawn(async move {
            if let Err(e) = task.await {
                supervisor.kill(Some(e.into()));
            }
        });
    }

    /// Request cancellation of every joined worker, recording `err` if it is
    /// the first fatal error of this scope.
    pub fn kill(&self, err: Option<BoxError>) {
        if let Some(err) = err {
            let mut first = lock(&self.inner.first_error);
            if first.is_none() {
                error!(error = %err, "Acquisition failed, stopping all workers");
                *first = Some(Arc::new(err));
            } else {
                debug!(error = %err, "Additional worker error after first failure");
            }
        }
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancel.cancelled()
    }

    /// Token observed by blocking waits.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// First fatal error recorded so far.
    pub fn err(&self) -> Option<Arc<BoxError>> {
        lock(&self.inner.first_error).clone()
    }

    pub fn active_workers(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Run `hook` after the last worker of this scope has finished.
    pub fn on_shutdown(&self, hook: impl FnOnce() + Send + 'static) {
        lock(&self.inner.shutdown_hooks).push(Box::new(hook));
    }

    /// Wait for every joined worker to finish, run the shutdown hooks and
    /// return the first fatal error.
    ///
    /// No new workers may be spawned once this is called.
    pub async fn wait(&self) -> Result<(), Arc<BoxError>> {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        let hooks = std::mem::take(&mut *lock(&self.inner.shutdown_hooks));
        for hook in hooks {
            hook();
        }
        match self.err() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
