// SPDX-License-Identifier: Apache-2.0

//! Bounded flume channels used as the acquisition output queue.
//!
//! A full queue blocks producers. Every send variant also observes a
//! cancellation token so that a stalled consumer can never pin a worker past
//! shutdown.

use flume::{Receiver, SendTimeoutError, Sender};
use std::fmt;
use std::time::Duration;
use tokio::select;
use tokio_util::sync::CancellationToken;

/// How long a blocking send waits before re-checking cancellation.
const BLOCKING_SEND_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    /// The consumer side is gone.
    Disconnected,
    /// The cancellation token fired before the item was accepted.
    Cancelled,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
            SendError::Cancelled => write!(f, "send cancelled"),
        }
    }
}

impl std::error::Error for SendError {}

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

impl<T> BoundedSender<T> {
    /// Send, waiting for capacity, unless `cancel` fires first.
    pub async fn send(&self, item: T, cancel: &CancellationToken) -> Result<(), SendError> {
        let send_fut = self.tx.send_async(item);
        tokio::pin!(send_fut);

        select! {
            biased;

            _ = cancel.cancelled() => Err(SendError::Cancelled),
            result = &mut send_fut => result.map_err(|_| SendError::Disconnected),
        }
    }

    /// Blocking variant of [`send`](Self::send) for dedicated I/O threads.
    pub fn send_blocking(&self, item: T, cancel: &CancellationToken) -> Result<(), SendError> {
        let mut item = item;
        loop {
            if cancel.is_cancelled() {
                return Err(SendError::Cancelled);
            }
            match self.tx.send_timeout(item, BLOCKING_SEND_SLICE) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => item = back,
                Err(SendTimeoutError::Disconnected(_)) => return Err(SendError::Disconnected),
            }
        }
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Returns `None` once every sender has been dropped and the queue is drained.
    pub async fn next(&self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Non-blocking receive. `None` if nothing is queued or the channel is gone.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);

    (BoundedSender { tx }, BoundedReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::{SendError, bounded};
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task::spawn};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn basics() {
        let (tx, rx) = bounded(3);
        let cancel = CancellationToken::new();

        let mut recv1 = spawn(async { rx.next().await });
        assert_pending!(recv1.poll());

        tx.send(10, &cancel).await.unwrap();

        assert!(recv1.is_woken());
        assert_eq!(Some(10), assert_ready!(recv1.poll()));
    }

    #[tokio::test]
    async fn full_queue_send_is_cancellable() {
        let (tx, _rx) = bounded(1);
        let cancel = CancellationToken::new();

        tx.send(1, &cancel).await.unwrap();

        let mut blocked = spawn(async { tx.send(2, &cancel).await });
        assert_pending!(blocked.poll());

        cancel.cancel();
        assert!(blocked.is_woken());
        assert_eq!(Err(SendError::Cancelled), assert_ready!(blocked.poll()));
    }

    #[tokio::test]
    async fn send_after_receiver_dropped() {
        let (tx, rx) = bounded(1);
        drop(rx);

        let cancel = CancellationToken::new();
        assert_eq!(Err(SendError::Disconnected), tx.send(1, &cancel).await);
        assert_eq!(Err(SendError::Disconnected), tx.send_blocking(1, &cancel));
    }

    #[test]
    fn blocking_send_observes_cancellation() {
        let (tx, _rx) = bounded(1);
        let cancel = CancellationToken::new();
        tx.send_blocking(1, &cancel).unwrap();

        let canceller = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });

        assert_eq!(Err(SendError::Cancelled), tx.send_blocking(2, &cancel));
        handle.join().unwrap();
    }

    #[test]
    fn receiver_none_when_senders_gone() {
        let (tx, rx) = bounded::<u32>(1);
        drop(tx);
        assert_eq!(None, tokio_test::block_on(rx.next()));
    }
}
