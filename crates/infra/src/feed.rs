//! In-process pub/sub used for grant change notifications and log failure
//! reports.
//!
//! - No IO / no async
//! - Best-effort fan-out; dropped subscribers are pruned on publish
//! - Per-publisher order is preserved for each subscriber

use std::sync::{Mutex, mpsc};
use std::time::Duration;

/// Receiving end of a [`Feed`]. Meant to be consumed by one thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: mpsc::Receiver<M>,
}

impl<M> Subscription<M> {
    fn new(receiver: mpsc::Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently queued, without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Broadcast feed: every subscriber gets a copy of every message.
#[derive(Debug)]
pub struct Feed<M> {
    subscribers: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> Default for Feed<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M: Clone> Feed<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, message: M) {
        match self.subscribers.lock() {
            Ok(mut subs) => subs.retain(|tx| tx.send(message.clone()).is_ok()),
            Err(_) => tracing::warn!("feed lock poisoned; message dropped"),
        }
    }

    pub fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // A poisoned lock still yields a subscription; it just never receives.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}
