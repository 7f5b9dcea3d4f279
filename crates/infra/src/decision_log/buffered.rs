//! Buffered decision log: `emit` enqueues, one worker thread writes.
//!
//! A single worker drains the queue FIFO, so entries reach the inner sink in
//! emit order (and per-user order is preserved for audit replay).

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError, TrySendError};
use std::sync::Arc;
use std::thread;

use serde::Serialize;

use accord_auth::{DecisionLogEntry, DecisionLogSink, LogWriteError};
use accord_core::{DecisionId, UserId};

use super::DecisionLogConfig;
use crate::feed::{Feed, Subscription};

/// An entry the inner sink refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFailure {
    pub decision_id: DecisionId,
    pub user_id: UserId,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub accepted: u64,
    pub rejected: u64,
    pub written: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> BufferStats {
        BufferStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Sink half, handed to the engine. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BufferedDecisionLog {
    sender: mpsc::SyncSender<DecisionLogEntry>,
    counters: Arc<Counters>,
    failures: Arc<Feed<LogFailure>>,
}

/// Worker half. Dropping it stops the worker the same way `shutdown` does,
/// without waiting for it.
#[derive(Debug)]
pub struct BufferedLogHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl BufferedLogHandle {
    /// Write everything already queued, then stop the worker.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::error!("decision log worker panicked");
            }
        }
    }

    pub fn stats(&self) -> BufferStats {
        self.counters.snapshot()
    }
}

impl BufferedDecisionLog {
    /// Start a worker writing into `inner`.
    pub fn spawn<L>(inner: L, config: &DecisionLogConfig) -> io::Result<(Self, BufferedLogHandle)>
    where
        L: DecisionLogSink + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(config.buffer_capacity);
        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let counters = Arc::new(Counters::default());
        let failures = Arc::new(Feed::new());

        let worker = Worker {
            inner,
            receiver,
            shutdown: shutdown_rx,
            config: config.clone(),
            counters: counters.clone(),
            failures: failures.clone(),
        };
        let join = thread::Builder::new()
            .name("decision-log".to_string())
            .spawn(move || worker.run())?;

        Ok((
            Self {
                sender,
                counters: counters.clone(),
                failures,
            },
            BufferedLogHandle {
                shutdown: shutdown_tx,
                join: Some(join),
                counters,
            },
        ))
    }

    /// Entries the inner sink failed to write, as they happen.
    pub fn subscribe_failures(&self) -> Subscription<LogFailure> {
        self.failures.subscribe()
    }

    pub fn stats(&self) -> BufferStats {
        self.counters.snapshot()
    }
}

impl DecisionLogSink for BufferedDecisionLog {
    fn emit(&self, entry: DecisionLogEntry) -> Result<(), LogWriteError> {
        match self.sender.try_send(entry) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(LogWriteError::BufferFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(LogWriteError::Closed)
            }
        }
    }
}

struct Worker<L> {
    inner: L,
    receiver: mpsc::Receiver<DecisionLogEntry>,
    shutdown: mpsc::Receiver<()>,
    config: DecisionLogConfig,
    counters: Arc<Counters>,
    failures: Arc<Feed<LogFailure>>,
}

impl<L: DecisionLogSink> Worker<L> {
    fn run(self) {
        tracing::debug!("decision log worker started");
        let batch_size = self.config.batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size);

        loop {
            let stopping = match self.shutdown.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => true,
                Err(TryRecvError::Empty) => false,
            };
            if stopping {
                self.drain(&mut batch, batch_size);
                break;
            }

            match self.receiver.recv_timeout(self.config.flush_interval) {
                Ok(entry) => {
                    batch.push(entry);
                    while batch.len() < batch_size {
                        match self.receiver.try_recv() {
                            Ok(entry) => batch.push(entry),
                            Err(_) => break,
                        }
                    }
                    self.write_batch(&mut batch);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // Every sender is gone and the queue is empty.
                    break;
                }
            }
        }

        if let Err(err) = self.inner.flush() {
            tracing::error!(error = %err, "final decision log flush failed");
        }
        tracing::debug!("decision log worker stopped");
    }

    fn drain(&self, batch: &mut Vec<DecisionLogEntry>, batch_size: usize) {
        loop {
            batch.extend(self.receiver.try_iter().take(batch_size));
            if batch.is_empty() {
                return;
            }
            self.write_batch(batch);
        }
    }

    fn write_batch(&self, batch: &mut Vec<DecisionLogEntry>) {
        for entry in batch.drain(..) {
            let (decision_id, user_id) = (entry.id, entry.user_id);
            match self.inner.emit(entry) {
                Ok(()) => {
                    self.counters.written.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(decision = %decision_id, error = %err, "decision log write failed");
                    self.failures.publish(LogFailure {
                        decision_id,
                        user_id,
                        error: err.to_string(),
                    });
                }
            }
        }
        if let Err(err) = self.inner.flush() {
            tracing::error!(error = %err, "decision log flush failed");
        }
    }
}
