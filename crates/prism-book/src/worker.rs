//! Per-instrument book task.
//!
//! The worker is the only writer of its engine. It publishes applied diffs
//! to the incremental stream, full snapshots to the snapshot stream, and
//! asks the resync dispatcher for fresh snapshots.

use crate::engine::{
    DiffOutcome, EngineConfig, OrderBookEngine, ResyncReason, SnapshotOutcome, SyncStatus,
};
use crate::error::{BookError, BookResult};
use dashmap::DashMap;
use prism_bus::PublisherHandle;
use prism_core::{InstrumentKey, NormalizedEvent, OrderBookDiff, OrderBookSnapshot};
use prism_telemetry::Metrics;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub enum BookCommand {
    Snapshot(OrderBookSnapshot),
    Diff(OrderBookDiff),
    SnapshotFailed { error: String },
    SessionReset { session: u64 },
}

/// Request for a fresh snapshot of one book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResyncRequest {
    pub key: InstrumentKey,
    pub reason: ResyncReason,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Levels per side in published snapshots.
    #[serde(default = "default_snapshot_depth")]
    pub snapshot_depth: usize,
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,
    /// A requested snapshot that has not arrived after this long counts as
    /// a failed fetch and is requested again.
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,
    /// How long a producer waits on a full book queue before dropping.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_queue_capacity() -> usize {
    4_096
}

fn default_snapshot_depth() -> usize {
    50
}

fn default_snapshot_interval_ms() -> u64 {
    10_000
}

fn default_snapshot_timeout_ms() -> u64 {
    60_000
}

fn default_send_timeout_ms() -> u64 {
    250
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            snapshot_depth: default_snapshot_depth(),
            snapshot_interval_ms: default_snapshot_interval_ms(),
            snapshot_timeout_ms: default_snapshot_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            engine: EngineConfig::default(),
        }
    }
}

pub struct BookWorker {
    engine: OrderBookEngine,
    label: String,
    rx: mpsc::Receiver<BookCommand>,
    publisher: PublisherHandle,
    resync_tx: mpsc::Sender<ResyncRequest>,
    config: BookConfig,
    /// Set while a requested snapshot is outstanding.
    resync_deadline: Option<Instant>,
    shutdown: CancellationToken,
}

impl BookWorker {
    pub fn new(
        engine: OrderBookEngine,
        rx: mpsc::Receiver<BookCommand>,
        publisher: PublisherHandle,
        resync_tx: mpsc::Sender<ResyncRequest>,
        config: BookConfig,
        shutdown: &CancellationToken,
    ) -> Self {
        let label = engine.key().to_string();
        Self {
            engine,
            label,
            rx,
            publisher,
            resync_tx,
            config,
            resync_deadline: None,
            shutdown: shutdown.child_token(),
        }
    }

    pub async fn run(mut self) {
        Metrics::book_state_set(&self.label, self.engine.status().as_str());
        let period = Duration::from_millis(self.config.snapshot_interval_ms.max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.resync_deadline;
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = ticker.tick() => self.publish_snapshot(),
                _ = sleep_until_deadline(deadline) => self.on_snapshot_timeout(),
            }
        }
        debug!(book = %self.label, "Book worker stopped");
    }

    fn handle(&mut self, command: BookCommand) {
        let before = self.engine.status();
        match command {
            BookCommand::Diff(diff) => self.on_diff(diff),
            BookCommand::Snapshot(snapshot) => self.on_snapshot(&snapshot),
            BookCommand::SnapshotFailed { error } => {
                warn!(book = %self.label, %error, "Snapshot fetch failed");
                let outcome = self.engine.snapshot_failed();
                self.on_snapshot_outcome(outcome);
            }
            BookCommand::SessionReset { session } => {
                info!(book = %self.label, session, "Session reset, resyncing book");
                self.engine.session_reset();
                self.request_resync(ResyncReason::SessionReset);
            }
        }

        for _ in 0..self.engine.take_evicted() {
            Metrics::book_diff_dropped(&self.label, "buffer_overflow");
        }
        let after = self.engine.status();
        if after != before {
            Metrics::book_state_set(&self.label, after.as_str());
        }
    }

    fn on_snapshot_timeout(&mut self) {
        self.resync_deadline = None;
        if self.engine.status() != SyncStatus::Syncing {
            return;
        }
        warn!(
            book = %self.label,
            timeout_ms = self.config.snapshot_timeout_ms,
            "Requested snapshot did not arrive"
        );
        self.handle(BookCommand::SnapshotFailed {
            error: "snapshot timed out".to_string(),
        });
    }

    fn on_diff(&mut self, diff: OrderBookDiff) {
        let outcome = match self.engine.apply_diff(&diff) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(book = %self.label, error = %e, "Diff rejected");
                Metrics::book_diff_dropped(&self.label, "invalid");
                return;
            }
        };
        match outcome {
            DiffOutcome::Applied => {
                Metrics::book_diff_applied(&self.label);
                self.publisher.submit(NormalizedEvent::OrderBookDiff(diff));
            }
            DiffOutcome::Buffered { request_snapshot } => {
                if request_snapshot {
                    self.request_resync(ResyncReason::Initial);
                }
            }
            DiffOutcome::Outdated => Metrics::book_diff_dropped(&self.label, "outdated"),
            DiffOutcome::Ignored => Metrics::book_diff_dropped(&self.label, "stale"),
            DiffOutcome::Resync(reason) => {
                Metrics::book_resync(&self.label, reason.as_str());
                self.request_resync(reason);
            }
            DiffOutcome::Stale(reason) => self.raise_stale(reason),
        }
    }

    fn on_snapshot(&mut self, snapshot: &OrderBookSnapshot) {
        match self.engine.apply_snapshot(snapshot) {
            Ok(outcome) => self.on_snapshot_outcome(outcome),
            Err(e) => warn!(book = %self.label, error = %e, "Snapshot rejected"),
        }
    }

    fn on_snapshot_outcome(&mut self, outcome: SnapshotOutcome) {
        match outcome {
            SnapshotOutcome::Synced { replayed } => {
                self.resync_deadline = None;
                for diff in replayed {
                    Metrics::book_diff_applied(&self.label);
                    self.publisher.submit(NormalizedEvent::OrderBookDiff(diff));
                }
                self.publish_snapshot();
            }
            SnapshotOutcome::Ignored => {}
            SnapshotOutcome::Resync(reason) => {
                Metrics::book_resync(&self.label, reason.as_str());
                self.request_resync(reason);
            }
            SnapshotOutcome::Stale(reason) => self.raise_stale(reason),
        }
    }

    fn publish_snapshot(&self) {
        if let Some(view) = self.engine.snapshot_view(self.config.snapshot_depth) {
            self.publisher.submit(NormalizedEvent::OrderBookSnapshot(view));
        }
    }

    /// Queue a snapshot request and arm the timeout. A request that cannot
    /// be queued is retried when the timeout fires.
    fn request_resync(&mut self, reason: ResyncReason) {
        self.resync_deadline =
            Some(Instant::now() + Duration::from_millis(self.config.snapshot_timeout_ms));
        let request = ResyncRequest {
            key: self.engine.key().clone(),
            reason,
        };
        if let Err(e) = self.resync_tx.try_send(request) {
            warn!(
                book = %self.label,
                reason = reason.as_str(),
                error = %e,
                "Resync request not queued"
            );
        }
    }

    fn raise_stale(&mut self, reason: ResyncReason) {
        self.resync_deadline = None;
        Metrics::book_resync(&self.label, reason.as_str());
        error!(
            book = %self.label,
            reason = reason.as_str(),
            "Resync budget exhausted, book is STALE until the next session"
        );
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Sender side of a book worker.
pub type BookSender = mpsc::Sender<BookCommand>;

/// Book workers by instrument.
#[derive(Clone, Default)]
pub struct BookRegistry {
    senders: Arc<DashMap<InstrumentKey, BookSender>>,
}

impl BookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the engine and channel for `key` and return the worker to spawn.
    pub fn register(
        &self,
        engine: OrderBookEngine,
        publisher: PublisherHandle,
        resync_tx: mpsc::Sender<ResyncRequest>,
        config: BookConfig,
        shutdown: &CancellationToken,
    ) -> BookWorker {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        self.senders.insert(engine.key().clone(), tx);
        BookWorker::new(engine, rx, publisher, resync_tx, config, shutdown)
    }

    pub fn sender(&self, key: &InstrumentKey) -> Option<BookSender> {
        self.senders.get(key).map(|entry| entry.value().clone())
    }

    /// Deliver a command, waiting for queue space to keep per-book order.
    pub async fn send(&self, key: &InstrumentKey, command: BookCommand) -> BookResult<()> {
        let sender = self
            .sender(key)
            .ok_or_else(|| BookError::WorkerClosed(key.clone()))?;
        sender
            .send(command)
            .await
            .map_err(|_| BookError::WorkerClosed(key.clone()))
    }

    /// Deliver a command unless the book's queue stays full for `timeout`.
    ///
    /// A dropped diff shows up as a sequence gap on the next one, so the book
    /// resyncs on its own.
    pub async fn send_timeout(
        &self,
        key: &InstrumentKey,
        command: BookCommand,
        timeout: Duration,
    ) -> BookResult<()> {
        let sender = self
            .sender(key)
            .ok_or_else(|| BookError::WorkerClosed(key.clone()))?;
        sender
            .send_timeout(command, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => BookError::QueueFull(key.clone()),
                SendTimeoutError::Closed(_) => BookError::WorkerClosed(key.clone()),
            })
    }

    pub fn keys(&self) -> Vec<InstrumentKey> {
        self.senders.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn contains(&self, key: &InstrumentKey) -> bool {
        self.senders.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
