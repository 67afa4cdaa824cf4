//! Queued, retrying publisher.
//!
//! Producers hand events to a [`PublisherHandle`] without blocking; a single
//! drain task owns the sink and publishes in submission order. Under
//! sustained backpressure the queue drops its oldest entries.

use crate::envelope::Envelope;
use crate::error::{BusResult, PublishError, SinkError};
use crate::sink::{Ack, BusSink};
use parking_lot::Mutex;
use prism_core::{retry_with_backoff, NormalizedEvent, RetryError, RetryPolicy};
use prism_telemetry::Metrics;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_retry")]
    pub retry: RetryPolicy,
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_ack_timeout_ms() -> u64 {
    5_000
}

fn default_retry() -> RetryPolicy {
    RetryPolicy::new(3, 100, 2_000)
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            ack_timeout_ms: default_ack_timeout_ms(),
            retry: default_retry(),
        }
    }
}

struct Queue {
    entries: Mutex<VecDeque<Envelope>>,
    capacity: usize,
    notify: Notify,
    submitted: AtomicU64,
    dropped: AtomicU64,
}

impl Queue {
    fn push(&self, envelope: Envelope) {
        let depth = {
            let mut entries = self.entries.lock();
            if entries.len() >= self.capacity {
                if let Some(evicted) = entries.pop_front() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    Metrics::publish_dropped("queue_full");
                    debug!(subject = %evicted.subject, "Publish queue full, dropped oldest");
                }
            }
            entries.push_back(envelope);
            entries.len()
        };
        self.submitted.fetch_add(1, Ordering::Relaxed);
        Metrics::publish_queue_depth(depth);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Envelope> {
        let mut entries = self.entries.lock();
        let envelope = entries.pop_front();
        Metrics::publish_queue_depth(entries.len());
        envelope
    }
}

/// Cheap, cloneable producer side of the publisher.
#[derive(Clone)]
pub struct PublisherHandle {
    queue: Arc<Queue>,
}

impl PublisherHandle {
    /// Enqueue an event. Never blocks; events without a valid subject are
    /// dropped and counted.
    pub fn submit(&self, event: NormalizedEvent) {
        match Envelope::new(event) {
            Ok(envelope) => self.queue.push(envelope),
            Err(e) => {
                Metrics::publish_dropped("invalid_subject");
                warn!(error = %e, "Event dropped before publishing");
            }
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.entries.lock().len()
    }

    pub fn submitted(&self) -> u64 {
        self.queue.submitted.load(Ordering::Relaxed)
    }

    /// Entries evicted by the drop-oldest policy.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

pub struct Publisher<S: BusSink> {
    sink: Arc<S>,
    queue: Arc<Queue>,
    config: PublisherConfig,
    shutdown: CancellationToken,
}

impl<S: BusSink> Publisher<S> {
    pub fn new(sink: S, config: PublisherConfig, shutdown: &CancellationToken) -> Self {
        let queue = Arc::new(Queue {
            entries: Mutex::new(VecDeque::with_capacity(config.queue_capacity.min(65_536))),
            capacity: config.queue_capacity.max(1),
            notify: Notify::new(),
            submitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        Self {
            sink: Arc::new(sink),
            queue,
            config,
            shutdown: shutdown.child_token(),
        }
    }

    pub fn handle(&self) -> PublisherHandle {
        PublisherHandle {
            queue: self.queue.clone(),
        }
    }

    /// Publish one envelope with bounded retries.
    pub async fn publish(&self, envelope: &Envelope) -> BusResult<Ack> {
        let payload = envelope.payload()?;
        let ack_timeout = Duration::from_millis(self.config.ack_timeout_ms);

        let result = retry_with_backoff(
            &self.config.retry,
            |_attempt| {
                let payload = payload.clone();
                async move {
                    match tokio::time::timeout(
                        ack_timeout,
                        self.sink
                            .publish(&envelope.subject, &envelope.dedup_key, payload),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(SinkError::AckTimeout(self.config.ack_timeout_ms)),
                    }
                }
            },
            SinkError::is_retryable,
        )
        .await;

        result.map_err(|e| match e {
            RetryError::Exhausted { attempts, last } => {
                PublishError::RetriesExhausted { attempts, last }
            }
            RetryError::Aborted { error, .. } => PublishError::Rejected(error),
        })
    }

    /// Drain the queue until cancelled, then flush what is left.
    pub async fn run(self) {
        info!(sink = self.sink.name(), capacity = self.queue.capacity, "Publisher started");
        loop {
            if let Some(envelope) = self.queue.pop() {
                self.publish_and_record(envelope).await;
                continue;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.queue.notify.notified() => {}
            }
        }

        let mut flushed = 0usize;
        while let Some(envelope) = self.queue.pop() {
            self.publish_and_record(envelope).await;
            flushed += 1;
        }
        info!(flushed, "Publisher stopped");
    }

    async fn publish_and_record(&self, envelope: Envelope) {
        let stream = envelope.stream.stream_name();
        let started = Instant::now();
        match self.publish(&envelope).await {
            Ok(ack) => {
                Metrics::publish_latency(stream, started.elapsed().as_secs_f64() * 1000.0);
                let outcome = if ack.duplicate { "duplicate" } else { "ok" };
                Metrics::publish_outcome(stream, outcome);
            }
            Err(e) => {
                Metrics::publish_outcome(stream, "failed");
                Metrics::publish_dropped("retries_exhausted");
                warn!(
                    subject = %envelope.subject,
                    dedup_key = %envelope.dedup_key,
                    error = %e,
                    "Publish failed, event dropped"
                );
            }
        }
    }
}
