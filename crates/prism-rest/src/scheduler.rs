//! Fixed-interval poll tasks, one per (instrument, data type).

use crate::poller::Poller;
use prism_bus::PublisherHandle;
use prism_core::{DataType, InstrumentKey};
use prism_telemetry::Metrics;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct PollScheduler {
    publisher: PublisherHandle,
    shutdown: CancellationToken,
}

impl PollScheduler {
    pub fn new(publisher: PublisherHandle, shutdown: &CancellationToken) -> Self {
        Self {
            publisher,
            shutdown: shutdown.child_token(),
        }
    }

    /// Start polling `data_type` for `key` every `interval`.
    ///
    /// The first poll runs immediately. Failures are logged and counted; the
    /// schedule keeps going until shutdown.
    pub fn spawn(
        &self,
        poller: Poller,
        key: InstrumentKey,
        data_type: DataType,
        interval: Duration,
    ) -> JoinHandle<()> {
        let publisher = self.publisher.clone();
        let shutdown = self.shutdown.clone();
        let interval = interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            info!(instrument = %key, %data_type, interval_ms = interval.as_millis() as u64, "Polling started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        poll_once(&poller, &key, data_type, &publisher).await;
                    }
                }
            }
            debug!(instrument = %key, %data_type, "Polling stopped");
        })
    }
}

async fn poll_once(
    poller: &Poller,
    key: &InstrumentKey,
    data_type: DataType,
    publisher: &PublisherHandle,
) {
    let started = Instant::now();
    let result = poller.fetch(key, data_type).await;
    let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

    match result {
        Ok(event) => {
            Metrics::poll_outcome(key.exchange.as_str(), data_type.as_str(), "ok", latency_ms);
            publisher.submit(event);
        }
        Err(e) => {
            Metrics::poll_outcome(key.exchange.as_str(), data_type.as_str(), e.outcome(), latency_ms);
            warn!(instrument = %key, %data_type, error = %e, "Poll failed");
        }
    }
}
