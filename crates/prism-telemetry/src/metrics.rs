//! Prometheus metrics for the prism pipeline.
//!
//! Covers:
//! - WebSocket sessions (connected, reconnects, frames)
//! - Normalizer outcomes
//! - Order book sync state, resyncs and the STALE alarm
//! - REST polling outcomes and latency
//! - Publisher outcomes, drops, queue depth and latency
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, which is a build-time mistake that should
//! crash at startup. These panics only occur during static initialization.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, register_int_gauge,
    CounterVec, Encoder, GaugeVec, HistogramVec, IntGauge, TextEncoder,
};

/// WebSocket session state per connection (1 = connected).
pub static WS_CONNECTED: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "prism_ws_connected",
        "WebSocket connection state (1=connected)",
        &["connection"]
    )
    .unwrap()
});

/// Total WebSocket reconnections.
/// Labels: reason (closed/error/heartbeat/handshake)
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "prism_ws_reconnect_total",
        "Total WebSocket reconnection attempts",
        &["connection", "reason"]
    )
    .unwrap()
});

pub static WS_FRAMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "prism_ws_frames_total",
        "Total inbound WebSocket text frames",
        &["connection"]
    )
    .unwrap()
});

pub static NORMALIZED_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "prism_normalized_events_total",
        "Events produced by the normalizer",
        &["exchange", "data_type"]
    )
    .unwrap()
});

/// Frames or bodies the normalizer dropped.
/// Labels: reason (unknown_event_type/malformed/negative_quantity/schema)
pub static NORMALIZE_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "prism_normalize_dropped_total",
        "Inputs dropped by the normalizer",
        &["exchange", "reason"]
    )
    .unwrap()
});

/// Book sync state (1 = active state).
/// Labels: state (unsynced/syncing/synced/stale)
pub static BOOK_SYNC_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "prism_book_sync_state",
        "Order book sync state machine current state (1=active, 0=inactive)",
        &["instrument", "state"]
    )
    .unwrap()
});

/// Resyncs triggered.
/// Labels: reason (gap/checksum/snapshot_failed/snapshot_gap/session_reset)
pub static BOOK_RESYNC_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "prism_book_resync_total",
        "Order book resyncs triggered",
        &["instrument", "reason"]
    )
    .unwrap()
});

/// Operator alarm: 1 while the instrument is STALE.
pub static BOOK_STALE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "prism_book_stale",
        "Order book exceeded its resync budget (1=stale)",
        &["instrument"]
    )
    .unwrap()
});

pub static BOOK_DIFFS_APPLIED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "prism_book_diffs_applied_total",
        "Diffs applied to a synced book",
        &["instrument"]
    )
    .unwrap()
});

/// Labels: reason (buffer_overflow/outdated/stale/queue_full)
pub static BOOK_DIFFS_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "prism_book_diffs_dropped_total",
        "Diffs discarded without being applied",
        &["instrument", "reason"]
    )
    .unwrap()
});

/// Labels: outcome (ok/retries_exhausted/parse_failure/schema_mismatch/status/transport)
pub static POLL_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "prism_poll_total",
        "REST poll outcomes",
        &["exchange", "data_type", "outcome"]
    )
    .unwrap()
});

pub static POLL_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "prism_poll_latency_ms",
        "REST poll latency including retries in milliseconds",
        &["exchange", "data_type"],
        vec![10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap()
});

/// Labels: stream (MARKET_DATA/ORDERBOOK_SNAP), outcome (ok/duplicate/retried/failed)
pub static PUBLISH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "prism_publish_total",
        "Publish outcomes",
        &["stream", "outcome"]
    )
    .unwrap()
});

/// Labels: reason (queue_overflow/retries_exhausted/subject/encode)
pub static PUBLISH_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "prism_publish_dropped_total",
        "Events dropped by the publisher",
        &["reason"]
    )
    .unwrap()
});

pub static PUBLISH_QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("prism_publish_queue_depth", "Events waiting in the publish queue")
        .unwrap()
});

pub static PUBLISH_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "prism_publish_latency_ms",
        "Time from dequeue to broker ack in milliseconds",
        &["stream"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn ws_connected(connection: &str) {
        WS_CONNECTED.with_label_values(&[connection]).set(1.0);
    }

    pub fn ws_disconnected(connection: &str) {
        WS_CONNECTED.with_label_values(&[connection]).set(0.0);
    }

    pub fn ws_reconnect(connection: &str, reason: &str) {
        WS_RECONNECT_TOTAL
            .with_label_values(&[connection, reason])
            .inc();
    }

    pub fn ws_frame(connection: &str) {
        WS_FRAMES_TOTAL.with_label_values(&[connection]).inc();
    }

    pub fn normalized(exchange: &str, data_type: &str) {
        NORMALIZED_EVENTS_TOTAL
            .with_label_values(&[exchange, data_type])
            .inc();
    }

    pub fn normalize_dropped(exchange: &str, reason: &str) {
        NORMALIZE_DROPPED_TOTAL
            .with_label_values(&[exchange, reason])
            .inc();
    }

    /// Set the book state. Only the active state is 1, all others 0.
    pub fn book_state_set(instrument: &str, state: &str) {
        for s in &["unsynced", "syncing", "synced", "stale"] {
            BOOK_SYNC_STATE.with_label_values(&[instrument, s]).set(0.0);
        }
        BOOK_SYNC_STATE
            .with_label_values(&[instrument, state])
            .set(1.0);
        BOOK_STALE
            .with_label_values(&[instrument])
            .set(if state == "stale" { 1.0 } else { 0.0 });
    }

    pub fn book_resync(instrument: &str, reason: &str) {
        BOOK_RESYNC_TOTAL
            .with_label_values(&[instrument, reason])
            .inc();
    }

    pub fn book_diff_applied(instrument: &str) {
        BOOK_DIFFS_APPLIED_TOTAL
            .with_label_values(&[instrument])
            .inc();
    }

    pub fn book_diff_dropped(instrument: &str, reason: &str) {
        BOOK_DIFFS_DROPPED_TOTAL
            .with_label_values(&[instrument, reason])
            .inc();
    }

    pub fn poll_outcome(exchange: &str, data_type: &str, outcome: &str, latency_ms: f64) {
        POLL_TOTAL
            .with_label_values(&[exchange, data_type, outcome])
            .inc();
        POLL_LATENCY_MS
            .with_label_values(&[exchange, data_type])
            .observe(latency_ms);
    }

    pub fn publish_outcome(stream: &str, outcome: &str) {
        PUBLISH_TOTAL.with_label_values(&[stream, outcome]).inc();
    }

    pub fn publish_latency(stream: &str, latency_ms: f64) {
        PUBLISH_LATENCY_MS
            .with_label_values(&[stream])
            .observe(latency_ms);
    }

    pub fn publish_dropped(reason: &str) {
        PUBLISH_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn publish_queue_depth(depth: usize) {
        PUBLISH_QUEUE_DEPTH.set(depth as i64);
    }
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_text() -> TelemetryResult<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
