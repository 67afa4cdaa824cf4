//! NATS JetStream sink.

use crate::error::{SinkError, SinkResult};
use crate::sink::{Ack, BusSink};
use async_nats::jetstream::{self, stream};
use async_nats::HeaderMap;
use bytes::Bytes;
use prism_core::{stream_subjects, StreamKind};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

/// Header the broker de-duplicates on within the stream's duplicate window.
const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// Broker-side limits applied when the streams are created.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_duplicate_window_secs")]
    pub duplicate_window_secs: u64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: i64,
}

fn default_max_age_secs() -> u64 {
    3600
}

fn default_duplicate_window_secs() -> u64 {
    120
}

fn default_max_bytes() -> i64 {
    1_073_741_824 // 1GB
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            duplicate_window_secs: default_duplicate_window_secs(),
            max_bytes: default_max_bytes(),
        }
    }
}

#[derive(Clone)]
pub struct JetStreamSink {
    context: jetstream::Context,
}

impl JetStreamSink {
    pub async fn connect(url: &str) -> SinkResult<Self> {
        info!(url, "Connecting to NATS");
        let client = async_nats::connect(url)
            .await
            .map_err(|e| SinkError::Connect(e.to_string()))?;
        Ok(Self {
            context: jetstream::new(client),
        })
    }

    /// Create both streams if missing, using the producer-side subject lists.
    pub async fn ensure_streams(&self, settings: &StreamSettings) -> SinkResult<()> {
        for kind in [StreamKind::Incremental, StreamKind::Snapshot] {
            let subjects = stream_subjects(kind);
            info!(stream = kind.stream_name(), ?subjects, "Ensuring stream");
            self.context
                .get_or_create_stream(stream::Config {
                    name: kind.stream_name().to_string(),
                    subjects,
                    retention: stream::RetentionPolicy::Limits,
                    max_age: Duration::from_secs(settings.max_age_secs),
                    max_bytes: settings.max_bytes,
                    duplicate_window: Duration::from_secs(settings.duplicate_window_secs),
                    storage: stream::StorageType::File,
                    ..Default::default()
                })
                .await
                .map_err(|e| SinkError::Stream(format!("{}: {e}", kind.stream_name())))?;
        }
        Ok(())
    }
}

impl BusSink for JetStreamSink {
    fn name(&self) -> &'static str {
        "jetstream"
    }

    async fn publish(&self, subject: &str, dedup_key: &str, payload: Bytes) -> SinkResult<Ack> {
        let mut headers = HeaderMap::new();
        headers.insert(MSG_ID_HEADER, dedup_key);

        let ack = self
            .context
            .publish_with_headers(subject.to_string(), headers, payload)
            .await
            .map_err(|e| SinkError::Publish(e.to_string()))?
            .await
            .map_err(|e| SinkError::Publish(e.to_string()))?;

        Ok(Ack {
            stream: ack.stream,
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        })
    }
}
