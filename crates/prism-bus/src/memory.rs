//! In-process sink with broker-like de-duplication.
//!
//! Backs `--dry-run` and the tests.

use crate::error::{SinkError, SinkResult};
use crate::sink::{Ack, BusSink};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub sequence: u64,
    pub subject: String,
    pub dedup_key: String,
    pub payload: Bytes,
}

#[derive(Default)]
struct Inner {
    messages: Mutex<Vec<StoredMessage>>,
    /// dedup key -> sequence of the stored copy.
    seen: DashMap<String, u64>,
    fail_next: AtomicU32,
}

/// Cloneable handle to a shared in-memory message store.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Inner>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` publishes fail with a retryable error.
    pub fn fail_next(&self, n: u32) {
        self.inner.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<StoredMessage> {
        self.inner.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_for(&self, subject: &str) -> usize {
        self.inner
            .messages
            .lock()
            .iter()
            .filter(|m| m.subject == subject)
            .count()
    }

    fn take_failure(&self) -> bool {
        self.inner
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn store(&self, subject: &str, dedup_key: &str, payload: Bytes) -> Ack {
        let mut messages = self.inner.messages.lock();
        if let Some(sequence) = self.inner.seen.get(dedup_key) {
            debug!(subject, dedup_key, "Duplicate message ignored");
            return Ack {
                stream: "memory".to_string(),
                sequence: *sequence,
                duplicate: true,
            };
        }
        let sequence = messages.len() as u64 + 1;
        messages.push(StoredMessage {
            sequence,
            subject: subject.to_string(),
            dedup_key: dedup_key.to_string(),
            payload,
        });
        self.inner.seen.insert(dedup_key.to_string(), sequence);
        Ack {
            stream: "memory".to_string(),
            sequence,
            duplicate: false,
        }
    }
}

impl BusSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, subject: &str, dedup_key: &str, payload: Bytes) -> SinkResult<Ack> {
        if self.take_failure() {
            return Err(SinkError::Publish("injected failure".to_string()));
        }
        Ok(self.store(subject, dedup_key, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_stored_once() {
        let sink = MemorySink::new();
        let first = sink.publish("trade.a", "k1", Bytes::from_static(b"x")).await.unwrap();
        let second = sink.publish("trade.a", "k1", Bytes::from_static(b"x")).await.unwrap();
        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(second.sequence, first.sequence);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let sink = MemorySink::new();
        sink.fail_next(2);
        assert!(sink.publish("s", "a", Bytes::new()).await.is_err());
        assert!(sink.publish("s", "a", Bytes::new()).await.is_err());
        assert!(sink.publish("s", "a", Bytes::new()).await.is_ok());
        assert_eq!(sink.count_for("s"), 1);
    }
}
