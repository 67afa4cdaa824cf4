//! Raw frame to canonical events.

use crate::adapter::{unwrap_combined, ExchangeAdapter};
use crate::error::{FeedError, FeedResult};
use prism_core::{Exchange, NormalizedEvent};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Outcome counters for one normalizer.
#[derive(Debug, Default)]
pub struct NormalizeStats {
    pub accepted_count: AtomicU64,
    pub unknown_count: AtomicU64,
    pub malformed_count: AtomicU64,
}

impl NormalizeStats {
    fn record(&self, result: &FeedResult<Vec<NormalizedEvent>>) {
        let counter = match result {
            Ok(events) => {
                self.accepted_count
                    .fetch_add(events.len() as u64, Ordering::Relaxed);
                return;
            }
            Err(FeedError::UnknownEventType { .. }) => &self.unknown_count,
            Err(_) => &self.malformed_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> u64 {
        self.accepted_count.load(Ordering::Relaxed)
    }

    pub fn unknown(&self) -> u64 {
        self.unknown_count.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed_count.load(Ordering::Relaxed)
    }
}

/// Normalizes the frames of one connection through its exchange adapter.
pub struct Normalizer {
    adapter: Arc<dyn ExchangeAdapter>,
    stats: NormalizeStats,
}

impl Normalizer {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>) -> Self {
        Self {
            adapter,
            stats: NormalizeStats::default(),
        }
    }

    pub fn exchange(&self) -> Exchange {
        self.adapter.exchange()
    }

    pub fn adapter(&self) -> &Arc<dyn ExchangeAdapter> {
        &self.adapter
    }

    pub fn stats(&self) -> &NormalizeStats {
        &self.stats
    }

    /// Parse one text frame.
    ///
    /// A failure only concerns this frame: callers drop it, count the
    /// reason and keep reading.
    pub fn process(&self, raw: &str, received_at: i64) -> FeedResult<Vec<NormalizedEvent>> {
        let result = serde_json::from_str::<Value>(raw)
            .map_err(FeedError::from)
            .and_then(|frame| self.adapter.parse_frame(&unwrap_combined(frame), received_at));
        self.stats.record(&result);

        match &result {
            Ok(events) => trace!(exchange = %self.exchange(), count = events.len(), "Frame normalized"),
            Err(e) => debug!(exchange = %self.exchange(), error = %e, "Frame dropped"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::adapter_for;
    use prism_core::{DataType, MarketType};
    use serde_json::json;

    fn binance_spot() -> Normalizer {
        Normalizer::new(adapter_for(Exchange::BinanceSpot, MarketType::Spot).unwrap())
    }

    #[test]
    fn test_combined_and_raw_streams_normalize_identically() {
        let inner = json!({
            "e": "trade", "E": 2, "s": "BTCUSDT", "t": 42,
            "p": "50000", "q": "1", "T": 1, "m": false
        });
        let wrapped = json!({"stream": "btcusdt@trade", "data": inner.clone()});

        let normalizer = binance_spot();
        let raw = normalizer.process(&inner.to_string(), 7).unwrap();
        let combined = normalizer.process(&wrapped.to_string(), 7).unwrap();
        assert_eq!(raw, combined);
        assert_eq!(raw[0].data_type(), DataType::Trade);
        assert_eq!(normalizer.stats().accepted(), 2);
    }

    #[test]
    fn test_failures_are_counted_not_fatal() {
        let normalizer = binance_spot();
        assert!(normalizer.process("not json", 1).is_err());
        assert!(normalizer.process(r#"{"e":"kline","E":1}"#, 1).is_err());
        assert!(normalizer
            .process(r#"{"e":"trade","s":"BTCUSDT"}"#, 1)
            .is_err());
        assert_eq!(normalizer.stats().malformed(), 2);
        assert_eq!(normalizer.stats().unknown(), 1);

        let ok = json!({"e": "trade", "E": 2, "s": "BTCUSDT", "t": 1, "p": "1", "q": "1", "T": 1, "m": true});
        assert_eq!(normalizer.process(&ok.to_string(), 1).unwrap().len(), 1);
    }

    #[test]
    fn test_control_frames_yield_nothing() {
        let normalizer = binance_spot();
        assert!(normalizer
            .process(r#"{"result":null,"id":1}"#, 1)
            .unwrap()
            .is_empty());
        assert_eq!(normalizer.stats().accepted(), 0);
    }
}
