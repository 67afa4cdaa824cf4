//! Exchange adapter interface.
//!
//! One implementation per venue, selected from the closed
//! `(Exchange, MarketType)` enumeration when the pipeline is built.

use crate::binance::BinanceAdapter;
use crate::deribit::DeribitAdapter;
use crate::error::{FeedError, FeedResult};
use crate::okx::OkxAdapter;
use prism_core::{
    ChecksumRule, CoreError, DataType, Exchange, HeartbeatPolicy, InstrumentKey, MarketType,
    NormalizedEvent, OrderBookSnapshot, SequenceRule, SnapshotSource,
};
use serde_json::Value;
use std::sync::Arc;

/// A REST call relative to the venue's base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestRequest {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl RestRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

/// Per-venue wire knowledge.
///
/// `parse_frame` receives a frame that already went through
/// [`unwrap_combined`]. Control frames (acks, heartbeat replies) yield an
/// empty vector; unmapped discriminators yield `FeedError::UnknownEventType`.
pub trait ExchangeAdapter: Send + Sync {
    fn exchange(&self) -> Exchange;

    fn market_type(&self) -> MarketType;

    /// Whether this venue provides `data_type` for the adapter's market.
    fn supports(&self, data_type: DataType) -> bool;

    fn parse_frame(&self, frame: &Value, received_at: i64) -> FeedResult<Vec<NormalizedEvent>>;

    /// Subscription messages for the streamed data types of `symbols`.
    fn subscribe_payload(&self, symbols: &[String], data_types: &[DataType]) -> Vec<String>;

    /// Messages that make the venue push a fresh book snapshot.
    /// Empty when snapshots come from REST.
    fn resubscribe_payload(&self, key: &InstrumentKey) -> Vec<String>;

    fn heartbeat_policy(&self) -> HeartbeatPolicy;

    fn snapshot_source(&self) -> SnapshotSource;

    fn sequence_rule(&self) -> SequenceRule;

    fn checksum_rule(&self) -> Option<ChecksumRule> {
        None
    }

    /// REST depth snapshot request, for `SnapshotSource::Rest` venues.
    fn snapshot_request(&self, _key: &InstrumentKey, _depth: u32) -> Option<RestRequest> {
        None
    }

    fn parse_snapshot(
        &self,
        key: &InstrumentKey,
        _body: &Value,
        _retrieved_at: i64,
    ) -> FeedResult<OrderBookSnapshot> {
        Err(self.unsupported(key, DataType::Orderbook))
    }

    /// REST request for a polled data type. `now` is epoch milliseconds.
    fn poll_request(&self, key: &InstrumentKey, data_type: DataType, now: i64)
        -> Option<RestRequest>;

    fn parse_poll(
        &self,
        key: &InstrumentKey,
        data_type: DataType,
        body: &Value,
        ingested_at: i64,
    ) -> FeedResult<NormalizedEvent>;

    fn unsupported(&self, key: &InstrumentKey, data_type: DataType) -> FeedError {
        FeedError::Unsupported {
            exchange: key.exchange,
            market_type: key.market_type,
            data_type,
        }
    }
}

/// Resolve the adapter for an exchange/market pair.
pub fn adapter_for(
    exchange: Exchange,
    market_type: MarketType,
) -> Result<Arc<dyn ExchangeAdapter>, CoreError> {
    if !exchange.supports(market_type) {
        return Err(CoreError::UnsupportedMarket {
            exchange: exchange.to_string(),
            market_type: market_type.to_string(),
        });
    }
    Ok(match exchange {
        Exchange::BinanceSpot | Exchange::BinanceDerivatives => {
            Arc::new(BinanceAdapter::new(exchange))
        }
        Exchange::OkxSpot | Exchange::OkxDerivatives => Arc::new(OkxAdapter::new(exchange)),
        Exchange::DeribitDerivatives => Arc::new(DeribitAdapter::new(market_type)),
    })
}

/// Unwrap a combined-stream envelope.
///
/// Only an object with exactly a string `stream` and an object `data` is
/// unwrapped; every other shape passes through untouched.
pub fn unwrap_combined(frame: Value) -> Value {
    let is_envelope = frame.as_object().is_some_and(|obj| {
        obj.len() == 2
            && obj.get("stream").is_some_and(Value::is_string)
            && obj.get("data").is_some_and(Value::is_object)
    });
    if !is_envelope {
        return frame;
    }
    match frame {
        Value::Object(mut obj) => obj.remove("data").unwrap_or(Value::Null),
        other => other,
    }
}
