//! Polled data types: funding, open interest, long/short ratios, DVOL.

use crate::client::RestClient;
use crate::error::{PollError, PollResult};
use prism_core::{now_ms, DataType, InstrumentKey, NormalizedEvent, OrderBookSnapshot};
use prism_feed::ExchangeAdapter;
use std::sync::Arc;

#[derive(Clone)]
pub struct Poller {
    client: Arc<RestClient>,
    adapter: Arc<dyn ExchangeAdapter>,
}

impl Poller {
    pub fn new(client: Arc<RestClient>, adapter: Arc<dyn ExchangeAdapter>) -> Self {
        Self { client, adapter }
    }

    pub fn adapter(&self) -> &Arc<dyn ExchangeAdapter> {
        &self.adapter
    }

    /// Fetch and normalize one reading of `data_type` for `key`.
    pub async fn fetch(&self, key: &InstrumentKey, data_type: DataType) -> PollResult<NormalizedEvent> {
        let request = self
            .adapter
            .poll_request(key, data_type, now_ms())
            .ok_or_else(|| PollError::from(self.adapter.unsupported(key, data_type)))?;
        let body = self.client.get_json(key.exchange, &request).await?;
        Ok(self.adapter.parse_poll(key, data_type, &body, now_ms())?)
    }
}

/// Order-book snapshots for venues that serve them over REST.
#[derive(Clone)]
pub struct SnapshotClient {
    client: Arc<RestClient>,
    adapter: Arc<dyn ExchangeAdapter>,
    depth: u32,
}

impl SnapshotClient {
    pub fn new(client: Arc<RestClient>, adapter: Arc<dyn ExchangeAdapter>, depth: u32) -> Self {
        Self {
            client,
            adapter,
            depth,
        }
    }

    pub async fn fetch_depth(&self, key: &InstrumentKey) -> PollResult<OrderBookSnapshot> {
        let request = self
            .adapter
            .snapshot_request(key, self.depth)
            .ok_or_else(|| PollError::from(self.adapter.unsupported(key, DataType::Orderbook)))?;
        let body = self.client.get_json(key.exchange, &request).await?;
        Ok(self.adapter.parse_snapshot(key, &body, now_ms())?)
    }
}
