//! Routed, serialized-on-demand events.

use crate::error::BusResult;
use bytes::Bytes;
use prism_core::{subject_for_event, NormalizedEvent, StreamKind};

/// An event with its stream, subject and de-duplication key resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub stream: StreamKind,
    pub subject: String,
    pub dedup_key: String,
    pub event: NormalizedEvent,
}

impl Envelope {
    pub fn new(event: NormalizedEvent) -> BusResult<Self> {
        Ok(Self {
            stream: StreamKind::for_event(&event),
            subject: subject_for_event(&event)?,
            dedup_key: event.dedup_key(),
            event,
        })
    }

    pub fn payload(&self) -> BusResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(&self.event)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::{Exchange, InstrumentKey, MarketType, OrderBookSnapshot, PriceLevel};

    #[test]
    fn test_snapshot_routes_to_snapshot_stream() {
        let event = NormalizedEvent::OrderBookSnapshot(OrderBookSnapshot {
            key: InstrumentKey::new(Exchange::BinanceSpot, MarketType::Spot, "BTC-USDT"),
            sequence: 10,
            bids: Vec::<PriceLevel>::new(),
            asks: Vec::new(),
            checksum: None,
            exchange_ts: 1,
            retrieved_at: 2,
        });
        let envelope = Envelope::new(event).unwrap();
        assert_eq!(envelope.stream, StreamKind::Snapshot);
        assert_eq!(envelope.subject, "snapshot.orderbook.binance_spot.spot.BTC-USDT");
        let payload: serde_json::Value = serde_json::from_slice(&envelope.payload().unwrap()).unwrap();
        assert_eq!(payload["type"], "order_book_snapshot");
    }
}
