//! Canonical normalized events.
//!
//! Every exchange payload is mapped into exactly one `NormalizedEvent`.
//! All timestamps are epoch milliseconds.

use crate::{DataType, InstrumentKey, Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade or liquidation aggressor side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Parse the side spellings used across venues ("buy", "BUY", "Sell").
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("buy") {
            Some(Side::Buy)
        } else if raw.eq_ignore_ascii_case("sell") {
            Some(Side::Sell)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Side of the book a level belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bid,
    Ask,
}

/// One price level of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub size: Size,
}

impl PriceLevel {
    pub fn new(price: Price, size: Size) -> Self {
        Self { price, size }
    }
}

/// One level change carried by a diff. Zero size removes the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub side: BookSide,
    pub price: Price,
    pub size: Size,
}

/// Incremental, sequenced order-book update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookDiff {
    #[serde(flatten)]
    pub key: InstrumentKey,
    pub first_sequence: u64,
    pub last_sequence: u64,
    /// Sequence of the update immediately preceding this one, when the venue reports it.
    pub prev_sequence: Option<u64>,
    pub changes: Vec<LevelChange>,
    /// Exchange checksum over the book after this update, when the venue reports it.
    pub checksum: Option<i32>,
    pub exchange_ts: i64,
    pub ingested_at: i64,
}

/// Full, sequenced order-book image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    #[serde(flatten)]
    pub key: InstrumentKey,
    pub sequence: u64,
    /// Best first (descending price).
    pub bids: Vec<PriceLevel>,
    /// Best first (ascending price).
    pub asks: Vec<PriceLevel>,
    pub checksum: Option<i32>,
    pub exchange_ts: i64,
    pub retrieved_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    #[serde(flatten)]
    pub key: InstrumentKey,
    pub trade_id: String,
    pub price: Price,
    pub quantity: Size,
    pub side: Side,
    pub exchange_ts: i64,
    pub ingested_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    #[serde(flatten)]
    pub key: InstrumentKey,
    pub funding_rate: Decimal,
    pub next_funding_time: Option<i64>,
    pub mark_price: Option<Price>,
    pub index_price: Option<Price>,
    pub exchange_ts: i64,
    pub ingested_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInterest {
    #[serde(flatten)]
    pub key: InstrumentKey,
    /// Open interest in contracts or base units, as reported.
    pub open_interest: Decimal,
    /// Open interest in quote currency, when reported.
    pub open_interest_value: Option<Decimal>,
    pub exchange_ts: i64,
    pub ingested_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Liquidation {
    #[serde(flatten)]
    pub key: InstrumentKey,
    /// Venue trade id of the liquidation fill, when the venue reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,
    /// Side of the liquidation order.
    pub side: Side,
    pub price: Price,
    pub quantity: Size,
    pub exchange_ts: i64,
    pub ingested_at: i64,
}

/// Which long/short ratio population was sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LsrKind {
    TopPosition,
    AllAccount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LsrSnapshot {
    #[serde(flatten)]
    pub key: InstrumentKey,
    pub kind: LsrKind,
    pub long_short_ratio: Decimal,
    pub long_ratio: Option<Decimal>,
    pub short_ratio: Option<Decimal>,
    /// Sampling period as reported (e.g., "5m").
    pub period: String,
    pub exchange_ts: i64,
    pub ingested_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityIndex {
    #[serde(flatten)]
    pub key: InstrumentKey,
    pub value: Decimal,
    pub exchange_ts: i64,
    pub ingested_at: i64,
}

/// Canonical event union.
///
/// Serialized with an internal `type` tag, e.g. `{"type":"trade",...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedEvent {
    OrderBookDiff(OrderBookDiff),
    OrderBookSnapshot(OrderBookSnapshot),
    Trade(Trade),
    FundingRate(FundingRate),
    OpenInterest(OpenInterest),
    Liquidation(Liquidation),
    LsrSnapshot(LsrSnapshot),
    VolatilityIndex(VolatilityIndex),
}

impl NormalizedEvent {
    pub fn key(&self) -> &InstrumentKey {
        match self {
            NormalizedEvent::OrderBookDiff(e) => &e.key,
            NormalizedEvent::OrderBookSnapshot(e) => &e.key,
            NormalizedEvent::Trade(e) => &e.key,
            NormalizedEvent::FundingRate(e) => &e.key,
            NormalizedEvent::OpenInterest(e) => &e.key,
            NormalizedEvent::Liquidation(e) => &e.key,
            NormalizedEvent::LsrSnapshot(e) => &e.key,
            NormalizedEvent::VolatilityIndex(e) => &e.key,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            NormalizedEvent::OrderBookDiff(_) | NormalizedEvent::OrderBookSnapshot(_) => {
                DataType::Orderbook
            }
            NormalizedEvent::Trade(_) => DataType::Trade,
            NormalizedEvent::FundingRate(_) => DataType::FundingRate,
            NormalizedEvent::OpenInterest(_) => DataType::OpenInterest,
            NormalizedEvent::Liquidation(_) => DataType::Liquidation,
            NormalizedEvent::LsrSnapshot(e) => match e.kind {
                LsrKind::TopPosition => DataType::LsrTopPosition,
                LsrKind::AllAccount => DataType::LsrAllAccount,
            },
            NormalizedEvent::VolatilityIndex(_) => DataType::VolatilityIndex,
        }
    }

    pub fn exchange_ts(&self) -> i64 {
        match self {
            NormalizedEvent::OrderBookDiff(e) => e.exchange_ts,
            NormalizedEvent::OrderBookSnapshot(e) => e.exchange_ts,
            NormalizedEvent::Trade(e) => e.exchange_ts,
            NormalizedEvent::FundingRate(e) => e.exchange_ts,
            NormalizedEvent::OpenInterest(e) => e.exchange_ts,
            NormalizedEvent::Liquidation(e) => e.exchange_ts,
            NormalizedEvent::LsrSnapshot(e) => e.exchange_ts,
            NormalizedEvent::VolatilityIndex(e) => e.exchange_ts,
        }
    }

    pub fn is_order_book(&self) -> bool {
        matches!(
            self,
            NormalizedEvent::OrderBookDiff(_) | NormalizedEvent::OrderBookSnapshot(_)
        )
    }

    /// Identity used by de-duplicating consumers.
    ///
    /// Trades are identified by `(trade_id, exchange, symbol)`. Liquidations
    /// use the venue trade id when present and otherwise their side, price,
    /// quantity and timestamp, since one sweep emits several fills in the
    /// same millisecond. Everything else is keyed by data type, instrument
    /// and exchange timestamp (plus the sequence range for book data).
    /// Replaying an event yields the same key.
    pub fn dedup_key(&self) -> String {
        let key = self.key();
        match self {
            NormalizedEvent::Trade(t) => {
                format!("trade:{}:{}:{}", key.exchange, key.symbol, t.trade_id)
            }
            NormalizedEvent::OrderBookDiff(d) => format!(
                "orderbook:{}:{}:{}:{}-{}",
                key.exchange, key.market_type, key.symbol, d.first_sequence, d.last_sequence
            ),
            NormalizedEvent::OrderBookSnapshot(s) => format!(
                "snapshot:{}:{}:{}:{}",
                key.exchange, key.market_type, key.symbol, s.sequence
            ),
            NormalizedEvent::Liquidation(l) => match &l.trade_id {
                Some(trade_id) => format!(
                    "liquidation:{}:{}:{}:{}",
                    key.exchange, key.market_type, key.symbol, trade_id
                ),
                None => format!(
                    "liquidation:{}:{}:{}:{}:{}:{}:{}",
                    key.exchange,
                    key.market_type,
                    key.symbol,
                    l.exchange_ts,
                    l.side.as_str(),
                    l.price,
                    l.quantity
                ),
            },
            other => format!(
                "{}:{}:{}:{}:{}",
                other.data_type(),
                key.exchange,
                key.market_type,
                key.symbol,
                other.exchange_ts()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Exchange, MarketType};
    use rust_decimal_macros::dec;

    fn trade(trade_id: &str, ts: i64) -> NormalizedEvent {
        NormalizedEvent::Trade(Trade {
            key: InstrumentKey::new(Exchange::BinanceSpot, MarketType::Spot, "BTCUSDT"),
            trade_id: trade_id.to_string(),
            price: Price::new(dec!(50000)),
            quantity: Size::new(dec!(0.1)),
            side: Side::Buy,
            exchange_ts: ts,
            ingested_at: ts + 5,
        })
    }

    #[test]
    fn test_trade_dedup_key_ignores_timestamps() {
        assert_eq!(trade("1", 10).dedup_key(), trade("1", 99).dedup_key());
        assert_ne!(trade("1", 10).dedup_key(), trade("2", 10).dedup_key());
        assert_eq!(trade("1", 10).dedup_key(), "trade:binance_spot:BTCUSDT:1");
    }

    fn liquidation(trade_id: Option<&str>, price: Decimal, ingested_at: i64) -> NormalizedEvent {
        NormalizedEvent::Liquidation(Liquidation {
            key: InstrumentKey::new(Exchange::DeribitDerivatives, MarketType::Perpetual, "BTC-USD"),
            trade_id: trade_id.map(str::to_string),
            side: Side::Sell,
            price: Price::new(price),
            quantity: Size::new(dec!(1000)),
            exchange_ts: 1_700_000_000_000,
            ingested_at,
        })
    }

    #[test]
    fn test_same_millisecond_liquidations_have_distinct_keys() {
        let a = liquidation(None, dec!(50000), 1);
        let b = liquidation(None, dec!(49990), 1);
        assert_ne!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.dedup_key(), liquidation(None, dec!(50000), 9).dedup_key());

        let c = liquidation(Some("ETH-1"), dec!(50000), 1);
        let d = liquidation(Some("ETH-2"), dec!(50000), 1);
        assert_ne!(c.dedup_key(), d.dedup_key());
        assert_eq!(
            c.dedup_key(),
            "liquidation:deribit_derivatives:perpetual:BTC-USD:ETH-1"
        );
    }

    #[test]
    fn test_serialized_shape_is_tagged_and_flat() {
        let value = serde_json::to_value(trade("7", 1)).unwrap();
        assert_eq!(value["type"], "trade");
        assert_eq!(value["exchange"], "binance_spot");
        assert_eq!(value["market_type"], "spot");
        assert_eq!(value["symbol"], "BTCUSDT");
        assert_eq!(value["side"], "buy");
        assert_eq!(value["price"], "50000");
    }

    #[test]
    fn test_lsr_data_type_follows_kind() {
        let event = NormalizedEvent::LsrSnapshot(LsrSnapshot {
            key: InstrumentKey::new(Exchange::BinanceDerivatives, MarketType::Perpetual, "BTC-USDT"),
            kind: LsrKind::AllAccount,
            long_short_ratio: dec!(1.2),
            long_ratio: Some(dec!(0.545)),
            short_ratio: Some(dec!(0.455)),
            period: "5m".to_string(),
            exchange_ts: 1,
            ingested_at: 2,
        });
        assert_eq!(event.data_type(), DataType::LsrAllAccount);
        assert!(!event.is_order_book());
    }

    #[test]
    fn test_side_parse() {
        assert_eq!(Side::parse("BUY"), Some(Side::Buy));
        assert_eq!(Side::parse("sell"), Some(Side::Sell));
        assert_eq!(Side::parse("short"), None);
    }
}
