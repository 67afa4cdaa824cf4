//! Binance spot and USD-M futures.
//!
//! Streams: `depthUpdate` diffs (`U`/`u`, plus `pu` on futures), `trade`
//! (spot), `aggTrade` and `forceOrder` (futures). Depth snapshots and the
//! futures statistics endpoints are polled over REST.

use crate::adapter::{ExchangeAdapter, RestRequest};
use crate::error::{FeedError, FeedResult};
use crate::fields::{
    array_field, decimal_field, i64_field, id_field, levels, level_changes, opt_decimal_field,
    opt_i64_field, price_field, required, schema, size_field, str_field, u64_field,
};
use crate::symbol::{to_canonical, to_native};
use prism_core::{
    BookSide, DataType, Exchange, FundingRate, HeartbeatPolicy, InstrumentKey, Liquidation,
    LsrKind, LsrSnapshot, MarketType, NormalizedEvent, OpenInterest, OrderBookDiff,
    OrderBookSnapshot, Price, SequenceRule, Side, SnapshotSource, Trade,
};
use serde_json::{json, Value};
use tracing::warn;

const LSR_PERIOD: &str = "5m";

pub struct BinanceAdapter {
    exchange: Exchange,
    market_type: MarketType,
}

impl BinanceAdapter {
    pub fn new(exchange: Exchange) -> Self {
        let market_type = match exchange {
            Exchange::BinanceSpot => MarketType::Spot,
            _ => MarketType::Perpetual,
        };
        Self {
            exchange,
            market_type,
        }
    }

    fn is_futures(&self) -> bool {
        self.exchange == Exchange::BinanceDerivatives
    }

    fn key(&self, native: &str) -> InstrumentKey {
        InstrumentKey::new(self.exchange, self.market_type, to_canonical(self.exchange, native))
    }

    fn event_time(&self, v: &Value) -> FeedResult<i64> {
        // Futures carry the matching-engine time in `T`; `E` is the push time.
        match opt_i64_field(v, "T")? {
            Some(ts) => Ok(ts),
            None => i64_field(v, "E"),
        }
    }

    fn parse_depth_update(&self, v: &Value, received_at: i64) -> FeedResult<NormalizedEvent> {
        let mut changes = level_changes(array_field(v, "b")?, BookSide::Bid)?;
        changes.extend(level_changes(array_field(v, "a")?, BookSide::Ask)?);

        let prev_sequence = if self.is_futures() {
            Some(u64_field(v, "pu")?)
        } else {
            None
        };

        Ok(NormalizedEvent::OrderBookDiff(OrderBookDiff {
            key: self.key(str_field(v, "s")?),
            first_sequence: u64_field(v, "U")?,
            last_sequence: u64_field(v, "u")?,
            prev_sequence,
            changes,
            checksum: None,
            exchange_ts: self.event_time(v)?,
            ingested_at: received_at,
        }))
    }

    fn parse_trade(
        &self,
        v: &Value,
        id_field_name: &str,
        received_at: i64,
    ) -> FeedResult<NormalizedEvent> {
        // `m`: buyer is the maker, so the aggressor sold.
        let buyer_is_maker = required(v, "m")?
            .as_bool()
            .ok_or_else(|| FeedError::Malformed("m: expected bool".to_string()))?;
        Ok(NormalizedEvent::Trade(Trade {
            key: self.key(str_field(v, "s")?),
            trade_id: id_field(v, id_field_name)?,
            price: price_field(v, "p")?,
            quantity: size_field(v, "q")?,
            side: if buyer_is_maker { Side::Sell } else { Side::Buy },
            exchange_ts: i64_field(v, "T")?,
            ingested_at: received_at,
        }))
    }

    fn parse_force_order(&self, v: &Value, received_at: i64) -> FeedResult<NormalizedEvent> {
        let order = required(v, "o")?;
        let side_raw = str_field(order, "S")?;
        let side = Side::parse(side_raw)
            .ok_or_else(|| FeedError::Malformed(format!("S: unknown side {side_raw}")))?;

        let avg = price_field(order, "ap")?;
        let price = if avg.is_zero() { price_field(order, "p")? } else { avg };
        let filled = size_field(order, "z")?;
        let quantity = if filled.is_zero() { size_field(order, "q")? } else { filled };

        Ok(NormalizedEvent::Liquidation(Liquidation {
            key: self.key(str_field(order, "s")?),
            trade_id: None,
            side,
            price,
            quantity,
            exchange_ts: i64_field(order, "T")?,
            ingested_at: received_at,
        }))
    }

    fn parse_depth_snapshot(
        &self,
        key: &InstrumentKey,
        body: &Value,
        retrieved_at: i64,
    ) -> FeedResult<OrderBookSnapshot> {
        // Spot snapshots carry no timestamp.
        let exchange_ts = opt_i64_field(body, "T")?.unwrap_or(retrieved_at);
        Ok(OrderBookSnapshot {
            key: key.clone(),
            sequence: u64_field(body, "lastUpdateId")?,
            bids: levels(array_field(body, "bids")?)?,
            asks: levels(array_field(body, "asks")?)?,
            checksum: None,
            exchange_ts,
            retrieved_at,
        })
    }

    fn parse_premium_index(
        &self,
        key: &InstrumentKey,
        body: &Value,
        ingested_at: i64,
    ) -> FeedResult<NormalizedEvent> {
        Ok(NormalizedEvent::FundingRate(FundingRate {
            key: key.clone(),
            funding_rate: decimal_field(body, "lastFundingRate")?,
            next_funding_time: opt_i64_field(body, "nextFundingTime")?,
            mark_price: opt_decimal_field(body, "markPrice")?.map(Price::new),
            index_price: opt_decimal_field(body, "indexPrice")?.map(Price::new),
            exchange_ts: i64_field(body, "time")?,
            ingested_at,
        }))
    }

    fn parse_open_interest(
        &self,
        key: &InstrumentKey,
        body: &Value,
        ingested_at: i64,
    ) -> FeedResult<NormalizedEvent> {
        Ok(NormalizedEvent::OpenInterest(OpenInterest {
            key: key.clone(),
            open_interest: size_field(body, "openInterest")?.inner(),
            open_interest_value: None,
            exchange_ts: i64_field(body, "time")?,
            ingested_at,
        }))
    }

    fn parse_lsr(
        &self,
        key: &InstrumentKey,
        kind: LsrKind,
        body: &Value,
        ingested_at: i64,
    ) -> FeedResult<NormalizedEvent> {
        let row = body
            .as_array()
            .and_then(|rows| rows.last())
            .ok_or_else(|| FeedError::Schema("expected non-empty ratio array".to_string()))?;
        Ok(NormalizedEvent::LsrSnapshot(LsrSnapshot {
            key: key.clone(),
            kind,
            long_short_ratio: decimal_field(row, "longShortRatio")?,
            long_ratio: opt_decimal_field(row, "longAccount")?,
            short_ratio: opt_decimal_field(row, "shortAccount")?,
            period: LSR_PERIOD.to_string(),
            exchange_ts: i64_field(row, "timestamp")?,
            ingested_at,
        }))
    }
}

impl ExchangeAdapter for BinanceAdapter {
    fn exchange(&self) -> Exchange {
        self.exchange
    }

    fn market_type(&self) -> MarketType {
        self.market_type
    }

    fn supports(&self, data_type: DataType) -> bool {
        match data_type {
            DataType::Orderbook | DataType::Trade => true,
            DataType::Liquidation
            | DataType::FundingRate
            | DataType::OpenInterest
            | DataType::LsrTopPosition
            | DataType::LsrAllAccount => self.is_futures(),
            DataType::VolatilityIndex => false,
        }
    }

    fn parse_frame(&self, frame: &Value, received_at: i64) -> FeedResult<Vec<NormalizedEvent>> {
        if frame.get("id").is_some() {
            if let Some(error) = frame.get("error") {
                warn!(exchange = %self.exchange, %error, "Subscription rejected");
            }
            return Ok(Vec::new());
        }

        let event = match frame.get("e").and_then(Value::as_str) {
            Some("depthUpdate") => self.parse_depth_update(frame, received_at)?,
            Some("trade") => self.parse_trade(frame, "t", received_at)?,
            Some("aggTrade") => self.parse_trade(frame, "a", received_at)?,
            Some("forceOrder") => self.parse_force_order(frame, received_at)?,
            Some(other) => {
                return Err(FeedError::UnknownEventType {
                    exchange: self.exchange,
                    event: other.to_string(),
                })
            }
            None => return Err(FeedError::Malformed("missing event type `e`".to_string())),
        };
        Ok(vec![event])
    }

    fn subscribe_payload(&self, symbols: &[String], data_types: &[DataType]) -> Vec<String> {
        let mut params = Vec::new();
        for symbol in symbols {
            let stream = to_native(self.exchange, self.market_type, symbol).to_lowercase();
            for data_type in data_types {
                match data_type {
                    DataType::Orderbook => params.push(format!("{stream}@depth@100ms")),
                    DataType::Trade if self.is_futures() => params.push(format!("{stream}@aggTrade")),
                    DataType::Trade => params.push(format!("{stream}@trade")),
                    DataType::Liquidation if self.is_futures() => {
                        params.push(format!("{stream}@forceOrder"))
                    }
                    _ => {}
                }
            }
        }
        if params.is_empty() {
            return Vec::new();
        }
        vec![json!({"method": "SUBSCRIBE", "params": params, "id": 1}).to_string()]
    }

    fn resubscribe_payload(&self, _key: &InstrumentKey) -> Vec<String> {
        Vec::new()
    }

    fn heartbeat_policy(&self) -> HeartbeatPolicy {
        // Spot pings every 20s, futures every 3 minutes.
        let idle_timeout_ms = if self.is_futures() { 240_000 } else { 60_000 };
        HeartbeatPolicy::ServerPing { idle_timeout_ms }
    }

    fn snapshot_source(&self) -> SnapshotSource {
        SnapshotSource::Rest
    }

    fn sequence_rule(&self) -> SequenceRule {
        if self.is_futures() {
            SequenceRule::BridgedPrevious
        } else {
            SequenceRule::Range
        }
    }

    fn snapshot_request(&self, key: &InstrumentKey, depth: u32) -> Option<RestRequest> {
        let path = if self.is_futures() { "/fapi/v1/depth" } else { "/api/v3/depth" };
        Some(
            RestRequest::new(path)
                .param("symbol", to_native(self.exchange, self.market_type, &key.symbol))
                .param("limit", depth.clamp(5, 1000)),
        )
    }

    fn parse_snapshot(
        &self,
        key: &InstrumentKey,
        body: &Value,
        retrieved_at: i64,
    ) -> FeedResult<OrderBookSnapshot> {
        schema(self.parse_depth_snapshot(key, body, retrieved_at))
    }

    fn poll_request(&self, key: &InstrumentKey, data_type: DataType, _now: i64) -> Option<RestRequest> {
        if !self.is_futures() {
            return None;
        }
        let symbol = to_native(self.exchange, self.market_type, &key.symbol);
        let request = match data_type {
            DataType::FundingRate => RestRequest::new("/fapi/v1/premiumIndex"),
            DataType::OpenInterest => RestRequest::new("/fapi/v1/openInterest"),
            DataType::LsrTopPosition => RestRequest::new("/futures/data/topLongShortPositionRatio")
                .param("period", LSR_PERIOD)
                .param("limit", 1),
            DataType::LsrAllAccount => RestRequest::new("/futures/data/globalLongShortAccountRatio")
                .param("period", LSR_PERIOD)
                .param("limit", 1),
            _ => return None,
        };
        Some(request.param("symbol", symbol))
    }

    fn parse_poll(
        &self,
        key: &InstrumentKey,
        data_type: DataType,
        body: &Value,
        ingested_at: i64,
    ) -> FeedResult<NormalizedEvent> {
        schema(match data_type {
            DataType::FundingRate => self.parse_premium_index(key, body, ingested_at),
            DataType::OpenInterest => self.parse_open_interest(key, body, ingested_at),
            DataType::LsrTopPosition => self.parse_lsr(key, LsrKind::TopPosition, body, ingested_at),
            DataType::LsrAllAccount => self.parse_lsr(key, LsrKind::AllAccount, body, ingested_at),
            other => Err(self.unsupported(key, other)),
        })
    }
}
