//! Deribit perpetuals and the options volatility index (JSON-RPC v2).

use crate::adapter::{ExchangeAdapter, RestRequest};
use crate::error::{FeedError, FeedResult};
use crate::fields::{
    array_field, decimal, decimal_field, i64_field, i64_value, id_field, price_field, required,
    schema, size, size_field, str_field, u64_field,
};
use crate::symbol::{base_asset, to_canonical, to_native};
use prism_core::{
    BookSide, DataType, Exchange, FundingRate, HeartbeatPolicy, InstrumentKey, LevelChange,
    Liquidation, MarketType, NormalizedEvent, OpenInterest, OrderBookDiff, OrderBookSnapshot,
    Price, PriceLevel, SequenceRule, Side, Size, SnapshotSource, Trade, VolatilityIndex,
};
use serde_json::{json, Value};
use tracing::warn;

const EXCHANGE: Exchange = Exchange::DeribitDerivatives;

/// Request id of the `public/test` keepalive, so its reply is recognisable.
const HEARTBEAT_ID: u64 = 9000;

/// Look-back window for the volatility index candles.
const DVOL_WINDOW_MS: i64 = 5 * 60 * 1000;

pub struct DeribitAdapter {
    market_type: MarketType,
}

impl DeribitAdapter {
    pub fn new(market_type: MarketType) -> Self {
        Self { market_type }
    }

    fn is_perpetual(&self) -> bool {
        self.market_type == MarketType::Perpetual
    }

    fn key(&self, instrument_name: &str) -> InstrumentKey {
        InstrumentKey::new(EXCHANGE, self.market_type, to_canonical(EXCHANGE, instrument_name))
    }

    fn instrument_name(&self, key: &InstrumentKey) -> String {
        to_native(EXCHANGE, self.market_type, &key.symbol)
    }

    fn parse_book(&self, data: &Value, received_at: i64) -> FeedResult<NormalizedEvent> {
        let key = self.key(str_field(data, "instrument_name")?);
        let change_id = u64_field(data, "change_id")?;
        let exchange_ts = i64_field(data, "timestamp")?;
        let bids = book_entries(array_field(data, "bids")?)?;
        let asks = book_entries(array_field(data, "asks")?)?;

        match str_field(data, "type")? {
            "snapshot" => Ok(NormalizedEvent::OrderBookSnapshot(OrderBookSnapshot {
                key,
                sequence: change_id,
                bids,
                asks,
                checksum: None,
                exchange_ts,
                retrieved_at: received_at,
            })),
            "change" => {
                let changes = bids
                    .into_iter()
                    .map(|l| (BookSide::Bid, l))
                    .chain(asks.into_iter().map(|l| (BookSide::Ask, l)))
                    .map(|(side, level)| LevelChange {
                        side,
                        price: level.price,
                        size: level.size,
                    })
                    .collect();
                Ok(NormalizedEvent::OrderBookDiff(OrderBookDiff {
                    key,
                    first_sequence: change_id,
                    last_sequence: change_id,
                    prev_sequence: Some(u64_field(data, "prev_change_id")?),
                    changes,
                    checksum: None,
                    exchange_ts,
                    ingested_at: received_at,
                }))
            }
            other => Err(FeedError::UnknownEventType {
                exchange: EXCHANGE,
                event: format!("book/{other}"),
            }),
        }
    }

    /// A trade flagged with `liquidation` also yields a liquidation event.
    fn parse_trade(&self, trade: &Value, received_at: i64) -> FeedResult<Vec<NormalizedEvent>> {
        let direction = str_field(trade, "direction")?;
        let side = Side::parse(direction)
            .ok_or_else(|| FeedError::Malformed(format!("direction: unknown {direction}")))?;
        let key = self.key(str_field(trade, "instrument_name")?);
        let price = price_field(trade, "price")?;
        let quantity = size_field(trade, "amount")?;
        let exchange_ts = i64_field(trade, "timestamp")?;
        let trade_id = id_field(trade, "trade_id")?;

        let mut events = vec![NormalizedEvent::Trade(Trade {
            key: key.clone(),
            trade_id: trade_id.clone(),
            price,
            quantity,
            side,
            exchange_ts,
            ingested_at: received_at,
        })];
        if trade.get("liquidation").is_some_and(Value::is_string) {
            events.push(NormalizedEvent::Liquidation(Liquidation {
                key,
                trade_id: Some(trade_id),
                side,
                price,
                quantity,
                exchange_ts,
                ingested_at: received_at,
            }));
        }
        Ok(events)
    }

    fn parse_notification(&self, params: &Value, received_at: i64) -> FeedResult<Vec<NormalizedEvent>> {
        let channel = str_field(params, "channel")?;
        let data = required(params, "data")?;
        match channel.split('.').next() {
            Some("book") => Ok(vec![self.parse_book(data, received_at)?]),
            Some("trades") => {
                let trades = data
                    .as_array()
                    .ok_or_else(|| FeedError::Malformed("trades: expected array".to_string()))?;
                let mut events = Vec::with_capacity(trades.len());
                for trade in trades {
                    events.extend(self.parse_trade(trade, received_at)?);
                }
                Ok(events)
            }
            _ => Err(FeedError::UnknownEventType {
                exchange: EXCHANGE,
                event: channel.to_string(),
            }),
        }
    }

    /// `result` of a JSON-RPC reply; an `error` member is a schema mismatch.
    fn result<'a>(&self, body: &'a Value) -> FeedResult<&'a Value> {
        if let Some(error) = body.get("error") {
            return Err(FeedError::Schema(format!("rpc error: {error}")));
        }
        required(body, "result")
    }

    fn book_summary<'a>(&self, body: &'a Value) -> FeedResult<&'a Value> {
        self.result(body)?
            .as_array()
            .and_then(|rows| rows.first())
            .ok_or_else(|| FeedError::Schema("empty book summary".to_string()))
    }

    fn parse_funding_rate(
        &self,
        key: &InstrumentKey,
        body: &Value,
        ingested_at: i64,
    ) -> FeedResult<NormalizedEvent> {
        let summary = self.book_summary(body)?;
        // Perpetual funding accrues continuously; there is no settlement time.
        Ok(NormalizedEvent::FundingRate(FundingRate {
            key: key.clone(),
            funding_rate: decimal_field(summary, "funding_8h")?,
            next_funding_time: None,
            mark_price: Some(price_field(summary, "mark_price")?),
            index_price: None,
            exchange_ts: i64_field(summary, "creation_timestamp")?,
            ingested_at,
        }))
    }

    fn parse_open_interest(
        &self,
        key: &InstrumentKey,
        body: &Value,
        ingested_at: i64,
    ) -> FeedResult<NormalizedEvent> {
        let summary = self.book_summary(body)?;
        Ok(NormalizedEvent::OpenInterest(OpenInterest {
            key: key.clone(),
            open_interest: size_field(summary, "open_interest")?.inner(),
            open_interest_value: None,
            exchange_ts: i64_field(summary, "creation_timestamp")?,
            ingested_at,
        }))
    }

    /// Candles are `[ts, open, high, low, close]`, oldest first.
    fn parse_volatility_index(
        &self,
        key: &InstrumentKey,
        body: &Value,
        ingested_at: i64,
    ) -> FeedResult<NormalizedEvent> {
        let candle = array_field(self.result(body)?, "data")?
            .last()
            .and_then(Value::as_array)
            .filter(|cols| cols.len() >= 5)
            .ok_or_else(|| FeedError::Schema("no volatility candles".to_string()))?;
        Ok(NormalizedEvent::VolatilityIndex(VolatilityIndex {
            key: key.clone(),
            value: decimal(&candle[4], "close")?,
            exchange_ts: i64_value(&candle[0], "ts")?,
            ingested_at,
        }))
    }
}

/// Book entries are `[action, price, amount]`; `delete` removes the level.
fn book_entries(raw: &[Value]) -> FeedResult<Vec<PriceLevel>> {
    raw.iter()
        .map(|entry| {
            let cols = entry
                .as_array()
                .filter(|c| c.len() >= 3)
                .ok_or_else(|| FeedError::Malformed(format!("bad book entry {entry}")))?;
            let price = Price::new(decimal(&cols[1], "book price")?);
            let amount = match cols[0].as_str() {
                Some("delete") => Size::ZERO,
                Some("new" | "change") => size(&cols[2], "book amount")?,
                _ => {
                    return Err(FeedError::Malformed(format!(
                        "bad book action {}",
                        cols[0]
                    )))
                }
            };
            Ok(PriceLevel::new(price, amount))
        })
        .collect()
}

impl ExchangeAdapter for DeribitAdapter {
    fn exchange(&self) -> Exchange {
        EXCHANGE
    }

    fn market_type(&self) -> MarketType {
        self.market_type
    }

    fn supports(&self, data_type: DataType) -> bool {
        match data_type {
            DataType::Orderbook
            | DataType::Trade
            | DataType::Liquidation
            | DataType::FundingRate
            | DataType::OpenInterest => self.is_perpetual(),
            DataType::VolatilityIndex => self.market_type == MarketType::Options,
            DataType::LsrTopPosition | DataType::LsrAllAccount => false,
        }
    }

    fn parse_frame(&self, frame: &Value, received_at: i64) -> FeedResult<Vec<NormalizedEvent>> {
        match frame.get("method").and_then(Value::as_str) {
            Some("subscription") => {
                return self.parse_notification(required(frame, "params")?, received_at)
            }
            Some("heartbeat") => return Ok(Vec::new()),
            Some(other) => {
                return Err(FeedError::UnknownEventType {
                    exchange: EXCHANGE,
                    event: other.to_string(),
                })
            }
            None => {}
        }

        // Replies to our own requests: subscribe acks and keepalives.
        if frame.get("id").is_some() {
            if let Some(error) = frame.get("error") {
                warn!(exchange = %EXCHANGE, %error, "Request rejected");
            }
            return Ok(Vec::new());
        }
        Err(FeedError::Malformed("neither notification nor reply".to_string()))
    }

    fn subscribe_payload(&self, symbols: &[String], data_types: &[DataType]) -> Vec<String> {
        if !self.is_perpetual() {
            return Vec::new();
        }
        let wants_book = data_types.contains(&DataType::Orderbook);
        let wants_trades =
            data_types.contains(&DataType::Trade) || data_types.contains(&DataType::Liquidation);

        let mut channels = Vec::new();
        for symbol in symbols {
            let name = to_native(EXCHANGE, self.market_type, symbol);
            if wants_book {
                channels.push(format!("book.{name}.100ms"));
            }
            if wants_trades {
                channels.push(format!("trades.{name}.100ms"));
            }
        }
        if channels.is_empty() {
            return Vec::new();
        }
        vec![json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "public/subscribe",
            "params": {"channels": channels}
        })
        .to_string()]
    }

    fn resubscribe_payload(&self, key: &InstrumentKey) -> Vec<String> {
        let channel = format!("book.{}.100ms", self.instrument_name(key));
        ["public/unsubscribe", "public/subscribe"]
            .iter()
            .enumerate()
            .map(|(i, method)| {
                json!({
                    "jsonrpc": "2.0",
                    "id": 2 + i,
                    "method": method,
                    "params": {"channels": [channel]}
                })
                .to_string()
            })
            .collect()
    }

    fn heartbeat_policy(&self) -> HeartbeatPolicy {
        HeartbeatPolicy::ClientText {
            interval_ms: 15_000,
            timeout_ms: 10_000,
            ping: json!({
                "jsonrpc": "2.0",
                "id": HEARTBEAT_ID,
                "method": "public/test",
                "params": {}
            })
            .to_string(),
            pong: None,
        }
    }

    fn snapshot_source(&self) -> SnapshotSource {
        SnapshotSource::Stream
    }

    fn sequence_rule(&self) -> SequenceRule {
        SequenceRule::Previous
    }

    fn poll_request(&self, key: &InstrumentKey, data_type: DataType, now: i64) -> Option<RestRequest> {
        match data_type {
            DataType::VolatilityIndex if !self.is_perpetual() => Some(
                RestRequest::new("/api/v2/public/get_volatility_index_data")
                    .param("currency", base_asset(&key.symbol))
                    .param("start_timestamp", now - DVOL_WINDOW_MS)
                    .param("end_timestamp", now)
                    .param("resolution", 60),
            ),
            DataType::FundingRate | DataType::OpenInterest if self.is_perpetual() => Some(
                RestRequest::new("/api/v2/public/get_book_summary_by_instrument")
                    .param("instrument_name", self.instrument_name(key)),
            ),
            _ => None,
        }
    }

    fn parse_poll(
        &self,
        key: &InstrumentKey,
        data_type: DataType,
        body: &Value,
        ingested_at: i64,
    ) -> FeedResult<NormalizedEvent> {
        schema(match data_type {
            DataType::FundingRate => self.parse_funding_rate(key, body, ingested_at),
            DataType::OpenInterest => self.parse_open_interest(key, body, ingested_at),
            DataType::VolatilityIndex => self.parse_volatility_index(key, body, ingested_at),
            other => Err(self.unsupported(key, other)),
        })
    }
}
