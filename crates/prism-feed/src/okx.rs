//! OKX spot and perpetual swaps (v5 public API).
//!
//! Books arrive on the `books` channel as a pushed snapshot followed by
//! updates chained through `prevSeqId`/`seqId`, each with a CRC32 checksum.

use crate::adapter::{ExchangeAdapter, RestRequest};
use crate::error::{FeedError, FeedResult};
use crate::fields::{
    array_field, decimal, decimal_field, i64_field, i64_value, id_field, level_changes, levels,
    opt_decimal_field, opt_i64_field, price_field, required, schema, size_field, str_field,
    u64_field,
};
use crate::symbol::{base_asset, to_canonical, to_native};
use prism_core::{
    BookSide, ChecksumRule, DataType, Exchange, FundingRate, HeartbeatPolicy, InstrumentKey,
    Liquidation, LsrKind, LsrSnapshot, MarketType, NormalizedEvent, OpenInterest, OrderBookDiff,
    OrderBookSnapshot, SequenceRule, Side, SnapshotSource, Trade,
};
use serde_json::{json, Value};
use tracing::warn;

const LSR_PERIOD: &str = "5m";
const SWAP: &str = "SWAP";

pub struct OkxAdapter {
    exchange: Exchange,
    market_type: MarketType,
}

impl OkxAdapter {
    pub fn new(exchange: Exchange) -> Self {
        let market_type = match exchange {
            Exchange::OkxSpot => MarketType::Spot,
            _ => MarketType::Perpetual,
        };
        Self {
            exchange,
            market_type,
        }
    }

    fn is_swap(&self) -> bool {
        self.exchange == Exchange::OkxDerivatives
    }

    fn key(&self, inst_id: &str) -> InstrumentKey {
        InstrumentKey::new(self.exchange, self.market_type, to_canonical(self.exchange, inst_id))
    }

    fn inst_id(&self, key: &InstrumentKey) -> String {
        to_native(self.exchange, self.market_type, &key.symbol)
    }

    fn parse_books(
        &self,
        key: InstrumentKey,
        action: &str,
        entry: &Value,
        received_at: i64,
    ) -> FeedResult<NormalizedEvent> {
        let checksum = match opt_i64_field(entry, "checksum")? {
            Some(raw) => Some(
                i32::try_from(raw)
                    .map_err(|_| FeedError::Malformed(format!("checksum out of range: {raw}")))?,
            ),
            None => None,
        };
        let exchange_ts = i64_field(entry, "ts")?;
        let sequence = u64_field(entry, "seqId")?;

        match action {
            "snapshot" => Ok(NormalizedEvent::OrderBookSnapshot(OrderBookSnapshot {
                key,
                sequence,
                bids: levels(array_field(entry, "bids")?)?,
                asks: levels(array_field(entry, "asks")?)?,
                checksum,
                exchange_ts,
                retrieved_at: received_at,
            })),
            "update" => {
                let mut changes = level_changes(array_field(entry, "bids")?, BookSide::Bid)?;
                changes.extend(level_changes(array_field(entry, "asks")?, BookSide::Ask)?);
                // An update with no changes repeats seqId == prevSeqId.
                Ok(NormalizedEvent::OrderBookDiff(OrderBookDiff {
                    key,
                    first_sequence: sequence,
                    last_sequence: sequence,
                    prev_sequence: Some(u64_field(entry, "prevSeqId")?),
                    changes,
                    checksum,
                    exchange_ts,
                    ingested_at: received_at,
                }))
            }
            other => Err(FeedError::UnknownEventType {
                exchange: self.exchange,
                event: format!("books/{other}"),
            }),
        }
    }

    fn parse_trade(&self, entry: &Value, received_at: i64) -> FeedResult<NormalizedEvent> {
        let side_raw = str_field(entry, "side")?;
        Ok(NormalizedEvent::Trade(Trade {
            key: self.key(str_field(entry, "instId")?),
            trade_id: id_field(entry, "tradeId")?,
            price: price_field(entry, "px")?,
            quantity: size_field(entry, "sz")?,
            side: Side::parse(side_raw)
                .ok_or_else(|| FeedError::Malformed(format!("side: unknown {side_raw}")))?,
            exchange_ts: i64_field(entry, "ts")?,
            ingested_at: received_at,
        }))
    }

    fn parse_liquidations(
        &self,
        entry: &Value,
        received_at: i64,
    ) -> FeedResult<Vec<NormalizedEvent>> {
        let key = self.key(str_field(entry, "instId")?);
        array_field(entry, "details")?
            .iter()
            .map(|detail| {
                let side_raw = str_field(detail, "side")?;
                Ok(NormalizedEvent::Liquidation(Liquidation {
                    key: key.clone(),
                    trade_id: None,
                    side: Side::parse(side_raw)
                        .ok_or_else(|| FeedError::Malformed(format!("side: unknown {side_raw}")))?,
                    price: price_field(detail, "bkPx")?,
                    quantity: size_field(detail, "sz")?,
                    exchange_ts: i64_field(detail, "ts")?,
                    ingested_at: received_at,
                }))
            })
            .collect()
    }

    /// First row of a `{"code":"0","data":[...]}` envelope.
    fn first_row<'a>(&self, body: &'a Value) -> FeedResult<&'a Value> {
        let code = str_field(body, "code")?;
        if code != "0" {
            let msg = body.get("msg").and_then(Value::as_str).unwrap_or_default();
            return Err(FeedError::Schema(format!("error code {code}: {msg}")));
        }
        array_field(body, "data")?
            .first()
            .ok_or_else(|| FeedError::Schema("empty data array".to_string()))
    }

    fn parse_funding_rate(
        &self,
        key: &InstrumentKey,
        body: &Value,
        ingested_at: i64,
    ) -> FeedResult<NormalizedEvent> {
        let row = self.first_row(body)?;
        // `fundingTime` is the upcoming settlement.
        let next_funding_time = opt_i64_field(row, "fundingTime")?;
        Ok(NormalizedEvent::FundingRate(FundingRate {
            key: key.clone(),
            funding_rate: decimal_field(row, "fundingRate")?,
            next_funding_time,
            mark_price: None,
            index_price: None,
            exchange_ts: opt_i64_field(row, "ts")?.unwrap_or(ingested_at),
            ingested_at,
        }))
    }

    fn parse_open_interest(
        &self,
        key: &InstrumentKey,
        body: &Value,
        ingested_at: i64,
    ) -> FeedResult<NormalizedEvent> {
        let row = self.first_row(body)?;
        Ok(NormalizedEvent::OpenInterest(OpenInterest {
            key: key.clone(),
            open_interest: size_field(row, "oi")?.inner(),
            open_interest_value: opt_decimal_field(row, "oiUsd")?,
            exchange_ts: i64_field(row, "ts")?,
            ingested_at,
        }))
    }

    /// Rubik rows are `[ts, ratio]`, newest first.
    fn parse_lsr(
        &self,
        key: &InstrumentKey,
        kind: LsrKind,
        body: &Value,
        ingested_at: i64,
    ) -> FeedResult<NormalizedEvent> {
        let row = self
            .first_row(body)?
            .as_array()
            .filter(|cols| cols.len() >= 2)
            .ok_or_else(|| FeedError::Schema("expected [ts, ratio] row".to_string()))?;
        Ok(NormalizedEvent::LsrSnapshot(LsrSnapshot {
            key: key.clone(),
            kind,
            long_short_ratio: decimal(&row[1], "ratio")?,
            long_ratio: None,
            short_ratio: None,
            period: LSR_PERIOD.to_string(),
            exchange_ts: i64_value(&row[0], "ts")?,
            ingested_at,
        }))
    }
}

impl ExchangeAdapter for OkxAdapter {
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
            | DataType::LsrAllAccount => self.is_swap(),
            DataType::VolatilityIndex => false,
        }
    }

    fn parse_frame(&self, frame: &Value, received_at: i64) -> FeedResult<Vec<NormalizedEvent>> {
        if let Some(event) = frame.get("event").and_then(Value::as_str) {
            if event == "error" {
                warn!(
                    exchange = %self.exchange,
                    code = ?frame.get("code"),
                    msg = ?frame.get("msg"),
                    "Subscription rejected"
                );
            }
            return Ok(Vec::new());
        }

        let arg = required(frame, "arg")?;
        let channel = str_field(arg, "channel")?;
        let data = array_field(frame, "data")?;

        match channel {
            "books" => {
                let key = self.key(str_field(arg, "instId")?);
                let action = str_field(frame, "action")?;
                data.iter()
                    .map(|entry| self.parse_books(key.clone(), action, entry, received_at))
                    .collect()
            }
            "trades" => data
                .iter()
                .map(|entry| self.parse_trade(entry, received_at))
                .collect(),
            "liquidation-orders" => {
                let mut events = Vec::new();
                for entry in data {
                    events.extend(self.parse_liquidations(entry, received_at)?);
                }
                Ok(events)
            }
            other => Err(FeedError::UnknownEventType {
                exchange: self.exchange,
                event: other.to_string(),
            }),
        }
    }

    fn subscribe_payload(&self, symbols: &[String], data_types: &[DataType]) -> Vec<String> {
        let mut args = Vec::new();
        for symbol in symbols {
            let inst_id = to_native(self.exchange, self.market_type, symbol);
            for data_type in data_types {
                match data_type {
                    DataType::Orderbook => args.push(json!({"channel": "books", "instId": inst_id})),
                    DataType::Trade => args.push(json!({"channel": "trades", "instId": inst_id})),
                    _ => {}
                }
            }
        }
        // Liquidations are only offered per instrument type.
        if self.is_swap() && data_types.contains(&DataType::Liquidation) && !symbols.is_empty() {
            args.push(json!({"channel": "liquidation-orders", "instType": SWAP}));
        }
        if args.is_empty() {
            return Vec::new();
        }
        vec![json!({"op": "subscribe", "args": args}).to_string()]
    }

    fn resubscribe_payload(&self, key: &InstrumentKey) -> Vec<String> {
        let arg = json!({"channel": "books", "instId": self.inst_id(key)});
        vec![
            json!({"op": "unsubscribe", "args": [arg.clone()]}).to_string(),
            json!({"op": "subscribe", "args": [arg]}).to_string(),
        ]
    }

    fn heartbeat_policy(&self) -> HeartbeatPolicy {
        // The server drops sessions silent for 30s.
        HeartbeatPolicy::ClientText {
            interval_ms: 25_000,
            timeout_ms: 5_000,
            ping: "ping".to_string(),
            pong: Some("pong".to_string()),
        }
    }

    fn snapshot_source(&self) -> SnapshotSource {
        SnapshotSource::Stream
    }

    fn sequence_rule(&self) -> SequenceRule {
        SequenceRule::Previous
    }

    fn checksum_rule(&self) -> Option<ChecksumRule> {
        Some(ChecksumRule::Crc32Top25)
    }

    fn poll_request(&self, key: &InstrumentKey, data_type: DataType, _now: i64) -> Option<RestRequest> {
        if !self.is_swap() {
            return None;
        }
        let inst_id = self.inst_id(key);
        Some(match data_type {
            DataType::FundingRate => {
                RestRequest::new("/api/v5/public/funding-rate").param("instId", inst_id)
            }
            DataType::OpenInterest => RestRequest::new("/api/v5/public/open-interest")
                .param("instType", SWAP)
                .param("instId", inst_id),
            DataType::LsrAllAccount => {
                RestRequest::new("/api/v5/rubik/stat/contracts/long-short-account-ratio")
                    .param("ccy", base_asset(&key.symbol))
                    .param("period", LSR_PERIOD)
            }
            DataType::LsrTopPosition => RestRequest::new(
                "/api/v5/rubik/stat/contracts/long-short-position-ratio-contract-top-trader",
            )
            .param("instId", inst_id)
            .param("period", LSR_PERIOD),
            _ => return None,
        })
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
            DataType::LsrTopPosition => self.parse_lsr(key, LsrKind::TopPosition, body, ingested_at),
            DataType::LsrAllAccount => self.parse_lsr(key, LsrKind::AllAccount, body, ingested_at),
            other => Err(self.unsupported(key, other)),
        })
    }
}
