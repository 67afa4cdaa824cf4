//! Bus subject naming.
//!
//! Every producer and every consumer-side test builds subjects through
//! these functions. Scheme: `{data_type}.{exchange}.{market_type}.{symbol}`,
//! with full order-book snapshots under a separate `snapshot.` root so the
//! two streams never share a subject.

use crate::{CoreError, DataType, Exchange, MarketType, NormalizedEvent, Result};

/// Root token of the snapshot stream subjects.
pub const SNAPSHOT_ROOT: &str = "snapshot";

/// Logical output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// High-frequency stream: book diffs and every other event type.
    Incremental,
    /// Periodic full order-book snapshots.
    Snapshot,
}

impl StreamKind {
    /// Broker-side stream name.
    pub fn stream_name(&self) -> &'static str {
        match self {
            StreamKind::Incremental => "MARKET_DATA",
            StreamKind::Snapshot => "ORDERBOOK_SNAP",
        }
    }

    /// Stream an event belongs to.
    pub fn for_event(event: &NormalizedEvent) -> Self {
        match event {
            NormalizedEvent::OrderBookSnapshot(_) => StreamKind::Snapshot,
            _ => StreamKind::Incremental,
        }
    }
}

/// Restrict a symbol to subject-safe characters.
///
/// `/` and `:` become `-` (`BTC/USDT` -> `BTC-USDT`); `.`, wildcards and
/// whitespace are dropped.
pub fn sanitize_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter_map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '_' | '-' => Some(c),
            '/' | ':' => Some('-'),
            _ => None,
        })
        .collect()
}

/// Resolve the incremental-stream subject.
pub fn resolve_subject(
    data_type: DataType,
    exchange: Exchange,
    market_type: MarketType,
    symbol: &str,
) -> Result<String> {
    let symbol = sanitize_symbol(symbol);
    if symbol.is_empty() {
        return Err(CoreError::InvalidSubject(format!(
            "symbol is empty after sanitizing ({data_type}.{exchange}.{market_type})"
        )));
    }
    Ok(format!("{data_type}.{exchange}.{market_type}.{symbol}"))
}

/// Resolve the subject for a given stream.
///
/// Only incremental subjects start with the `{data_type}` token; snapshot
/// subjects put `snapshot` first and the data type second.
pub fn resolve_stream_subject(
    kind: StreamKind,
    data_type: DataType,
    exchange: Exchange,
    market_type: MarketType,
    symbol: &str,
) -> Result<String> {
    let subject = resolve_subject(data_type, exchange, market_type, symbol)?;
    Ok(match kind {
        StreamKind::Incremental => subject,
        StreamKind::Snapshot => format!("{SNAPSHOT_ROOT}.{subject}"),
    })
}

/// Resolve the subject an event is published on.
pub fn subject_for_event(event: &NormalizedEvent) -> Result<String> {
    let key = event.key();
    resolve_stream_subject(
        StreamKind::for_event(event),
        event.data_type(),
        key.exchange,
        key.market_type,
        &key.symbol,
    )
}

/// Producer-side subject filter list of a stream.
///
/// The broker-side stream definition must use exactly this list.
pub fn stream_subjects(kind: StreamKind) -> Vec<String> {
    match kind {
        StreamKind::Incremental => DataType::ALL
            .iter()
            .map(|data_type| format!("{data_type}.>"))
            .collect(),
        StreamKind::Snapshot => vec![format!("{SNAPSHOT_ROOT}.{}.>", DataType::Orderbook)],
    }
}

/// True if `subject` is matched by the NATS-style `filter` (`*`, `>`).
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(f), Some(s)) if f == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_valid_subject(subject: &str) -> bool {
        let mut chars = subject.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    }

    #[test]
    fn test_examples() {
        assert_eq!(
            resolve_subject(
                DataType::FundingRate,
                Exchange::OkxDerivatives,
                MarketType::Perpetual,
                "BTC-USDT"
            )
            .unwrap(),
            "funding_rate.okx_derivatives.perpetual.BTC-USDT"
        );
        assert_eq!(
            resolve_subject(DataType::Trade, Exchange::BinanceSpot, MarketType::Spot, "BTCUSDT")
                .unwrap(),
            "trade.binance_spot.spot.BTCUSDT"
        );
    }

    #[test]
    fn test_every_canonical_combination_is_well_formed() {
        let symbols = ["BTC-USDT", "ETH/USDC", "BTC-28JUN24-60000-C", "sol_usdc", "X.Y*"];
        for data_type in DataType::ALL {
            for exchange in Exchange::ALL {
                for market_type in MarketType::ALL {
                    for symbol in symbols {
                        for kind in [StreamKind::Incremental, StreamKind::Snapshot] {
                            let subject = resolve_stream_subject(
                                kind,
                                data_type,
                                exchange,
                                market_type,
                                symbol,
                            )
                            .unwrap();
                            assert!(is_valid_subject(&subject), "bad subject {subject}");
                            assert!(!subject.contains("-data."), "deprecated infix {subject}");
                            let expected_tokens = match kind {
                                StreamKind::Incremental => 4,
                                StreamKind::Snapshot => 5,
                            };
                            assert_eq!(subject.split('.').count(), expected_tokens);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_empty_symbol_rejected() {
        assert!(resolve_subject(DataType::Trade, Exchange::OkxSpot, MarketType::Spot, "..*").is_err());
    }

    #[test]
    fn test_streams_do_not_overlap() {
        let incremental = stream_subjects(StreamKind::Incremental);
        let snapshot = stream_subjects(StreamKind::Snapshot);
        let diff_subject = resolve_stream_subject(
            StreamKind::Incremental,
            DataType::Orderbook,
            Exchange::BinanceSpot,
            MarketType::Spot,
            "BTC-USDT",
        )
        .unwrap();
        let snap_subject = resolve_stream_subject(
            StreamKind::Snapshot,
            DataType::Orderbook,
            Exchange::BinanceSpot,
            MarketType::Spot,
            "BTC-USDT",
        )
        .unwrap();

        assert!(incremental.iter().any(|f| subject_matches(f, &diff_subject)));
        assert!(!incremental.iter().any(|f| subject_matches(f, &snap_subject)));
        assert!(snapshot.iter().any(|f| subject_matches(f, &snap_subject)));
        assert!(!snapshot.iter().any(|f| subject_matches(f, &diff_subject)));
    }

    #[test]
    fn test_subject_matches_wildcards() {
        assert!(subject_matches("trade.*.spot.>", "trade.okx_spot.spot.BTC-USDT"));
        assert!(!subject_matches("trade.>", "trade"));
        assert!(!subject_matches("trade.okx_spot", "trade.okx_spot.spot"));
    }
}
