//! Core domain types for the prism market-data pipeline.
//!
//! This crate provides the vocabulary shared by every stage:
//! - `InstrumentKey`: (exchange, market type, symbol) identity of a book or stream
//! - `Price`, `Size`: Precision-safe numeric types
//! - `NormalizedEvent`: The canonical event union produced by the normalizer
//! - `resolve_subject`: The single source of bus subject names
//! - `RetryPolicy`: Shared retry-with-backoff used by polling, publishing and reconnects

pub mod decimal;
pub mod error;
pub mod events;
pub mod instrument;
pub mod protocol;
pub mod retry;
pub mod subject;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use events::{
    BookSide, FundingRate, LevelChange, Liquidation, LsrKind, LsrSnapshot, NormalizedEvent,
    OpenInterest, OrderBookDiff, OrderBookSnapshot, PriceLevel, Side, Trade, VolatilityIndex,
};
pub use instrument::{DataType, Exchange, InstrumentKey, MarketType};
pub use protocol::{ChecksumRule, HeartbeatPolicy, SequenceRule, SnapshotSource};
pub use retry::{retry_with_backoff, RetryError, RetryPolicy};
pub use subject::{
    resolve_stream_subject, resolve_subject, stream_subjects, subject_for_event, subject_matches,
    StreamKind,
};

/// Current wall-clock time as epoch milliseconds.
///
/// Every timestamp in a `NormalizedEvent` uses this unit.
#[inline]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
