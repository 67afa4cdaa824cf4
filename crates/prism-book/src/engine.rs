//! Order-book synchronization state machine.
//!
//! `UNSYNCED -> SYNCING -> SYNCED -> (gap / checksum) -> SYNCING -> SYNCED`,
//! or `STALE` once the resync budget is spent. One engine per instrument,
//! owned by exactly one worker.

use crate::budget::{ResyncBudget, ResyncBudgetConfig};
use crate::checksum;
use crate::error::{BookError, BookResult};
use prism_core::{
    now_ms, BookSide, ChecksumRule, InstrumentKey, OrderBookDiff, OrderBookSnapshot, Price,
    PriceLevel, SequenceRule, Size,
};
use serde::Deserialize;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    Unsynced,
    Syncing,
    Synced,
    Stale,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Unsynced => "unsynced",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Stale => "stale",
        }
    }
}

/// Why a fresh snapshot is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResyncReason {
    /// First diff seen while unsynced.
    Initial,
    /// The upstream connection started a new session.
    SessionReset,
    Gap,
    ChecksumMismatch,
    SnapshotFailed,
    /// Buffered diffs do not continue from the snapshot.
    Unbridgeable,
}

impl ResyncReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResyncReason::Initial => "initial",
            ResyncReason::SessionReset => "session_reset",
            ResyncReason::Gap => "gap",
            ResyncReason::ChecksumMismatch => "checksum_mismatch",
            ResyncReason::SnapshotFailed => "snapshot_failed",
            ResyncReason::Unbridgeable => "unbridgeable",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiffOutcome {
    /// Applied on top of a synced book.
    Applied,
    /// Held until a snapshot arrives. `request_snapshot` is set on the first
    /// diff of an unsynced book.
    Buffered { request_snapshot: bool },
    /// Entirely covered by the current book state.
    Outdated,
    /// The book is stale.
    Ignored,
    /// Book invalidated; a new snapshot is needed.
    Resync(ResyncReason),
    /// Book invalidated and the resync budget is spent.
    Stale(ResyncReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    /// Book synced. `replayed` holds buffered diffs applied on top.
    Synced { replayed: Vec<OrderBookDiff> },
    Ignored,
    Resync(ResyncReason),
    Stale(ResyncReason),
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_buffered_diffs")]
    pub max_buffered_diffs: usize,
    #[serde(default)]
    pub budget: ResyncBudgetConfig,
}

fn default_max_buffered_diffs() -> usize {
    1_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_buffered_diffs: default_max_buffered_diffs(),
            budget: ResyncBudgetConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Contiguity {
    Apply,
    Outdated,
    Gap,
}

pub struct OrderBookEngine {
    key: InstrumentKey,
    rule: SequenceRule,
    checksum: Option<ChecksumRule>,
    max_buffered: usize,
    status: SyncStatus,
    bids: BTreeMap<Price, Size>,
    asks: BTreeMap<Price, Size>,
    last_update_id: u64,
    /// A diff has been applied since the last snapshot.
    bridged: bool,
    exchange_ts: i64,
    buffer: VecDeque<OrderBookDiff>,
    evicted: u64,
    budget: ResyncBudget,
}

impl OrderBookEngine {
    pub fn new(
        key: InstrumentKey,
        rule: SequenceRule,
        checksum: Option<ChecksumRule>,
        config: EngineConfig,
    ) -> Self {
        Self {
            key,
            rule,
            checksum,
            max_buffered: config.max_buffered_diffs.max(1),
            status: SyncStatus::Unsynced,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            bridged: false,
            exchange_ts: 0,
            buffer: VecDeque::new(),
            evicted: 0,
            budget: ResyncBudget::new(config.budget),
        }
    }

    pub fn key(&self) -> &InstrumentKey {
        &self.key
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Resync failures currently counted against the budget.
    pub fn resync_failures(&self) -> usize {
        self.budget.failures()
    }

    /// Buffered diffs evicted on overflow since the last call.
    pub fn take_evicted(&mut self) -> u64 {
        std::mem::take(&mut self.evicted)
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(p, s)| PriceLevel::new(*p, *s))
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .next()
            .map(|(p, s)| PriceLevel::new(*p, *s))
    }

    pub fn depth(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    /// Replace the book with `snapshot` and replay buffered diffs.
    pub fn apply_snapshot(&mut self, snapshot: &OrderBookSnapshot) -> BookResult<SnapshotOutcome> {
        self.check_key(&snapshot.key)?;
        if self.status == SyncStatus::Stale {
            return Ok(SnapshotOutcome::Ignored);
        }

        self.bids = collect_side(&snapshot.bids);
        self.asks = collect_side(&snapshot.asks);
        self.last_update_id = snapshot.sequence;
        self.exchange_ts = snapshot.exchange_ts;
        self.bridged = false;

        if self.checksum_mismatch(snapshot.checksum) {
            warn!(book = %self.key, sequence = snapshot.sequence, "Snapshot checksum mismatch");
            return Ok(self.invalidate_snapshot(ResyncReason::ChecksumMismatch));
        }
        self.status = SyncStatus::Synced;

        let mut pending = std::mem::take(&mut self.buffer);
        let mut replayed = Vec::new();
        while let Some(diff) = pending.pop_front() {
            match self.contiguity(&diff) {
                Contiguity::Outdated => continue,
                Contiguity::Apply => {
                    self.apply_changes(&diff);
                    if self.checksum_mismatch(diff.checksum) {
                        return Ok(self.invalidate_snapshot(ResyncReason::ChecksumMismatch));
                    }
                    self.budget.record_applied();
                    replayed.push(diff);
                }
                Contiguity::Gap => {
                    debug!(
                        book = %self.key,
                        snapshot = snapshot.sequence,
                        first = diff.first_sequence,
                        "Snapshot does not bridge buffered diffs"
                    );
                    let outcome = self.invalidate_snapshot(ResyncReason::Unbridgeable);
                    // Later diffs may still bridge the next snapshot.
                    pending.push_front(diff);
                    for diff in pending {
                        self.buffer_diff(diff);
                    }
                    return Ok(outcome);
                }
            }
        }

        info!(
            book = %self.key,
            sequence = self.last_update_id,
            replayed = replayed.len(),
            "Book synced"
        );
        Ok(SnapshotOutcome::Synced { replayed })
    }

    /// Apply or buffer one diff.
    pub fn apply_diff(&mut self, diff: &OrderBookDiff) -> BookResult<DiffOutcome> {
        self.check_key(&diff.key)?;
        if diff.first_sequence > diff.last_sequence {
            return Err(BookError::InvertedRange {
                first: diff.first_sequence,
                last: diff.last_sequence,
            });
        }

        match self.status {
            SyncStatus::Stale => Ok(DiffOutcome::Ignored),
            SyncStatus::Unsynced => {
                self.status = SyncStatus::Syncing;
                self.buffer_diff(diff.clone());
                Ok(DiffOutcome::Buffered {
                    request_snapshot: true,
                })
            }
            SyncStatus::Syncing => {
                self.buffer_diff(diff.clone());
                Ok(DiffOutcome::Buffered {
                    request_snapshot: false,
                })
            }
            SyncStatus::Synced => match self.contiguity(diff) {
                Contiguity::Outdated => Ok(DiffOutcome::Outdated),
                Contiguity::Gap => {
                    warn!(
                        book = %self.key,
                        last_update_id = self.last_update_id,
                        first = diff.first_sequence,
                        last = diff.last_sequence,
                        prev = ?diff.prev_sequence,
                        "Sequence gap"
                    );
                    let outcome = self.invalidate_diff(ResyncReason::Gap);
                    if self.status == SyncStatus::Syncing {
                        self.buffer_diff(diff.clone());
                    }
                    Ok(outcome)
                }
                Contiguity::Apply => {
                    self.apply_changes(diff);
                    if self.checksum_mismatch(diff.checksum) {
                        warn!(
                            book = %self.key,
                            sequence = diff.last_sequence,
                            "Checksum mismatch after diff"
                        );
                        return Ok(self.invalidate_diff(ResyncReason::ChecksumMismatch));
                    }
                    self.budget.record_applied();
                    Ok(DiffOutcome::Applied)
                }
            },
        }
    }

    /// A requested snapshot could not be obtained.
    pub fn snapshot_failed(&mut self) -> SnapshotOutcome {
        if self.status == SyncStatus::Stale {
            return SnapshotOutcome::Ignored;
        }
        self.invalidate_snapshot(ResyncReason::SnapshotFailed)
    }

    /// The upstream connection was replaced; start over and forget past
    /// failures, including a stale verdict.
    pub fn session_reset(&mut self) {
        self.clear();
        self.budget.reset();
        self.status = SyncStatus::Syncing;
    }

    /// Top `depth` levels per side as a snapshot event. `None` unless synced.
    pub fn snapshot_view(&self, depth: usize) -> Option<OrderBookSnapshot> {
        if self.status != SyncStatus::Synced {
            return None;
        }
        let checksum = self
            .checksum
            .map(|rule| checksum::compute(rule, self.bids.iter().rev(), self.asks.iter()));
        Some(OrderBookSnapshot {
            key: self.key.clone(),
            sequence: self.last_update_id,
            bids: self
                .bids
                .iter()
                .rev()
                .take(depth)
                .map(|(p, s)| PriceLevel::new(*p, *s))
                .collect(),
            asks: self
                .asks
                .iter()
                .take(depth)
                .map(|(p, s)| PriceLevel::new(*p, *s))
                .collect(),
            checksum,
            exchange_ts: self.exchange_ts,
            retrieved_at: now_ms(),
        })
    }

    fn check_key(&self, key: &InstrumentKey) -> BookResult<()> {
        if *key != self.key {
            return Err(BookError::WrongInstrument {
                expected: self.key.clone(),
                got: key.clone(),
            });
        }
        Ok(())
    }

    fn contiguity(&self, diff: &OrderBookDiff) -> Contiguity {
        let luid = self.last_update_id;
        match (self.rule, diff.prev_sequence) {
            (SequenceRule::BridgedPrevious, Some(prev)) if self.bridged => {
                previous_rule(prev, diff.last_sequence, luid)
            }
            (SequenceRule::BridgedPrevious, Some(prev)) => {
                if diff.last_sequence < luid {
                    Contiguity::Outdated
                } else if diff.first_sequence <= luid || prev == luid {
                    Contiguity::Apply
                } else {
                    Contiguity::Gap
                }
            }
            (SequenceRule::Previous, Some(prev)) => previous_rule(prev, diff.last_sequence, luid),
            // Range, or a venue that omitted the previous id.
            _ => {
                if diff.last_sequence <= luid {
                    Contiguity::Outdated
                } else if diff.first_sequence <= luid.saturating_add(1) {
                    Contiguity::Apply
                } else {
                    Contiguity::Gap
                }
            }
        }
    }

    fn apply_changes(&mut self, diff: &OrderBookDiff) {
        for change in &diff.changes {
            let side = match change.side {
                BookSide::Bid => &mut self.bids,
                BookSide::Ask => &mut self.asks,
            };
            if change.size.is_zero() {
                side.remove(&change.price);
            } else {
                side.insert(change.price, change.size);
            }
        }
        self.last_update_id = diff.last_sequence;
        self.exchange_ts = diff.exchange_ts;
        self.bridged = true;
    }

    fn checksum_mismatch(&self, expected: Option<i32>) -> bool {
        match (self.checksum, expected) {
            (Some(rule), Some(expected)) => {
                checksum::compute(rule, self.bids.iter().rev(), self.asks.iter()) != expected
            }
            _ => false,
        }
    }

    fn buffer_diff(&mut self, diff: OrderBookDiff) {
        if self.buffer.len() >= self.max_buffered {
            self.buffer.pop_front();
            self.evicted += 1;
        }
        self.buffer.push_back(diff);
    }

    fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.buffer.clear();
        self.last_update_id = 0;
        self.bridged = false;
    }

    /// Drop all state and charge the budget. Returns true if the book went stale.
    fn invalidate(&mut self) -> bool {
        self.clear();
        if self.budget.record_failure() {
            self.status = SyncStatus::Stale;
            true
        } else {
            self.status = SyncStatus::Syncing;
            false
        }
    }

    fn invalidate_diff(&mut self, reason: ResyncReason) -> DiffOutcome {
        if self.invalidate() {
            DiffOutcome::Stale(reason)
        } else {
            DiffOutcome::Resync(reason)
        }
    }

    fn invalidate_snapshot(&mut self, reason: ResyncReason) -> SnapshotOutcome {
        if self.invalidate() {
            SnapshotOutcome::Stale(reason)
        } else {
            SnapshotOutcome::Resync(reason)
        }
    }
}

fn previous_rule(prev: u64, last: u64, luid: u64) -> Contiguity {
    if prev == luid {
        Contiguity::Apply
    } else if last <= luid {
        Contiguity::Outdated
    } else {
        Contiguity::Gap
    }
}

fn collect_side(levels: &[PriceLevel]) -> BTreeMap<Price, Size> {
    levels
        .iter()
        .filter(|l| !l.size.is_zero())
        .map(|l| (l.price, l.size))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::{Exchange, LevelChange, MarketType};
    use rust_decimal_macros::dec;

    fn key() -> InstrumentKey {
        InstrumentKey::new(Exchange::BinanceSpot, MarketType::Spot, "BTC-USDT")
    }

    fn snapshot(sequence: u64) -> OrderBookSnapshot {
        OrderBookSnapshot {
            key: key(),
            sequence,
            bids: vec![
                PriceLevel::new(Price::new(dec!(100)), Size::new(dec!(1))),
                PriceLevel::new(Price::new(dec!(99)), Size::new(dec!(2))),
            ],
            asks: vec![PriceLevel::new(Price::new(dec!(101)), Size::new(dec!(1)))],
            checksum: None,
            exchange_ts: 1,
            retrieved_at: 1,
        }
    }

    fn diff(first: u64, last: u64, changes: Vec<LevelChange>) -> OrderBookDiff {
        OrderBookDiff {
            key: key(),
            first_sequence: first,
            last_sequence: last,
            prev_sequence: None,
            changes,
            checksum: None,
            exchange_ts: last as i64,
            ingested_at: last as i64,
        }
    }

    fn bid(price: rust_decimal::Decimal, size: rust_decimal::Decimal) -> LevelChange {
        LevelChange {
            side: BookSide::Bid,
            price: Price::new(price),
            size: Size::new(size),
        }
    }

    fn engine() -> OrderBookEngine {
        OrderBookEngine::new(key(), SequenceRule::Range, None, EngineConfig::default())
    }

    #[test]
    fn test_first_diff_requests_snapshot() {
        let mut e = engine();
        assert_eq!(e.status(), SyncStatus::Unsynced);
        let outcome = e.apply_diff(&diff(5, 6, vec![])).unwrap();
        assert_eq!(outcome, DiffOutcome::Buffered { request_snapshot: true });
        assert_eq!(e.status(), SyncStatus::Syncing);
        let outcome = e.apply_diff(&diff(7, 7, vec![])).unwrap();
        assert_eq!(outcome, DiffOutcome::Buffered { request_snapshot: false });
    }

    #[test]
    fn test_snapshot_replays_straddling_diffs() {
        let mut e = engine();
        e.apply_diff(&diff(1, 9, vec![bid(dec!(50), dec!(1))])).unwrap();
        e.apply_diff(&diff(10, 12, vec![bid(dec!(100), dec!(0))])).unwrap();
        e.apply_diff(&diff(13, 13, vec![bid(dec!(98), dec!(4))])).unwrap();

        let SnapshotOutcome::Synced { replayed } = e.apply_snapshot(&snapshot(11)).unwrap() else {
            panic!("expected synced");
        };
        // 1..=9 is covered by the snapshot; 10..=12 straddles it.
        assert_eq!(replayed.len(), 2);
        assert_eq!(e.last_update_id(), 13);
        assert_eq!(e.best_bid().unwrap().price.0, dec!(99));
        assert_eq!(e.depth(), (2, 1));
    }

    #[test]
    fn test_unbridgeable_snapshot_keeps_later_diffs() {
        let mut e = engine();
        e.apply_diff(&diff(20, 25, vec![])).unwrap();
        let outcome = e.apply_snapshot(&snapshot(10)).unwrap();
        assert_eq!(outcome, SnapshotOutcome::Resync(ResyncReason::Unbridgeable));
        assert_eq!(e.status(), SyncStatus::Syncing);
        assert_eq!(e.buffered(), 1);

        let outcome = e.apply_snapshot(&snapshot(22)).unwrap();
        assert!(matches!(outcome, SnapshotOutcome::Synced { .. }));
        assert_eq!(e.last_update_id(), 25);
    }

    #[test]
    fn test_replayed_diffs_count_towards_healthy_streak() {
        let config = EngineConfig {
            budget: ResyncBudgetConfig {
                healthy_after_diffs: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut e = OrderBookEngine::new(key(), SequenceRule::Range, None, config);
        e.apply_snapshot(&snapshot(10)).unwrap();

        let outcome = e.apply_diff(&diff(12, 12, vec![])).unwrap();
        assert_eq!(outcome, DiffOutcome::Resync(ResyncReason::Gap));
        assert_eq!(e.resync_failures(), 1);
        e.apply_diff(&diff(13, 13, vec![])).unwrap();

        let SnapshotOutcome::Synced { replayed } = e.apply_snapshot(&snapshot(11)).unwrap() else {
            panic!("expected synced");
        };
        assert_eq!(replayed.len(), 2);
        assert_eq!(e.resync_failures(), 0);
    }

    #[test]
    fn test_zero_size_removes_level() {
        let mut e = engine();
        e.apply_snapshot(&snapshot(10)).unwrap();
        e.apply_diff(&diff(11, 11, vec![bid(dec!(100), dec!(0.000))])).unwrap();
        assert_eq!(e.best_bid().unwrap().price.0, dec!(99));
    }

    #[test]
    fn test_buffer_evicts_oldest() {
        let config = EngineConfig {
            max_buffered_diffs: 2,
            ..Default::default()
        };
        let mut e = OrderBookEngine::new(key(), SequenceRule::Range, None, config);
        for i in 1..=3 {
            e.apply_diff(&diff(i, i, vec![])).unwrap();
        }
        assert_eq!(e.buffered(), 2);
        assert_eq!(e.take_evicted(), 1);
        assert_eq!(e.take_evicted(), 0);
    }

    #[test]
    fn test_wrong_instrument_rejected() {
        let mut e = engine();
        let mut d = diff(1, 1, vec![]);
        d.key.symbol = "ETH-USDT".to_string();
        assert!(matches!(e.apply_diff(&d), Err(BookError::WrongInstrument { .. })));
        assert!(matches!(
            e.apply_diff(&diff(5, 4, vec![])),
            Err(BookError::InvertedRange { .. })
        ));
    }

    #[test]
    fn test_snapshot_view_is_read_only() {
        let mut e = engine();
        assert!(e.snapshot_view(10).is_none());
        e.apply_snapshot(&snapshot(10)).unwrap();
        let view = e.snapshot_view(1).unwrap();
        assert_eq!(view.bids.len(), 1);
        assert_eq!(view.bids[0].price.0, dec!(100));
        assert_eq!(view.sequence, 10);
        assert_eq!(e.depth(), (2, 1));
        assert_eq!(e.snapshot_view(1).unwrap().bids, view.bids);
    }
}
