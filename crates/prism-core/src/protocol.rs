//! Per-venue protocol descriptors.
//!
//! Exchange adapters describe their transport and sequencing conventions
//! with these values; the connection manager and book engine interpret them.

use serde::{Deserialize, Serialize};

/// How liveness of a WebSocket session is maintained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeartbeatPolicy {
    /// Server sends protocol pings; we answer with pongs. Silence longer than
    /// `idle_timeout_ms` is a transport fault.
    ServerPing { idle_timeout_ms: u64 },
    /// We send a text ping every `interval_ms` of inbound silence and expect
    /// any inbound message within `timeout_ms`. `pong` is the literal reply
    /// text to swallow, when the venue uses one.
    ClientText {
        interval_ms: u64,
        timeout_ms: u64,
        ping: String,
        pong: Option<String>,
    },
    /// We send protocol-level ping frames.
    ClientFrame { interval_ms: u64, timeout_ms: u64 },
}

impl HeartbeatPolicy {
    /// How long the session may stay silent before a check is due.
    pub fn interval_ms(&self) -> u64 {
        match self {
            HeartbeatPolicy::ServerPing { idle_timeout_ms } => *idle_timeout_ms,
            HeartbeatPolicy::ClientText { interval_ms, .. }
            | HeartbeatPolicy::ClientFrame { interval_ms, .. } => *interval_ms,
        }
    }

    /// Reply window after a ping was sent. Zero when we never send pings.
    pub fn timeout_ms(&self) -> u64 {
        match self {
            HeartbeatPolicy::ServerPing { .. } => 0,
            HeartbeatPolicy::ClientText { timeout_ms, .. }
            | HeartbeatPolicy::ClientFrame { timeout_ms, .. } => *timeout_ms,
        }
    }
}

/// Where a fresh order-book snapshot comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotSource {
    /// Fetched from a REST depth endpoint.
    Rest,
    /// Pushed over the stream after (re)subscribing the book channel.
    Stream,
}

/// Exchange-specific contiguity rule between consecutive diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceRule {
    /// `first <= last_update_id + 1 <= last`.
    Range,
    /// First diff after a snapshot must cover `last_update_id`
    /// (`first <= last_update_id <= last`); afterwards
    /// `prev == last_update_id`.
    BridgedPrevious,
    /// `prev == last_update_id` exactly, for every diff.
    Previous,
}

/// Book checksum verification, when the venue provides one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumRule {
    /// CRC32 over `bidPx:bidSz:askPx:askSz:...` of the top 25 levels,
    /// compared as a signed 32-bit integer.
    Crc32Top25,
}

impl ChecksumRule {
    pub fn depth(&self) -> usize {
        match self {
            ChecksumRule::Crc32Top25 => 25,
        }
    }
}
