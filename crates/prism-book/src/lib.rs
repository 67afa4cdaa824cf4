//! Order-book synchronization for prism.
//!
//! Keeps one local book per instrument consistent with the venue's
//! sequenced diff stream:
//! - `OrderBookEngine`: Snapshot/diff state machine with per-venue
//!   contiguity rules and checksum verification
//! - `ResyncBudget`: Sliding-window failure budget that marks a book STALE
//! - `BookWorker`/`BookRegistry`: Single-writer task per instrument

pub mod budget;
pub mod checksum;
pub mod engine;
pub mod error;
pub mod worker;

pub use budget::{ResyncBudget, ResyncBudgetConfig};
pub use engine::{
    DiffOutcome, EngineConfig, OrderBookEngine, ResyncReason, SnapshotOutcome, SyncStatus,
};
pub use error::{BookError, BookResult};
pub use worker::{BookCommand, BookConfig, BookRegistry, BookSender, BookWorker, ResyncRequest};
