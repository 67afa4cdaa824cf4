//! REST side of the collector.
//!
//! - [`RestClient`]: GET with timeout and retry (429, 5xx, transport)
//! - [`Poller`]: funding, open interest, long/short ratios, volatility index
//! - [`SnapshotClient`]: depth snapshots for REST-snapshot venues
//! - [`PollScheduler`]: one interval task per polled stream

pub mod client;
pub mod config;
pub mod error;
pub mod poller;
pub mod scheduler;

pub use client::RestClient;
pub use config::{RestConfig, RestEndpoints};
pub use error::{PollError, PollResult};
pub use poller::{Poller, SnapshotClient};
pub use scheduler::PollScheduler;
