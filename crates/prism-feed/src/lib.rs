//! Exchange adapters and normalization for the prism pipeline.
//!
//! Converts venue-specific WebSocket frames and REST bodies into
//! `NormalizedEvent`s:
//! - `adapter`: The `ExchangeAdapter` interface and `adapter_for`
//! - `binance`, `okx`, `deribit`: Per-venue wire formats
//! - `normalizer`: Frame parsing with outcome counters
//! - `symbol`: Native/canonical symbol conversion

pub mod adapter;
pub mod binance;
pub mod deribit;
pub mod error;
pub mod fields;
pub mod normalizer;
pub mod okx;
pub mod symbol;

pub use adapter::{adapter_for, unwrap_combined, ExchangeAdapter, RestRequest};
pub use error::{FeedError, FeedResult};
pub use normalizer::{NormalizeStats, Normalizer};
pub use symbol::{base_asset, to_canonical, to_native};
