//! Multi-exchange market-data collector.
//!
//! Orchestrates all components:
//! - WebSocket connections per venue market
//! - Normalization and routing of stream frames
//! - Order-book synchronization with snapshot recovery
//! - REST polling of funding, open interest, long/short ratios and DVOL
//! - Publishing to NATS JetStream

pub mod app;
pub mod config;
pub mod context;
pub mod error;
pub mod resync;
pub mod router;
pub mod server;

pub use app::{Application, Pipeline};
pub use config::AppConfig;
pub use context::PipelineContext;
pub use error::{AppError, AppResult};
