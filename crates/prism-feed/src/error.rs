//! Feed error types.

use prism_core::{DataType, Exchange, MarketType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    /// Frame is well-formed but its discriminator is not mapped.
    #[error("Unknown event type from {exchange}: {event}")]
    UnknownEventType { exchange: Exchange, event: String },

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Negative quantity in {field}: {value}")]
    NegativeQuantity { field: &'static str, value: String },

    /// Valid JSON whose shape does not match the endpoint contract.
    #[error("Schema mismatch: {0}")]
    Schema(String),

    #[error("{exchange} does not provide {data_type} for {market_type}")]
    Unsupported {
        exchange: Exchange,
        market_type: MarketType,
        data_type: DataType,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FeedError {
    /// Short label used for drop metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            FeedError::UnknownEventType { .. } => "unknown_event_type",
            FeedError::Malformed(_) | FeedError::Json(_) => "malformed",
            FeedError::NegativeQuantity { .. } => "negative_quantity",
            FeedError::Schema(_) => "schema",
            FeedError::Unsupported { .. } => "unsupported",
        }
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
