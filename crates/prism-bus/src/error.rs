//! Bus error types.

use prism_core::CoreError;
use thiserror::Error;

/// Failure of a single publish against the bus.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Stream setup failed: {0}")]
    Stream(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Publish ack timed out after {0}ms")]
    AckTimeout(u64),
}

impl SinkError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Publish(_) | SinkError::AckTimeout(_))
    }
}

pub type SinkResult<T> = Result<T, SinkError>;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid subject: {0}")]
    Subject(#[from] CoreError),

    #[error("Publish failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: SinkError },

    #[error("Publish rejected: {0}")]
    Rejected(SinkError),
}

pub type BusResult<T> = Result<T, PublishError>;
