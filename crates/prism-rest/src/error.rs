//! Poller error types.

use prism_feed::FeedError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    /// HTTP 429.
    #[error("Rate limited")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Empty body or not JSON.
    #[error("Parse failure: {0}")]
    ParseFailure(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<PollError> },

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl PollError {
    /// 429, 5xx and transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            PollError::Transport(_) | PollError::Timeout | PollError::RateLimited => true,
            PollError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Label for poll outcome metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            PollError::Transport(_) => "transport",
            PollError::Timeout => "timeout",
            PollError::RateLimited => "rate_limited",
            PollError::Status { .. } => "http_status",
            PollError::ParseFailure(_) => "parse_failure",
            PollError::SchemaMismatch(_) => "schema_mismatch",
            PollError::Unsupported(_) => "unsupported",
            PollError::RetriesExhausted { .. } => "retries_exhausted",
            PollError::Client(_) => "client",
        }
    }
}

impl From<FeedError> for PollError {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::Unsupported { .. } => PollError::Unsupported(e.to_string()),
            other => PollError::SchemaMismatch(other.to_string()),
        }
    }
}

pub type PollResult<T> = Result<T, PollError>;
