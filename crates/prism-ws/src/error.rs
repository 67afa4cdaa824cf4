//! WebSocket error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake with {url} did not complete within {timeout_ms}ms")]
    ConnectTimeout { url: String, timeout_ms: u64 },

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Heartbeat timeout after {silent_ms}ms")]
    HeartbeatTimeout { silent_ms: u64 },

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

impl WsError {
    /// Short label used for reconnect metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            WsError::ConnectionFailed(_) | WsError::Tungstenite(_) => "error",
            WsError::ConnectTimeout { .. } => "handshake",
            WsError::ConnectionClosed { .. } => "closed",
            WsError::SendFailed(_) | WsError::NotReady(_) => "send",
            WsError::HeartbeatTimeout { .. } => "heartbeat",
        }
    }
}

pub type WsResult<T> = Result<T, WsError>;
