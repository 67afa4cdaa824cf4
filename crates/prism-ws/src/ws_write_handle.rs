//! WebSocket write handle for sending messages.
//!
//! Used to (re)subscribe channels on a live session, e.g. to request a
//! fresh order-book snapshot from venues that push snapshots on subscribe.

use crate::connection::ConnectionState;
use crate::error::{WsError, WsResult};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Outbound message to be sent via WebSocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsOutbound {
    /// Plain text message (subscribe, unsubscribe).
    Text(String),
}

/// Write handle for sending messages to WebSocket.
///
/// Channel-based and reconnect-safe: messages queued while a session is
/// being replaced are discarded when the next session starts.
#[derive(Clone)]
pub struct WsWriteHandle {
    connection_id: Arc<str>,
    tx: mpsc::Sender<WsOutbound>,
    state: Arc<RwLock<ConnectionState>>,
}

impl WsWriteHandle {
    pub fn new(
        connection_id: Arc<str>,
        tx: mpsc::Sender<WsOutbound>,
        state: Arc<RwLock<ConnectionState>>,
    ) -> Self {
        Self {
            connection_id,
            tx,
            state,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Queue a raw text message.
    ///
    /// # Errors
    ///
    /// - `WsError::NotReady`: Connection is not connected
    /// - `WsError::SendFailed`: Connection manager has stopped
    pub async fn send_text(&self, text: String) -> WsResult<()> {
        if !self.is_connected() {
            return Err(WsError::NotReady(format!(
                "connection {} is not connected",
                self.connection_id
            )));
        }

        self.tx
            .send(WsOutbound::Text(text))
            .await
            .map_err(|_| WsError::SendFailed("outbound channel closed".to_string()))?;

        debug!(connection = %self.connection_id, "Outbound text queued");
        Ok(())
    }

    /// Check if connected and the outbound channel is open.
    pub fn is_connected(&self) -> bool {
        let state = *self.state.read();
        state == ConnectionState::Connected && !self.tx.is_closed()
    }
}
