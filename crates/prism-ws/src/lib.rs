//! WebSocket connection manager for exchange market-data feeds.
//!
//! Provides robust WebSocket connectivity with:
//! - Handshake bounded by a timeout
//! - Automatic reconnection with exponential backoff and jitter
//! - Exchange-specific heartbeat policies (server ping, client text ping, ping frames)
//! - Session numbering so downstream books can resync after every reconnect
//! - Channel-based frame delivery and a reconnect-safe write handle

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod ws_write_handle;

pub use connection::{
    ConnectionConfig, ConnectionManager, ConnectionState, RawFrame, WsEvent, WsSession,
};
pub use error::{WsError, WsResult};
pub use heartbeat::HeartbeatManager;
pub use ws_write_handle::{WsOutbound, WsWriteHandle};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any TLS connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
