//! WebSocket connection manager.
//!
//! Handles the connection lifecycle for one exchange endpoint: bounded
//! handshake, subscription, heartbeat, and automatic reconnection with
//! exponential backoff. Every successful handshake starts a new numbered
//! session, announced downstream before any of its frames.

use crate::error::{WsError, WsResult};
use crate::heartbeat::{HeartbeatAction, HeartbeatManager};
use crate::ws_write_handle::{WsOutbound, WsWriteHandle};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use prism_core::{now_ms, HeartbeatPolicy, RetryPolicy};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Stable identifier used in logs, metrics and `WsEvent`s.
    pub connection_id: String,
    /// WebSocket URL.
    pub url: String,
    /// Maximum consecutive failed reconnects (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Bound on TCP + TLS + WebSocket upgrade.
    pub handshake_timeout_ms: u64,
    pub heartbeat: HeartbeatPolicy,
    /// Sent in order after every handshake.
    pub subscribe_messages: Vec<String>,
    /// Pause between subscription messages.
    pub subscribe_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_id: String::new(),
            url: String::new(),
            max_reconnect_attempts: 0, // Infinite
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 60000,
            handshake_timeout_ms: 10000,
            heartbeat: HeartbeatPolicy::ServerPing {
                idle_timeout_ms: 60000,
            },
            subscribe_messages: Vec::new(),
            subscribe_interval_ms: 100,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// One inbound text frame.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub connection: Arc<str>,
    pub session: u64,
    pub text: String,
    /// Epoch milliseconds.
    pub received_at: i64,
}

/// Events delivered downstream, in transport order.
#[derive(Debug, Clone)]
pub enum WsEvent {
    /// A new session is live; state derived from earlier sessions is void.
    Connected { connection: Arc<str>, session: u64 },
    Frame(RawFrame),
    /// The session ended and a reconnect will follow unless shutting down.
    Disconnected {
        connection: Arc<str>,
        session: u64,
        reason: String,
    },
}

/// A connected, subscribed transport returned by `connect`.
pub struct WsSession {
    id: u64,
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl WsSession {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// WebSocket connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    connection_id: Arc<str>,
    state: Arc<RwLock<ConnectionState>>,
    heartbeat: Arc<HeartbeatManager>,
    event_tx: mpsc::Sender<WsEvent>,
    sessions: AtomicU64,
    /// Outbound message sender (for WsWriteHandle).
    outbound_tx: mpsc::Sender<WsOutbound>,
    /// Outbound message receiver (consumed by message loop).
    outbound_rx: Arc<TokioMutex<mpsc::Receiver<WsOutbound>>>,
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    /// Create a new connection manager.
    ///
    /// `shutdown` is the process-wide token; the manager stops when it is
    /// cancelled or when `shutdown()` is called.
    pub fn new(
        config: ConnectionConfig,
        event_tx: mpsc::Sender<WsEvent>,
        shutdown: &CancellationToken,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(100);
        Self {
            connection_id: Arc::from(config.connection_id.as_str()),
            heartbeat: Arc::new(HeartbeatManager::new(config.heartbeat.clone())),
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            event_tx,
            sessions: AtomicU64::new(0),
            outbound_tx,
            outbound_rx: Arc::new(TokioMutex::new(outbound_rx)),
            shutdown_token: shutdown.child_token(),
        }
    }

    /// Get a write handle for sending messages.
    pub fn write_handle(&self) -> WsWriteHandle {
        WsWriteHandle::new(
            self.connection_id.clone(),
            self.outbound_tx.clone(),
            self.state.clone(),
        )
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Signal graceful shutdown.
    pub fn shutdown(&self) {
        info!(connection = %self.connection_id, "ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Establish the transport and send every subscription message.
    ///
    /// Fails with `WsError::ConnectTimeout` if the handshake does not
    /// complete within `handshake_timeout_ms`.
    pub async fn connect(&self) -> WsResult<WsSession> {
        *self.state.write() = ConnectionState::Connecting;
        info!(connection = %self.connection_id, url = %self.config.url, "Connecting to WebSocket");

        let handshake = Duration::from_millis(self.config.handshake_timeout_ms);
        let (ws_stream, _response) = match tokio::time::timeout(
            handshake,
            connect_async_tls_with_config(&self.config.url, None, true, None),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(WsError::ConnectTimeout {
                    url: self.config.url.clone(),
                    timeout_ms: self.config.handshake_timeout_ms,
                })
            }
        };
        let (mut write, read) = ws_stream.split();

        self.send_subscriptions(&mut write).await?;

        // In-flight writes belong to the previous session.
        let mut outbound_rx = self.outbound_rx.lock().await;
        while outbound_rx.try_recv().is_ok() {}
        drop(outbound_rx);

        let id = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.write() = ConnectionState::Connected;
        self.heartbeat.reset();
        info!(connection = %self.connection_id, session = id, "WebSocket connected");

        Ok(WsSession { id, write, read })
    }

    /// Run until shutdown: connect, pump frames, reconnect with backoff.
    ///
    /// Returns an error only when `max_reconnect_attempts` is non-zero and
    /// exhausted, or when the downstream receiver is gone.
    pub async fn run(&self) -> WsResult<()> {
        let backoff = RetryPolicy::new(
            self.config.max_reconnect_attempts,
            self.config.reconnect_base_delay_ms,
            self.config.reconnect_max_delay_ms,
        );
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                info!(connection = %self.connection_id, "Shutdown requested, exiting connect loop");
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            let connected = tokio::select! {
                result = self.connect() => Some(result),
                () = self.shutdown_token.cancelled() => None,
            };

            let failure = match connected {
                None => continue,
                Some(Ok(session)) => {
                    attempt = 0;
                    let session_id = session.id();
                    self.emit(WsEvent::Connected {
                        connection: self.connection_id.clone(),
                        session: session_id,
                    })
                    .await?;

                    let result = self.run_session(session).await;
                    let reason = match &result {
                        Ok(()) => "stream ended".to_string(),
                        Err(e) => e.to_string(),
                    };
                    if self.is_shutdown() {
                        *self.state.write() = ConnectionState::Disconnected;
                        return Ok(());
                    }
                    self.emit(WsEvent::Disconnected {
                        connection: self.connection_id.clone(),
                        session: session_id,
                        reason,
                    })
                    .await?;
                    result.err()
                }
                Some(Err(e)) => Some(e),
            };

            match &failure {
                Some(e) => error!(connection = %self.connection_id, error = %e, "WebSocket connection error"),
                None => info!(connection = %self.connection_id, "WebSocket connection closed"),
            }

            attempt += 1;
            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(connection = %self.connection_id, attempt, "Max reconnection attempts reached");
                *self.state.write() = ConnectionState::Disconnected;
                return Err(WsError::ConnectionFailed(
                    "Max reconnection attempts reached".to_string(),
                ));
            }

            *self.state.write() = ConnectionState::Reconnecting;
            let delay = backoff.delay_for(attempt);
            warn!(
                connection = %self.connection_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!(connection = %self.connection_id, "Shutdown requested during backoff, exiting");
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }
            }
        }
    }

    /// Message loop for one session.
    pub async fn run_session(&self, session: WsSession) -> WsResult<()> {
        let WsSession {
            id,
            mut write,
            mut read,
        } = session;

        loop {
            let outbound_recv = async { self.outbound_rx.lock().await.recv().await };

            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!(connection = %self.connection_id, "Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.heartbeat.record_message();
                            if self.heartbeat.is_pong_text(&text) {
                                self.heartbeat.record_pong();
                                continue;
                            }
                            self.emit(WsEvent::Frame(RawFrame {
                                connection: self.connection_id.clone(),
                                session: id,
                                text,
                                received_at: now_ms(),
                            }))
                            .await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Binary(data))) => {
                            self.heartbeat.record_message();
                            debug!(len = data.len(), "Ignoring binary frame");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(connection = %self.connection_id, code, %reason, "WebSocket closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            error!(connection = %self.connection_id, ?e, "WebSocket read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!(connection = %self.connection_id, "WebSocket stream ended");
                            return Ok(());
                        }
                    }
                }

                outbound = outbound_recv => {
                    if let Some(WsOutbound::Text(text)) = outbound {
                        write.send(Message::Text(text)).await?;
                    }
                }

                _ = self.heartbeat.wait_for_check() => {
                    match self.heartbeat.check() {
                        HeartbeatAction::Idle => {}
                        HeartbeatAction::SendText(ping) => {
                            write
                                .send(Message::Text(ping))
                                .await
                                .map_err(|e| WsError::SendFailed(format!("heartbeat: {e}")))?;
                            self.heartbeat.record_ping();
                            debug!(connection = %self.connection_id, "Sent heartbeat ping");
                        }
                        HeartbeatAction::SendFrame => {
                            write
                                .send(Message::Ping(Vec::new()))
                                .await
                                .map_err(|e| WsError::SendFailed(format!("heartbeat: {e}")))?;
                            self.heartbeat.record_ping();
                        }
                        HeartbeatAction::TimedOut { silent_ms } => {
                            error!(connection = %self.connection_id, silent_ms, "Heartbeat timeout");
                            return Err(WsError::HeartbeatTimeout { silent_ms });
                        }
                    }
                }
            }
        }
    }

    async fn send_subscriptions(&self, write: &mut SplitSink<WsStream, Message>) -> WsResult<()> {
        let total = self.config.subscribe_messages.len();
        for (i, payload) in self.config.subscribe_messages.iter().enumerate() {
            write.send(Message::Text(payload.clone())).await?;
            if i + 1 < total && self.config.subscribe_interval_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.subscribe_interval_ms)).await;
            }
        }
        info!(connection = %self.connection_id, count = total, "Subscriptions sent");
        Ok(())
    }

    async fn emit(&self, event: WsEvent) -> WsResult<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| WsError::NotReady("event receiver dropped".to_string()))
    }
}
