//! Heartbeat management for WebSocket connections.
//!
//! Tracks inbound activity and outstanding pings for one session and
//! decides, according to the venue's `HeartbeatPolicy`, when a ping is due
//! and when silence has become a transport fault.

use parking_lot::RwLock;
use prism_core::HeartbeatPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// What the message loop should do after a heartbeat check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing to do.
    Idle,
    /// Send this text ping.
    SendText(String),
    /// Send a protocol ping frame.
    SendFrame,
    /// Session is dead; silent for this long.
    TimedOut { silent_ms: u64 },
}

/// Heartbeat manager for one WebSocket session.
pub struct HeartbeatManager {
    policy: HeartbeatPolicy,
    /// Last ping sent time.
    last_ping: Arc<RwLock<Option<Instant>>>,
    /// Last message received time (any frame).
    last_message: Arc<RwLock<Instant>>,
    /// Whether we're waiting for a reply to our ping.
    waiting_for_pong: Arc<RwLock<bool>>,
}

impl HeartbeatManager {
    pub fn new(policy: HeartbeatPolicy) -> Self {
        Self {
            policy,
            last_ping: Arc::new(RwLock::new(None)),
            last_message: Arc::new(RwLock::new(Instant::now())),
            waiting_for_pong: Arc::new(RwLock::new(false)),
        }
    }

    pub fn policy(&self) -> &HeartbeatPolicy {
        &self.policy
    }

    /// Reset heartbeat state (called on connection).
    pub fn reset(&self) {
        *self.last_ping.write() = None;
        *self.last_message.write() = Instant::now();
        *self.waiting_for_pong.write() = false;
    }

    /// Record that a ping was sent.
    pub fn record_ping(&self) {
        *self.last_ping.write() = Some(Instant::now());
        *self.waiting_for_pong.write() = true;
    }

    /// Record that a pong was received.
    pub fn record_pong(&self) {
        self.record_message();
        if let Some(ping_time) = *self.last_ping.read() {
            debug!(rtt_ms = ping_time.elapsed().as_millis() as u64, "Received pong");
        }
    }

    /// Record that any message was received. Any inbound traffic proves
    /// liveness, so it also settles an outstanding ping.
    pub fn record_message(&self) {
        *self.last_message.write() = Instant::now();
        *self.waiting_for_pong.write() = false;
    }

    /// True when `text` is the venue's literal pong reply.
    pub fn is_pong_text(&self, text: &str) -> bool {
        match &self.policy {
            HeartbeatPolicy::ClientText {
                pong: Some(pong), ..
            } => text == pong,
            _ => false,
        }
    }

    pub fn time_since_last_message(&self) -> Duration {
        self.last_message.read().elapsed()
    }

    /// Check if our ping went unanswered for longer than the reply window.
    pub fn is_timed_out(&self) -> bool {
        if !*self.waiting_for_pong.read() {
            return false;
        }
        match *self.last_ping.read() {
            Some(ping_time) => {
                ping_time.elapsed() > Duration::from_millis(self.policy.timeout_ms())
            }
            None => false,
        }
    }

    /// Check if a ping is due.
    pub fn should_send_heartbeat(&self) -> bool {
        if *self.waiting_for_pong.read() {
            return false;
        }
        self.time_since_last_message() >= Duration::from_millis(self.policy.interval_ms())
    }

    /// Evaluate the policy against the current timers.
    pub fn check(&self) -> HeartbeatAction {
        let silent_ms = self.time_since_last_message().as_millis() as u64;
        match &self.policy {
            HeartbeatPolicy::ServerPing { idle_timeout_ms } => {
                if silent_ms > *idle_timeout_ms {
                    HeartbeatAction::TimedOut { silent_ms }
                } else {
                    HeartbeatAction::Idle
                }
            }
            HeartbeatPolicy::ClientText { ping, .. } => {
                if self.is_timed_out() {
                    HeartbeatAction::TimedOut { silent_ms }
                } else if self.should_send_heartbeat() {
                    HeartbeatAction::SendText(ping.clone())
                } else {
                    HeartbeatAction::Idle
                }
            }
            HeartbeatPolicy::ClientFrame { .. } => {
                if self.is_timed_out() {
                    HeartbeatAction::TimedOut { silent_ms }
                } else if self.should_send_heartbeat() {
                    HeartbeatAction::SendFrame
                } else {
                    HeartbeatAction::Idle
                }
            }
        }
    }

    /// Wait for the next heartbeat check.
    pub async fn wait_for_check(&self) {
        let period = (self.policy.interval_ms() / 2).max(10);
        tokio::time::sleep(Duration::from_millis(period)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_policy(interval_ms: u64, timeout_ms: u64) -> HeartbeatPolicy {
        HeartbeatPolicy::ClientText {
            interval_ms,
            timeout_ms,
            ping: "ping".to_string(),
            pong: Some("pong".to_string()),
        }
    }

    #[test]
    fn test_heartbeat_initial_state() {
        let hb = HeartbeatManager::new(text_policy(25_000, 5_000));
        assert!(!hb.is_timed_out());
        assert_eq!(hb.check(), HeartbeatAction::Idle);
    }

    #[test]
    fn test_message_settles_outstanding_ping() {
        let hb = HeartbeatManager::new(text_policy(25_000, 5_000));

        hb.record_ping();
        assert!(*hb.waiting_for_pong.read());

        hb.record_message();
        assert!(!*hb.waiting_for_pong.read());
    }

    #[test]
    fn test_pong_text_only_for_text_policy() {
        let hb = HeartbeatManager::new(text_policy(25_000, 5_000));
        assert!(hb.is_pong_text("pong"));
        assert!(!hb.is_pong_text("{\"event\":\"pong\"}"));

        let hb = HeartbeatManager::new(HeartbeatPolicy::ServerPing {
            idle_timeout_ms: 1_000,
        });
        assert!(!hb.is_pong_text("pong"));
    }

    #[tokio::test]
    async fn test_text_ping_due_then_timeout() {
        let hb = HeartbeatManager::new(text_policy(20, 20));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(hb.check(), HeartbeatAction::SendText("ping".to_string()));

        hb.record_ping();
        assert_eq!(hb.check(), HeartbeatAction::Idle);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(matches!(hb.check(), HeartbeatAction::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_server_ping_idle_timeout() {
        let hb = HeartbeatManager::new(HeartbeatPolicy::ServerPing { idle_timeout_ms: 20 });
        assert_eq!(hb.check(), HeartbeatAction::Idle);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(matches!(hb.check(), HeartbeatAction::TimedOut { .. }));

        hb.record_message();
        assert_eq!(hb.check(), HeartbeatAction::Idle);
    }
}
