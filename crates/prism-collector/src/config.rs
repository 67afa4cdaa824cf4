//! Application configuration.
//!
//! Loaded from a TOML file. Every section except `feeds` has defaults, so a
//! minimal file only declares what to subscribe to.

use crate::error::{AppError, AppResult};
use prism_book::BookConfig;
use prism_bus::{PublisherConfig, StreamSettings};
use prism_core::{DataType, Exchange, InstrumentKey, MarketType};
use prism_feed::adapter_for;
use prism_rest::RestConfig;
use prism_ws::ConnectionConfig;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

/// One subscription: a venue market, its symbols and the data types wanted.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub exchange: Exchange,
    pub market_type: MarketType,
    /// Canonical `BASE-QUOTE` symbols.
    pub symbols: Vec<String>,
    pub data_types: Vec<DataType>,
    /// Overrides the venue's public WebSocket endpoint.
    #[serde(default)]
    pub ws_url: Option<String>,
}

impl FeedConfig {
    /// Identifier of this feed's connection in logs and metrics.
    pub fn connection_id(&self) -> String {
        format!("{}.{}", self.exchange, self.market_type)
    }

    pub fn keys(&self) -> Vec<InstrumentKey> {
        self.symbols
            .iter()
            .map(|symbol| InstrumentKey::new(self.exchange, self.market_type, symbol.as_str()))
            .collect()
    }

    pub fn wants(&self, data_type: DataType) -> bool {
        self.data_types.contains(&data_type)
    }

    /// Data types delivered over the WebSocket.
    pub fn streamed(&self) -> Vec<DataType> {
        self.data_types
            .iter()
            .copied()
            .filter(|dt| !dt.is_polled())
            .collect()
    }

    pub fn polled(&self) -> Vec<DataType> {
        self.data_types
            .iter()
            .copied()
            .filter(DataType::is_polled)
            .collect()
    }

    pub fn ws_url(&self) -> String {
        self.ws_url
            .clone()
            .unwrap_or_else(|| default_ws_url(self.exchange).to_string())
    }
}

/// Public market-data endpoint of each venue.
pub fn default_ws_url(exchange: Exchange) -> &'static str {
    match exchange {
        Exchange::BinanceSpot => "wss://stream.binance.com:9443/ws",
        Exchange::BinanceDerivatives => "wss://fstream.binance.com/ws",
        Exchange::OkxSpot | Exchange::OkxDerivatives => "wss://ws.okx.com:8443/ws/v5/public",
        Exchange::DeribitDerivatives => "wss://www.deribit.com/ws/api/v2",
    }
}

/// WebSocket configuration shared by every feed.
#[derive(Debug, Clone, Deserialize)]
pub struct WsConfig {
    /// Maximum consecutive failed reconnects (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_subscribe_interval_ms")]
    pub subscribe_interval_ms: u64,
    /// Capacity of the channel from each connection to its router.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_subscribe_interval_ms() -> u64 {
    100
}

fn default_event_queue_capacity() -> usize {
    10_000
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            subscribe_interval_ms: default_subscribe_interval_ms(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl From<&WsConfig> for ConnectionConfig {
    fn from(cfg: &WsConfig) -> Self {
        Self {
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            reconnect_base_delay_ms: cfg.reconnect_base_delay_ms,
            reconnect_max_delay_ms: cfg.reconnect_max_delay_ms,
            handshake_timeout_ms: cfg.handshake_timeout_ms,
            subscribe_interval_ms: cfg.subscribe_interval_ms,
            // Set per feed
            ..ConnectionConfig::default()
        }
    }
}

/// Poll interval per data type.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_funding_rate_ms")]
    pub funding_rate_ms: u64,
    #[serde(default = "default_open_interest_ms")]
    pub open_interest_ms: u64,
    #[serde(default = "default_lsr_ms")]
    pub lsr_ms: u64,
    #[serde(default = "default_volatility_index_ms")]
    pub volatility_index_ms: u64,
}

fn default_funding_rate_ms() -> u64 {
    60_000
}

fn default_open_interest_ms() -> u64 {
    60_000
}

fn default_lsr_ms() -> u64 {
    300_000
}

fn default_volatility_index_ms() -> u64 {
    60_000
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            funding_rate_ms: default_funding_rate_ms(),
            open_interest_ms: default_open_interest_ms(),
            lsr_ms: default_lsr_ms(),
            volatility_index_ms: default_volatility_index_ms(),
        }
    }
}

impl PollingConfig {
    pub fn interval_for(&self, data_type: DataType) -> Option<Duration> {
        let ms = match data_type {
            DataType::FundingRate => self.funding_rate_ms,
            DataType::OpenInterest => self.open_interest_ms,
            DataType::LsrTopPosition | DataType::LsrAllAccount => self.lsr_ms,
            DataType::VolatilityIndex => self.volatility_index_ms,
            DataType::Orderbook | DataType::Trade | DataType::Liquidation => return None,
        };
        Some(Duration::from_millis(ms))
    }
}

/// Snapshot recovery.
#[derive(Debug, Clone, Deserialize)]
pub struct ResyncConfig {
    /// Levels requested from REST depth endpoints.
    #[serde(default = "default_fetch_depth")]
    pub fetch_depth: u32,
    #[serde(default = "default_resync_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_fetch_depth() -> u32 {
    1_000
}

fn default_resync_queue_capacity() -> usize {
    1_024
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            fetch_depth: default_fetch_depth(),
            queue_capacity: default_resync_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_nats_url")]
    pub url: String,
    #[serde(default)]
    pub streams: StreamSettings,
    #[serde(default)]
    pub publisher: PublisherConfig,
}

fn default_nats_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: default_nats_url(),
            streams: StreamSettings::default(),
            publisher: PublisherConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    /// `host:port` for `/metrics` and `/health`. Disabled when unset.
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub feeds: Vec<FeedConfig>,
    #[serde(default)]
    pub websocket: WsConfig,
    #[serde(default)]
    pub rest: RestConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub book: BookConfig,
    #[serde(default)]
    pub resync: ResyncConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Time tasks get to finish after shutdown is signalled.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse and validate.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.feeds.is_empty() {
            return Err(AppError::Config("no feeds configured".to_string()));
        }

        let mut seen = HashSet::new();
        for feed in &self.feeds {
            let id = feed.connection_id();
            if !seen.insert((feed.exchange, feed.market_type)) {
                return Err(AppError::Config(format!("feed {id} declared twice")));
            }

            let adapter = adapter_for(feed.exchange, feed.market_type)
                .map_err(|e| AppError::Config(format!("feed {id}: {e}")))?;

            if feed.symbols.is_empty() {
                return Err(AppError::Config(format!("feed {id}: no symbols")));
            }
            for symbol in &feed.symbols {
                InstrumentKey::checked(feed.exchange, feed.market_type, symbol.as_str())
                    .map_err(|e| AppError::Config(format!("feed {id}: {e}")))?;
            }

            if feed.data_types.is_empty() {
                return Err(AppError::Config(format!("feed {id}: no data types")));
            }
            for data_type in &feed.data_types {
                if !adapter.supports(*data_type) {
                    return Err(AppError::Config(format!(
                        "feed {id}: {data_type} is not available"
                    )));
                }
            }
        }

        let capacities = [
            ("websocket.event_queue_capacity", self.websocket.event_queue_capacity),
            ("book.queue_capacity", self.book.queue_capacity),
            ("book.snapshot_depth", self.book.snapshot_depth),
            ("resync.queue_capacity", self.resync.queue_capacity),
            ("bus.publisher.queue_capacity", self.bus.publisher.queue_capacity),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(AppError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[feeds]]
        exchange = "binance_derivatives"
        market_type = "perpetual"
        symbols = ["BTC-USDT", "ETH-USDT"]
        data_types = ["orderbook", "trade", "funding_rate", "lsr_top_position"]
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.feeds.len(), 1);
        assert_eq!(config.shutdown_grace_ms, 5_000);
        assert_eq!(config.bus.url, "nats://127.0.0.1:4222");
        assert!(config.telemetry.metrics_addr.is_none());

        let feed = &config.feeds[0];
        assert_eq!(feed.connection_id(), "binance_derivatives.perpetual");
        assert_eq!(feed.ws_url(), "wss://fstream.binance.com/ws");
        assert_eq!(feed.streamed(), vec![DataType::Orderbook, DataType::Trade]);
        assert_eq!(
            feed.polled(),
            vec![DataType::FundingRate, DataType::LsrTopPosition]
        );
        assert_eq!(
            config.polling.interval_for(DataType::LsrTopPosition),
            Some(Duration::from_millis(300_000))
        );
    }

    #[test]
    fn test_rejects_invalid_market_pair() {
        let toml = r#"
            [[feeds]]
            exchange = "okx_spot"
            market_type = "perpetual"
            symbols = ["BTC-USDT"]
            data_types = ["trade"]
        "#;
        assert!(matches!(AppConfig::from_toml(toml), Err(AppError::Config(_))));
    }

    #[test]
    fn test_rejects_unavailable_data_type() {
        let toml = r#"
            [[feeds]]
            exchange = "binance_spot"
            market_type = "spot"
            symbols = ["BTC-USDT"]
            data_types = ["funding_rate"]
        "#;
        let err = AppConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("funding_rate"));
    }

    #[test]
    fn test_rejects_empty_symbol_and_zero_capacity() {
        let toml = r#"
            [[feeds]]
            exchange = "binance_spot"
            market_type = "spot"
            symbols = [" "]
            data_types = ["trade"]
        "#;
        assert!(AppConfig::from_toml(toml).is_err());

        let toml = format!("{MINIMAL}\n[book]\nqueue_capacity = 0\n");
        let err = AppConfig::from_toml(&toml).unwrap_err();
        assert!(err.to_string().contains("book.queue_capacity"));
    }

    #[test]
    fn test_rejects_duplicate_feed() {
        let toml = format!("{MINIMAL}\n{MINIMAL}");
        assert!(AppConfig::from_toml(&toml).is_err());
    }
}
