//! REST client configuration.

use prism_core::{Exchange, RetryPolicy};
use serde::Deserialize;

/// Base URLs per venue.
#[derive(Debug, Clone, Deserialize)]
pub struct RestEndpoints {
    #[serde(default = "default_binance_spot")]
    pub binance_spot: String,
    #[serde(default = "default_binance_derivatives")]
    pub binance_derivatives: String,
    #[serde(default = "default_okx")]
    pub okx: String,
    #[serde(default = "default_deribit")]
    pub deribit: String,
}

fn default_binance_spot() -> String {
    "https://api.binance.com".to_string()
}

fn default_binance_derivatives() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_okx() -> String {
    "https://www.okx.com".to_string()
}

fn default_deribit() -> String {
    "https://www.deribit.com".to_string()
}

impl Default for RestEndpoints {
    fn default() -> Self {
        Self {
            binance_spot: default_binance_spot(),
            binance_derivatives: default_binance_derivatives(),
            okx: default_okx(),
            deribit: default_deribit(),
        }
    }
}

impl RestEndpoints {
    /// Every endpoint pointed at one host. Used against local test servers.
    pub fn uniform(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            binance_spot: base_url.clone(),
            binance_derivatives: base_url.clone(),
            okx: base_url.clone(),
            deribit: base_url,
        }
    }

    pub fn base_url(&self, exchange: Exchange) -> &str {
        match exchange {
            Exchange::BinanceSpot => &self.binance_spot,
            Exchange::BinanceDerivatives => &self.binance_derivatives,
            Exchange::OkxSpot | Exchange::OkxDerivatives => &self.okx,
            Exchange::DeribitDerivatives => &self.deribit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry")]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub endpoints: RestEndpoints,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_retry() -> RetryPolicy {
    RetryPolicy::new(3, 500, 5_000)
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry: default_retry(),
            endpoints: RestEndpoints::default(),
        }
    }
}
