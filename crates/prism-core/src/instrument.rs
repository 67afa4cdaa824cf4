//! Instrument identification.
//!
//! The exchange and market type form a closed enumeration; every adapter,
//! connection and book is selected from it at construction time.

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exchange endpoint grouping.
///
/// Spot and derivatives live on separate endpoints for every venue, so they
/// are modelled as distinct exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exchange {
    BinanceSpot,
    BinanceDerivatives,
    OkxSpot,
    OkxDerivatives,
    DeribitDerivatives,
}

impl Exchange {
    pub const ALL: [Exchange; 5] = [
        Exchange::BinanceSpot,
        Exchange::BinanceDerivatives,
        Exchange::OkxSpot,
        Exchange::OkxDerivatives,
        Exchange::DeribitDerivatives,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::BinanceSpot => "binance_spot",
            Exchange::BinanceDerivatives => "binance_derivatives",
            Exchange::OkxSpot => "okx_spot",
            Exchange::OkxDerivatives => "okx_derivatives",
            Exchange::DeribitDerivatives => "deribit_derivatives",
        }
    }

    /// Market types listed on this endpoint.
    pub fn market_types(&self) -> &'static [MarketType] {
        match self {
            Exchange::BinanceSpot | Exchange::OkxSpot => &[MarketType::Spot],
            Exchange::BinanceDerivatives | Exchange::OkxDerivatives => &[MarketType::Perpetual],
            Exchange::DeribitDerivatives => &[MarketType::Perpetual, MarketType::Options],
        }
    }

    pub fn supports(&self, market_type: MarketType) -> bool {
        self.market_types().contains(&market_type)
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Exchange::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| CoreError::InvalidInstrument(format!("unknown exchange: {s}")))
    }
}

/// Market type of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    Spot,
    Perpetual,
    Options,
}

impl MarketType {
    pub const ALL: [MarketType; 3] = [MarketType::Spot, MarketType::Perpetual, MarketType::Options];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Spot => "spot",
            MarketType::Perpetual => "perpetual",
            MarketType::Options => "options",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The eight canonical data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Orderbook,
    Trade,
    FundingRate,
    OpenInterest,
    Liquidation,
    VolatilityIndex,
    LsrTopPosition,
    LsrAllAccount,
}

impl DataType {
    pub const ALL: [DataType; 8] = [
        DataType::Orderbook,
        DataType::Trade,
        DataType::FundingRate,
        DataType::OpenInterest,
        DataType::Liquidation,
        DataType::VolatilityIndex,
        DataType::LsrTopPosition,
        DataType::LsrAllAccount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Orderbook => "orderbook",
            DataType::Trade => "trade",
            DataType::FundingRate => "funding_rate",
            DataType::OpenInterest => "open_interest",
            DataType::Liquidation => "liquidation",
            DataType::VolatilityIndex => "volatility_index",
            DataType::LsrTopPosition => "lsr_top_position",
            DataType::LsrAllAccount => "lsr_all_account",
        }
    }

    /// Whether this type is fetched by REST polling rather than streamed.
    pub fn is_polled(&self) -> bool {
        matches!(
            self,
            DataType::FundingRate
                | DataType::OpenInterest
                | DataType::VolatilityIndex
                | DataType::LsrTopPosition
                | DataType::LsrAllAccount
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identity of one order book or data stream.
///
/// Display format: `{exchange}.{market_type}.{symbol}`
/// (e.g., "okx_derivatives.perpetual.BTC-USDT").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstrumentKey {
    pub exchange: Exchange,
    pub market_type: MarketType,
    /// Canonical `BASE-QUOTE` symbol.
    pub symbol: String,
}

impl InstrumentKey {
    pub fn new(exchange: Exchange, market_type: MarketType, symbol: impl Into<String>) -> Self {
        Self {
            exchange,
            market_type,
            symbol: symbol.into(),
        }
    }

    /// Build a key, rejecting exchange/market pairs that do not exist.
    pub fn checked(
        exchange: Exchange,
        market_type: MarketType,
        symbol: impl Into<String>,
    ) -> Result<Self> {
        if !exchange.supports(market_type) {
            return Err(CoreError::UnsupportedMarket {
                exchange: exchange.to_string(),
                market_type: market_type.to_string(),
            });
        }
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(CoreError::InvalidInstrument("empty symbol".to_string()));
        }
        Ok(Self::new(exchange, market_type, symbol))
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.exchange, self.market_type, self.symbol)
    }
}
