//! Symbol conversion between venue-native and canonical `BASE-QUOTE` forms.

use prism_core::{Exchange, MarketType};

/// Quote assets recognised when splitting concatenated Binance symbols.
/// Longer suffixes come first so `FDUSD` wins over `USD`-like tails.
const BINANCE_QUOTES: &[&str] = &[
    "FDUSD", "USDT", "USDC", "BUSD", "TUSD", "BTC", "ETH", "BNB", "EUR", "TRY", "BRL",
];

const DERIBIT_PERPETUAL: &str = "-PERPETUAL";
const OKX_SWAP: &str = "-SWAP";

/// Venue-native symbol to canonical `BASE-QUOTE`.
///
/// Unknown shapes are returned unchanged (upper-cased) rather than dropped.
pub fn to_canonical(exchange: Exchange, native: &str) -> String {
    let native = native.to_ascii_uppercase();
    match exchange {
        Exchange::BinanceSpot | Exchange::BinanceDerivatives => BINANCE_QUOTES
            .iter()
            .find_map(|quote| {
                native
                    .strip_suffix(quote)
                    .filter(|base| !base.is_empty())
                    .map(|base| format!("{base}-{quote}"))
            })
            .unwrap_or(native),
        Exchange::OkxSpot | Exchange::OkxDerivatives => native
            .strip_suffix(OKX_SWAP)
            .map(str::to_string)
            .unwrap_or(native),
        Exchange::DeribitDerivatives => match native.strip_suffix(DERIBIT_PERPETUAL) {
            // BTC-PERPETUAL is the inverse USD contract; ETH_USDC-PERPETUAL is linear.
            Some(base) => match base.split_once('_') {
                Some((base, quote)) => format!("{base}-{quote}"),
                None => format!("{base}-USD"),
            },
            None => native,
        },
    }
}

/// Canonical `BASE-QUOTE` to the venue-native instrument name.
pub fn to_native(exchange: Exchange, market_type: MarketType, canonical: &str) -> String {
    let canonical = canonical.to_ascii_uppercase();
    match exchange {
        Exchange::BinanceSpot | Exchange::BinanceDerivatives => canonical.replace('-', ""),
        Exchange::OkxSpot => canonical,
        Exchange::OkxDerivatives => format!("{canonical}{OKX_SWAP}"),
        Exchange::DeribitDerivatives => match market_type {
            MarketType::Options => base_asset(&canonical).to_string(),
            _ => match canonical.split_once('-') {
                Some((base, "USD")) => format!("{base}{DERIBIT_PERPETUAL}"),
                Some((base, quote)) => format!("{base}_{quote}{DERIBIT_PERPETUAL}"),
                None => canonical,
            },
        },
    }
}

/// Base asset of a canonical symbol (`BTC-USDT` -> `BTC`).
pub fn base_asset(canonical: &str) -> &str {
    canonical.split('-').next().unwrap_or(canonical)
}
