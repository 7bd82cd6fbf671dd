//! Core input types for the regime engine.
//!
//! These mirror what the ingestion collaborator hands over: one daily OHLCV bar
//! per asset, a point-in-time macro covariate snapshot per day, and optional
//! externally supplied risk signals per asset.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// ISO codes accepted as either leg of a six-letter fx pair.
const FX_CURRENCIES: &[&str] = &[
    "USD", "EUR", "JPY", "GBP", "CHF", "AUD", "NZD", "CAD", "SEK", "NOK", "DKK", "SGD", "HKD",
    "CNH", "MXN", "ZAR", "TRY", "PLN", "INR", "KRW", "BRL",
];

/// Asset class. Selects the covariate set and the shared regime model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Crypto,
    Equity,
    Fx,
}

impl AssetClass {
    pub const ALL: [AssetClass; 3] = [Self::Crypto, Self::Equity, Self::Fx];

    /// Classify an asset identifier.
    ///
    /// - Crypto: `-USD`, `USDT`, `USDC` or `-PERP` suffix (e.g. "BTC-USD", "ETHUSDT")
    /// - Fx: "EUR/USD" or a six-letter pair of known currency codes ("EURUSD")
    /// - Equity: everything else
    pub fn classify(asset_id: &str) -> Self {
        let id = asset_id.trim().to_uppercase();

        if id.ends_with("-USD")
            || id.ends_with("USDT")
            || id.ends_with("USDC")
            || id.ends_with("-PERP")
        {
            return Self::Crypto;
        }

        if let Some((base, quote)) = id.split_once('/') {
            if base.len() == 3 && quote.len() == 3 {
                return Self::Fx;
            }
        }

        if id.len() == 6 && id.chars().all(|c| c.is_ascii_alphabetic()) {
            let (base, quote) = id.split_at(3);
            if FX_CURRENCIES.contains(&base) && FX_CURRENCIES.contains(&quote) {
                return Self::Fx;
            }
        }

        Self::Equity
    }

    /// Classify with an explicit override table taking precedence.
    pub fn classify_with(asset_id: &str, overrides: &HashMap<String, AssetClass>) -> Self {
        overrides
            .get(asset_id)
            .copied()
            .unwrap_or_else(|| Self::classify(asset_id))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crypto => "crypto",
            Self::Equity => "equity",
            Self::Fx => "fx",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Daily bar for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

impl OhlcvBar {
    /// Close price as f64 for statistics. Zero if not representable.
    pub fn close_f64(&self) -> f64 {
        self.close.try_into().unwrap_or(0.0)
    }
}

/// Macro covariates valid as of a given day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MacroSnapshot {
    /// Day the snapshot became available.
    pub as_of: NaiveDate,

    /// Covariate values keyed by name (e.g. "credit_spread", "liquidity").
    pub values: BTreeMap<String, f64>,
}

impl MacroSnapshot {
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, name: &str, value: f64) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// Externally supplied risk signals for one asset on one day
/// (e.g. "fragility" from a separate risk process).
pub type RiskSignals = BTreeMap<String, f64>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_asset_class_classification() {
        assert_eq!(AssetClass::classify("BTC-USD"), AssetClass::Crypto);
        assert_eq!(AssetClass::classify("ethusdt"), AssetClass::Crypto);
        assert_eq!(AssetClass::classify("SOL-PERP"), AssetClass::Crypto);
        assert_eq!(AssetClass::classify("EUR/USD"), AssetClass::Fx);
        assert_eq!(AssetClass::classify("USDJPY"), AssetClass::Fx);
        assert_eq!(AssetClass::classify("SPY"), AssetClass::Equity);
        // Six letters but not a currency pair.
        assert_eq!(AssetClass::classify("GOOGLE"), AssetClass::Equity);
    }

    #[test]
    fn test_asset_class_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert("GBTC".to_string(), AssetClass::Crypto);
        assert_eq!(AssetClass::classify_with("GBTC", &overrides), AssetClass::Crypto);
        assert_eq!(AssetClass::classify_with("QQQ", &overrides), AssetClass::Equity);
    }

    #[test]
    fn test_close_f64() {
        let bar = OhlcvBar {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: 1_000,
        };
        assert_eq!(bar.close_f64(), 100.5);
    }
}
