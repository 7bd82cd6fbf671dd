//! Error taxonomy for the regime engine.
//!
//! Per-asset errors are recovered by the orchestrator (skip-and-log). Errors
//! raised while computing a shared model update reject the whole asset class
//! update for that day. Nothing here is retried.

use chrono::NaiveDate;
use thiserror::Error;

use crate::data::AssetClass;

#[derive(Error, Debug)]
pub enum RegimeError {
    #[error("Insufficient history for {asset} on {date}: need {required} bars, have {available}")]
    InsufficientHistory {
        asset: String,
        date: NaiveDate,
        required: usize,
        available: usize,
    },

    #[error("Degenerate model for {asset_class}: {reason}")]
    DegenerateModel {
        asset_class: AssetClass,
        reason: String,
    },

    #[error("Numerical instability in {context}: {detail}")]
    NumericalInstability { context: String, detail: String },

    #[error("Changepoint overflow for {asset}: {detail}")]
    ChangepointOverflow { asset: String, detail: String },

    #[error("Out of order day {date}: last committed day is {last_committed}")]
    OutOfOrderDay {
        date: NaiveDate,
        last_committed: NaiveDate,
    },

    #[error("Lookahead violation for {asset} on {date}: input dated {observed}")]
    LookaheadViolation {
        asset: String,
        date: NaiveDate,
        observed: NaiveDate,
    },

    #[error("Duplicate record for {asset} on {date}")]
    DuplicateRecord { asset: String, date: NaiveDate },

    #[error("Version conflict for {asset_class}: expected v{expected}, got v{found}")]
    VersionConflict {
        asset_class: AssetClass,
        expected: u32,
        found: u32,
    },

    #[error("No active model for asset class {0}")]
    UnknownAssetClass(AssetClass),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type RegimeResult<T> = Result<T, RegimeError>;

impl RegimeError {
    /// Whether the error only affects one asset's day and can be skipped.
    pub fn is_asset_local(&self) -> bool {
        matches!(
            self,
            Self::InsufficientHistory { .. }
                | Self::NumericalInstability { .. }
                | Self::ChangepointOverflow { .. }
                | Self::LookaheadViolation { .. }
        )
    }

    /// Short machine-readable kind, used in day reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsufficientHistory { .. } => "insufficient_history",
            Self::DegenerateModel { .. } => "degenerate_model",
            Self::NumericalInstability { .. } => "numerical_instability",
            Self::ChangepointOverflow { .. } => "changepoint_overflow",
            Self::OutOfOrderDay { .. } => "out_of_order_day",
            Self::LookaheadViolation { .. } => "lookahead_violation",
            Self::DuplicateRecord { .. } => "duplicate_record",
            Self::VersionConflict { .. } => "version_conflict",
            Self::UnknownAssetClass(_) => "unknown_asset_class",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Toml(_) => "toml",
        }
    }

    pub(crate) fn numerical(context: &str, detail: impl Into<String>) -> Self {
        Self::NumericalInstability {
            context: context.to_string(),
            detail: detail.into(),
        }
    }
}

/// Fail with `NumericalInstability` if any value is NaN or infinite.
pub(crate) fn ensure_finite(context: &str, values: &[f64]) -> RegimeResult<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(idx) => Err(RegimeError::numerical(
            context,
            format!("non-finite value {} at index {}", values[idx], idx),
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_local_classification() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let err = RegimeError::InsufficientHistory {
            asset: "SPY".to_string(),
            date,
            required: 60,
            available: 10,
        };
        assert!(err.is_asset_local());
        assert_eq!(err.kind(), "insufficient_history");

        let err = RegimeError::DegenerateModel {
            asset_class: AssetClass::Equity,
            reason: "scale".to_string(),
        };
        assert!(!err.is_asset_local());
    }

    #[test]
    fn test_ensure_finite() {
        assert!(ensure_finite("probs", &[0.2, 0.8]).is_ok());
        let err = ensure_finite("probs", &[0.2, f64::NAN]).unwrap_err();
        assert!(matches!(err, RegimeError::NumericalInstability { .. }));
    }
}
