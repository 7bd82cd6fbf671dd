//! Feature construction from daily bars and macro covariates.
//!
//! Point-in-time: every input must be dated on or before the feature date.
//! Normalization is against trailing windows of the asset's own history:
//! - `return_z`: today's log return over the prior long-window volatility
//! - `volatility_z`: z-score of log short-window volatility against its own
//!   trailing distribution
//! - `momentum_z`: momentum-window log return over `sigma_long * sqrt(window)`
//! - `drawdown_z`: drawdown from the trailing peak over the same scale
//! - covariates: z-score against the trailing macro history

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use statrs::statistics::Statistics;

use crate::data::{AssetClass, MacroSnapshot, OhlcvBar};
use crate::error::{ensure_finite, RegimeError, RegimeResult};

/// Number of dimensions in the emission observation.
pub const OBS_DIM: usize = 3;

/// Observation dimension indices.
pub mod obs_idx {
    pub const MOMENTUM: usize = 0;
    pub const VOLATILITY: usize = 1;
    pub const RETURN: usize = 2;
}

const MIN_SIGMA: f64 = 1e-8;
const MIN_LOG_VOL_DISPERSION: f64 = 0.05;
const MIN_COVARIATE_DISPERSION: f64 = 1e-9;

/// Covariate names per asset class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CovariateSets {
    pub crypto: Vec<String>,
    pub equity: Vec<String>,
    pub fx: Vec<String>,
}

impl CovariateSets {
    pub fn for_class(&self, class: AssetClass) -> &[String] {
        match class {
            AssetClass::Crypto => &self.crypto,
            AssetClass::Equity => &self.equity,
            AssetClass::Fx => &self.fx,
        }
    }
}

impl Default for CovariateSets {
    fn default() -> Self {
        let names = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect();
        Self {
            crypto: names(&["liquidity", "dollar_index"]),
            equity: names(&["liquidity", "credit_spread"]),
            fx: names(&["rate_differential", "dollar_index"]),
        }
    }
}

/// Feature builder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Window for short realized volatility (returns).
    pub short_vol_window: usize,
    /// Normalization window (returns).
    pub long_window: usize,
    /// Momentum window (returns).
    pub momentum_window: usize,
    /// Trailing peak window for drawdown (bars).
    pub drawdown_window: usize,
    /// Minimum number of bars before a feature vector is produced.
    pub min_history: usize,
    /// Macro snapshots used for covariate normalization.
    pub macro_lookback: usize,
    /// Absolute bound applied to every normalized field.
    pub observation_clip: f64,
    pub covariates: CovariateSets,
    pub asset_class_overrides: HashMap<String, AssetClass>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            short_vol_window: 10,
            long_window: 60,
            momentum_window: 20,
            drawdown_window: 120,
            min_history: 80,
            macro_lookback: 60,
            observation_clip: 8.0,
            covariates: CovariateSets::default(),
            asset_class_overrides: HashMap::new(),
        }
    }
}

impl FeatureConfig {
    /// Bars structurally needed by the normalization windows.
    pub fn required_bars(&self) -> usize {
        (self.long_window + self.short_vol_window + 1)
            .max(self.momentum_window + 1)
            .max(self.long_window + 2)
    }

    /// Bars fetched from the feed per build.
    pub fn lookback(&self) -> usize {
        self.min_history.max(self.drawdown_window).max(self.required_bars())
    }

    pub fn validate(&self) -> RegimeResult<()> {
        if self.short_vol_window < 2 || self.long_window < 2 || self.momentum_window < 1 {
            return Err(RegimeError::InvalidConfig(
                "feature windows must be at least 2 (momentum at least 1)".to_string(),
            ));
        }
        if self.min_history < self.required_bars() {
            return Err(RegimeError::InvalidConfig(format!(
                "min_history {} below structural requirement {}",
                self.min_history,
                self.required_bars()
            )));
        }
        if !(self.observation_clip.is_finite() && self.observation_clip > 0.0) {
            return Err(RegimeError::InvalidConfig(
                "observation_clip must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Unnormalized features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFeatures {
    pub log_return: f64,
    pub realized_vol_short: f64,
    pub realized_vol_long: f64,
    /// Fractional drawdown from the trailing peak (<= 0).
    pub drawdown: f64,
    /// Sum of log returns over the momentum window.
    pub momentum: f64,
    /// Covariates present in the latest macro snapshot.
    pub covariates: BTreeMap<String, f64>,
}

/// Z-scored features, clipped to the configured bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFeatures {
    pub return_z: f64,
    pub volatility_z: f64,
    pub momentum_z: f64,
    pub drawdown_z: f64,
    /// In the order of the asset class covariate set; 0 when unavailable.
    pub covariates: Vec<f64>,
}

/// Per-asset, per-day feature vector. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub asset_id: String,
    pub asset_class: AssetClass,
    pub date: NaiveDate,
    /// Starts at 1; bumped by the feature store when upstream data is corrected.
    pub version: u32,
    pub raw: RawFeatures,
    pub normalized: NormalizedFeatures,
}

impl FeatureVector {
    /// Emission observation: `[momentum_z, volatility_z, return_z]`.
    pub fn observation(&self) -> [f64; OBS_DIM] {
        let mut obs = [0.0; OBS_DIM];
        obs[obs_idx::MOMENTUM] = self.normalized.momentum_z;
        obs[obs_idx::VOLATILITY] = self.normalized.volatility_z;
        obs[obs_idx::RETURN] = self.normalized.return_z;
        obs
    }

    /// Normalized covariates driving the transition model.
    pub fn covariates(&self) -> &[f64] {
        &self.normalized.covariates
    }

    /// SHA-256 over the content, excluding the version number.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.asset_id.as_bytes());
        hasher.update(self.asset_class.as_str().as_bytes());
        hasher.update(self.date.to_string().as_bytes());
        // Struct fields serialize in declaration order and BTreeMap keys sorted.
        if let Ok(bytes) = serde_json::to_vec(&(&self.raw, &self.normalized)) {
            hasher.update(&bytes);
        }
        hex::encode(hasher.finalize())
    }

    /// Identity used in record lineage: content hash plus version.
    pub fn fingerprint(&self) -> String {
        format!("{}:v{}", self.content_hash(), self.version)
    }
}

/// Builds feature vectors from point-in-time inputs.
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    config: FeatureConfig,
}

impl FeatureBuilder {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn classify(&self, asset_id: &str) -> AssetClass {
        AssetClass::classify_with(asset_id, &self.config.asset_class_overrides)
    }

    /// Build the feature vector for `asset_id` on `date`.
    ///
    /// `bars` are oldest first and must end on `date`. `macro_history` holds
    /// snapshots available on or before `date`, oldest first.
    pub fn build(
        &self,
        asset_id: &str,
        date: NaiveDate,
        bars: &[OhlcvBar],
        macro_history: &[MacroSnapshot],
    ) -> RegimeResult<FeatureVector> {
        let lookahead = |observed: NaiveDate| RegimeError::LookaheadViolation {
            asset: asset_id.to_string(),
            date,
            observed,
        };
        if let Some(bar) = bars.iter().find(|b| b.date > date) {
            return Err(lookahead(bar.date));
        }
        if let Some(snapshot) = macro_history.iter().find(|s| s.as_of > date) {
            return Err(lookahead(snapshot.as_of));
        }

        let insufficient = |available: usize| RegimeError::InsufficientHistory {
            asset: asset_id.to_string(),
            date,
            required: self.config.min_history,
            available,
        };
        match bars.last() {
            Some(last) if last.date == date => {}
            _ => return Err(insufficient(0)),
        }
        if bars.len() < self.config.min_history {
            return Err(insufficient(bars.len()));
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close_f64()).collect();
        if let Some(bad) = closes.iter().find(|c| !(c.is_finite() && **c > 0.0)) {
            return Err(RegimeError::numerical(
                "features.close",
                format!("{} close {} is not a positive price", asset_id, bad),
            ));
        }

        let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
        let n = returns.len();
        let cfg = &self.config;
        let asset_class = self.classify(asset_id);

        let log_return = returns[n - 1];
        let realized_vol_short = sample_std(&returns[n - cfg.short_vol_window..]);
        let realized_vol_long = sample_std(&returns[n - cfg.long_window..]);
        let sigma_prior = sample_std(&returns[n - 1 - cfg.long_window..n - 1]).max(MIN_SIGMA);

        // Trailing distribution of log short-window volatility, excluding today.
        let log_vol_at = |end: usize| {
            sample_std(&returns[end + 1 - cfg.short_vol_window..=end])
                .max(MIN_SIGMA)
                .ln()
        };
        let history: Vec<f64> = (n - 1 - cfg.long_window..n - 1).map(log_vol_at).collect();
        let log_vol_mean = history.iter().mean();
        let log_vol_sd = history.iter().std_dev().max(MIN_LOG_VOL_DISPERSION);
        let volatility_z = (realized_vol_short.max(MIN_SIGMA).ln() - log_vol_mean) / log_vol_sd;

        let momentum: f64 = returns[n - cfg.momentum_window..].iter().sum();
        let trend_scale = sigma_prior * (cfg.momentum_window as f64).sqrt();
        let momentum_z = momentum / trend_scale;

        let peak_window = &closes[closes.len().saturating_sub(cfg.drawdown_window)..];
        let peak = peak_window.iter().copied().fold(f64::MIN, f64::max);
        let drawdown = closes[closes.len() - 1] / peak - 1.0;
        let drawdown_z = drawdown / trend_scale;

        let (raw_covariates, covariate_z) = self.covariates(asset_class, macro_history);

        let clip = cfg.observation_clip;
        let normalized = NormalizedFeatures {
            return_z: (log_return / sigma_prior).clamp(-clip, clip),
            volatility_z: volatility_z.clamp(-clip, clip),
            momentum_z: momentum_z.clamp(-clip, clip),
            drawdown_z: drawdown_z.clamp(-clip, clip),
            covariates: covariate_z.iter().map(|z| z.clamp(-clip, clip)).collect(),
        };

        let raw = RawFeatures {
            log_return,
            realized_vol_short,
            realized_vol_long,
            drawdown,
            momentum,
            covariates: raw_covariates,
        };

        ensure_finite(
            "features.raw",
            &[log_return, realized_vol_short, realized_vol_long, drawdown, momentum],
        )?;
        ensure_finite(
            "features.normalized",
            &[
                normalized.return_z,
                normalized.volatility_z,
                normalized.momentum_z,
                normalized.drawdown_z,
            ],
        )?;
        ensure_finite("features.covariates", &normalized.covariates)?;

        Ok(FeatureVector {
            asset_id: asset_id.to_string(),
            asset_class,
            date,
            version: 1,
            raw,
            normalized,
        })
    }

    /// Raw values from the latest snapshot and z-scores against the lookback.
    fn covariates(
        &self,
        class: AssetClass,
        macro_history: &[MacroSnapshot],
    ) -> (BTreeMap<String, f64>, Vec<f64>) {
        let window = &macro_history[macro_history.len().saturating_sub(self.config.macro_lookback)..];
        let latest = window.last();
        let mut raw = BTreeMap::new();
        let mut z = Vec::new();

        for name in self.config.covariates.for_class(class) {
            let current = latest.and_then(|s| s.get(name)).filter(|v| v.is_finite());
            let Some(current) = current else {
                z.push(0.0);
                continue;
            };
            raw.insert(name.clone(), current);

            let series: Vec<f64> = window
                .iter()
                .filter_map(|s| s.get(name))
                .filter(|v| v.is_finite())
                .collect();
            if series.len() < 2 {
                z.push(0.0);
                continue;
            }
            let sd = series.iter().std_dev();
            if !(sd > MIN_COVARIATE_DISPERSION) {
                z.push(0.0);
                continue;
            }
            z.push((current - series.iter().mean()) / sd);
        }

        (raw, z)
    }
}

/// Sample standard deviation, 0 for fewer than two values.
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().std_dev()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Segment, SyntheticPath};
    use approx::assert_abs_diff_eq;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
    }

    fn path(days: usize, drift: f64, vol: f64) -> Vec<OhlcvBar> {
        SyntheticPath::new("SPY", start(), 11)
            .segment(Segment::new(days, drift, vol))
            .bars()
    }

    fn builder() -> FeatureBuilder {
        FeatureBuilder::new(FeatureConfig::default())
    }

    #[test]
    fn test_insufficient_history() {
        let bars = path(40, 0.0, 0.01);
        let date = bars.last().unwrap().date;
        let err = builder().build("SPY", date, &bars, &[]).unwrap_err();
        match err {
            RegimeError::InsufficientHistory {
                required,
                available,
                ..
            } => {
                assert_eq!(required, 80);
                assert_eq!(available, 40);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_future_bar() {
        let bars = path(100, 0.0, 0.01);
        let date = bars[90].date;
        let err = builder().build("SPY", date, &bars, &[]).unwrap_err();
        assert!(matches!(err, RegimeError::LookaheadViolation { .. }));
    }

    #[test]
    fn test_rejects_future_macro_snapshot() {
        let bars = path(100, 0.0, 0.01);
        let date = bars.last().unwrap().date;
        let future = MacroSnapshot::new(date + chrono::Duration::days(1)).with_value("liquidity", 1.0);
        let err = builder().build("SPY", date, &bars, &[future]).unwrap_err();
        assert!(matches!(err, RegimeError::LookaheadViolation { .. }));
    }

    #[test]
    fn test_uptrend_has_positive_momentum() {
        let bars = path(150, 0.004, 0.004);
        let date = bars.last().unwrap().date;
        let fv = builder().build("SPY", date, &bars, &[]).unwrap();

        assert_eq!(fv.asset_class, AssetClass::Equity);
        assert_eq!(fv.version, 1);
        assert!(fv.normalized.momentum_z > 2.0, "momentum_z = {}", fv.normalized.momentum_z);
        assert!(fv.raw.drawdown <= 0.0);
        assert!(fv.normalized.volatility_z.abs() < 4.0);
        // No macro data: covariates neutral.
        assert_eq!(fv.covariates(), &[0.0, 0.0]);
    }

    #[test]
    fn test_shock_spikes_volatility_and_return() {
        let bars = SyntheticPath::new("SPY", start(), 5)
            .segment(Segment::new(120, 0.001, 0.005))
            .segment(Segment::new(1, 0.0, 0.005).with_shock(-0.06))
            .bars();
        let date = bars.last().unwrap().date;
        let fv = builder().build("SPY", date, &bars, &[]).unwrap();

        assert!(fv.normalized.return_z < -5.0, "return_z = {}", fv.normalized.return_z);
        assert!(fv.normalized.volatility_z > 2.0, "volatility_z = {}", fv.normalized.volatility_z);
    }

    #[test]
    fn test_covariate_zscore() {
        let bars = path(100, 0.0, 0.01);
        let date = bars.last().unwrap().date;
        let macro_history: Vec<MacroSnapshot> = (0..20)
            .map(|i| {
                let v = if i == 19 { 3.0 } else if i % 2 == 0 { 1.0 } else { -1.0 };
                MacroSnapshot::new(date - chrono::Duration::days(19 - i))
                    .with_value("liquidity", v)
                    .with_value("credit_spread", 0.5)
            })
            .collect();

        let fv = builder().build("SPY", date, &bars, &macro_history).unwrap();
        assert_eq!(fv.raw.covariates.get("liquidity"), Some(&3.0));
        assert!(fv.covariates()[0] > 2.0);
        // Constant covariate has no dispersion.
        assert_abs_diff_eq!(fv.covariates()[1], 0.0);
    }

    #[test]
    fn test_fingerprint_is_stable_and_versioned() {
        let bars = path(100, 0.001, 0.01);
        let date = bars.last().unwrap().date;
        let a = builder().build("SPY", date, &bars, &[]).unwrap();
        let b = builder().build("SPY", date, &bars, &[]).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = b.clone();
        c.version = 2;
        assert_eq!(a.content_hash(), c.content_hash());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_config_validation() {
        let mut config = FeatureConfig::default();
        assert!(config.validate().is_ok());
        config.min_history = 30;
        assert!(config.validate().is_err());
    }
}
