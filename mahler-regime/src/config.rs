//! Engine configuration.
//!
//! Engineering constants default sensibly. The confirmation threshold
//! `hysteresis.k`, the changepoint `hazard_rate` and every override threshold
//! have no default and must be provided.
//!
//! ```toml
//! [changepoint]
//! hazard_rate = 0.004
//!
//! [hysteresis]
//! k = 3
//!
//! [[overrides]]
//! name = "fragility"
//! label = "STRESS"
//! condition = { type = "signal_above", signal = "fragility", threshold = 0.8 }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::changepoint::ChangepointConfig;
use crate::error::RegimeResult;
use crate::features::FeatureConfig;
use crate::inference::InferenceConfig;
use crate::learning::OnlineEmConfig;
use crate::model::ModelConfig;
use crate::regime::{HysteresisConfig, OverrideTable};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub online_em: OnlineEmConfig,
    pub changepoint: ChangepointConfig,
    pub hysteresis: HysteresisConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub overrides: OverrideTable,
}

impl EngineConfig {
    /// Defaults for everything except the required governance constants.
    pub fn new(hazard_rate: f64, k: usize) -> Self {
        Self {
            features: FeatureConfig::default(),
            model: ModelConfig::default(),
            online_em: OnlineEmConfig::default(),
            changepoint: ChangepointConfig::new(hazard_rate),
            hysteresis: HysteresisConfig { k },
            inference: InferenceConfig::default(),
            overrides: OverrideTable::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: OverrideTable) -> Self {
        self.overrides = overrides;
        self
    }

    /// Parse and validate.
    pub fn from_toml_str(s: &str) -> RegimeResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> RegimeResult<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> RegimeResult<()> {
        self.features.validate()?;
        self.model.validate()?;
        self.online_em.validate()?;
        self.changepoint.validate()?;
        self.hysteresis.validate()?;
        self.inference.validate()?;
        self.overrides.validate(self.model.state_count)
    }
}
