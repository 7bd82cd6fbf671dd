//! Versioned regime model per asset class.
//!
//! A model is never edited in place. The online-EM updater derives a
//! successor (version + 1) from the previous one; the registry publishes it
//! and marks the predecessor superseded.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::emission::EmissionModel;
use super::transition::{TransitionModel, TransitionParams};
use super::InvalidParams;
use crate::data::AssetClass;
use crate::error::{RegimeError, RegimeResult};
use crate::features::obs_idx;
use crate::learning::SufficientStatistics;
use crate::regime::RegimeLabel;

/// Prior degrees of freedom per asset class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DofPriors {
    pub crypto: f64,
    pub equity: f64,
    pub fx: f64,
}

impl Default for DofPriors {
    fn default() -> Self {
        Self {
            crypto: 4.0,
            equity: 5.0,
            fx: 6.0,
        }
    }
}

impl DofPriors {
    pub fn for_class(&self, class: AssetClass) -> f64 {
        match class {
            AssetClass::Crypto => self.crypto,
            AssetClass::Equity => self.equity,
            AssetClass::Fx => self.fx,
        }
    }
}

/// Model shape and parameter bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// 3 (Bull, Neutral, Bear) or 4 (adds Stress).
    pub state_count: usize,
    /// Prior probability of staying in the same state.
    pub stickiness: f64,
    pub dof: DofPriors,
    /// Smallest emission scale an update may produce.
    pub min_scale: f64,
    pub dof_min: f64,
    pub dof_max: f64,
    /// Absolute bound on transition covariates.
    pub covariate_clip: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            state_count: 4,
            stickiness: 0.95,
            dof: DofPriors::default(),
            min_scale: 0.05,
            dof_min: 2.5,
            dof_max: 60.0,
            covariate_clip: 5.0,
        }
    }
}

impl ModelConfig {
    pub fn bounds(&self) -> ParameterBounds {
        ParameterBounds {
            min_scale: self.min_scale,
            dof_min: self.dof_min,
            dof_max: self.dof_max,
        }
    }

    pub fn validate(&self) -> RegimeResult<()> {
        let invalid = |msg: String| Err(RegimeError::InvalidConfig(msg));
        if RegimeLabel::for_state_count(self.state_count).is_none() {
            return invalid(format!("state_count {} must be 3 or 4", self.state_count));
        }
        if !(self.stickiness > 0.0 && self.stickiness < 1.0) {
            return invalid(format!("stickiness {} outside (0, 1)", self.stickiness));
        }
        if !(self.dof_min > 2.0 && self.dof_min < self.dof_max && self.dof_max.is_finite()) {
            return invalid(format!(
                "dof bounds [{}, {}] must satisfy 2 < min < max",
                self.dof_min, self.dof_max
            ));
        }
        for class in AssetClass::ALL {
            let dof = self.dof.for_class(class);
            if !(dof >= self.dof_min && dof <= self.dof_max) {
                return invalid(format!(
                    "prior dof {} for {} outside [{}, {}]",
                    dof, class, self.dof_min, self.dof_max
                ));
            }
        }
        if !(self.min_scale.is_finite() && self.min_scale > 0.0) {
            return invalid(format!("min_scale {} must be positive", self.min_scale));
        }
        if !(self.covariate_clip.is_finite() && self.covariate_clip > 0.0) {
            return invalid(format!("covariate_clip {} must be positive", self.covariate_clip));
        }
        Ok(())
    }
}

/// Bounds every published parameter set must respect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterBounds {
    pub min_scale: f64,
    pub dof_min: f64,
    pub dof_max: f64,
}

/// Prior parameters the updater regularizes towards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrior {
    pub emission: EmissionModel,
    pub transition: TransitionParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeModel {
    /// `"{asset_class}-v{version}"`.
    pub model_id: String,
    pub asset_class: AssetClass,
    pub state_count: usize,
    pub emission: EmissionModel,
    pub transition: TransitionModel,
    pub prior: ModelPrior,
    pub bounds: ParameterBounds,
    pub statistics: SufficientStatistics,
    pub version: u32,
    /// Day of the last update folded in; `None` for the prior model.
    pub last_updated_at: Option<NaiveDate>,
    /// Version this model replaced.
    pub supersedes: Option<u32>,
}

impl RegimeModel {
    /// Version 1: prior parameters and statistics seeded from them.
    pub fn initial(
        asset_class: AssetClass,
        config: &ModelConfig,
        covariate_dim: usize,
    ) -> RegimeResult<Self> {
        let degenerate = |e: InvalidParams| RegimeError::DegenerateModel {
            asset_class,
            reason: e.0,
        };
        let emission =
            EmissionModel::prior(asset_class, config.state_count, config).map_err(degenerate)?;
        let transition_prior =
            TransitionParams::sticky(config.state_count, covariate_dim, config.stickiness)
                .map_err(degenerate)?;
        let transition = TransitionModel::new(transition_prior.clone(), config.covariate_clip)
            .map_err(degenerate)?;
        let statistics = SufficientStatistics::seeded(&emission, &transition)?;

        let model = Self {
            model_id: model_id(asset_class, 1),
            asset_class,
            state_count: config.state_count,
            prior: ModelPrior {
                emission: emission.clone(),
                transition: transition_prior,
            },
            emission,
            transition,
            bounds: config.bounds(),
            statistics,
            version: 1,
            last_updated_at: None,
            supersedes: None,
        };
        model.validate()?;
        Ok(model)
    }

    /// Label of latent state `state`.
    pub fn label(&self, state: usize) -> RegimeResult<RegimeLabel> {
        RegimeLabel::for_state_count(self.state_count)
            .and_then(|labels| labels.get(state).copied())
            .ok_or_else(|| self.degenerate(format!("no label for state {}", state)))
    }

    /// Derive version + 1 from new parameters. The result is validated.
    pub fn successor(
        &self,
        emission: EmissionModel,
        transition: TransitionModel,
        statistics: SufficientStatistics,
        date: NaiveDate,
    ) -> RegimeResult<Self> {
        let version = self.version + 1;
        let model = Self {
            model_id: model_id(self.asset_class, version),
            asset_class: self.asset_class,
            state_count: self.state_count,
            emission,
            transition,
            prior: self.prior.clone(),
            bounds: self.bounds,
            statistics,
            version,
            last_updated_at: Some(date),
            supersedes: Some(self.version),
        };
        model.validate()?;
        Ok(model)
    }

    /// Structural checks plus label identifiability:
    /// - trend location strictly decreasing across Bull, Neutral, Bear
    /// - Stress, when present, has the highest volatility location
    pub fn validate(&self) -> RegimeResult<()> {
        if RegimeLabel::for_state_count(self.state_count).is_none() {
            return Err(self.degenerate(format!("unsupported state count {}", self.state_count)));
        }
        if self.emission.state_count() != self.state_count
            || self.transition.state_count() != self.state_count
            || self.statistics.states.len() != self.state_count
        {
            return Err(self.degenerate("state count mismatch between components".to_string()));
        }

        for (i, state) in self.emission.states().iter().enumerate() {
            if let Some(s) = state.scale().iter().find(|s| **s < self.bounds.min_scale) {
                return Err(self.degenerate(format!(
                    "state {} scale {:.4} below floor {}",
                    i, s, self.bounds.min_scale
                )));
            }
            let dof = state.dof();
            if dof < self.bounds.dof_min - 1e-9 || dof > self.bounds.dof_max + 1e-9 {
                return Err(self.degenerate(format!("state {} dof {:.3} out of bounds", i, dof)));
            }
        }

        let loc = |state: usize, dim: usize| self.emission.states()[state].location()[dim];
        for i in 0..2 {
            if loc(i, obs_idx::MOMENTUM) <= loc(i + 1, obs_idx::MOMENTUM) {
                return Err(self.degenerate(format!(
                    "trend ordering broken between states {} and {}",
                    i,
                    i + 1
                )));
            }
        }
        if self.state_count == 4 {
            let stress = loc(3, obs_idx::VOLATILITY);
            if (0..3).any(|i| loc(i, obs_idx::VOLATILITY) >= stress) {
                return Err(self.degenerate(
                    "stress state no longer has the highest volatility".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn degenerate(&self, reason: String) -> RegimeError {
        RegimeError::DegenerateModel {
            asset_class: self.asset_class,
            reason,
        }
    }
}

fn model_id(class: AssetClass, version: u32) -> String {
    format!("{}-v{}", class, version)
}
