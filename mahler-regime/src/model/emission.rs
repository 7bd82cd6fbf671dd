//! Student-t emission densities.
//!
//! Each latent state carries a location and scale per observation dimension
//! and one degrees-of-freedom parameter. The density is the product of the
//! per-dimension Student-t marginals, so a single extreme coordinate costs
//! `O(log z)` in log-likelihood instead of the Gaussian `O(z^2)`.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use super::regime_model::ModelConfig;
use super::InvalidParams;
use crate::data::AssetClass;
use crate::features::OBS_DIM;

/// Prior `(location, scale)` per state, dimensions `[momentum, volatility, return]`.
const PRIOR_SHAPES: [([f64; OBS_DIM], [f64; OBS_DIM]); 4] = [
    // Bull
    ([1.5, -0.3, 0.2], [1.0, 1.0, 1.0]),
    // Neutral
    ([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]),
    // Bear
    ([-1.5, 0.4, -0.2], [1.0, 1.0, 1.2]),
    // Stress
    ([-2.5, 2.5, -1.0], [1.5, 1.2, 2.5]),
];

/// Validated emission parameters for one state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EmissionParamsRepr")]
pub struct EmissionParams {
    location: [f64; OBS_DIM],
    scale: [f64; OBS_DIM],
    dof: f64,
}

#[derive(Deserialize)]
struct EmissionParamsRepr {
    location: [f64; OBS_DIM],
    scale: [f64; OBS_DIM],
    dof: f64,
}

impl TryFrom<EmissionParamsRepr> for EmissionParams {
    type Error = InvalidParams;

    fn try_from(repr: EmissionParamsRepr) -> Result<Self, Self::Error> {
        Self::new(repr.location, repr.scale, repr.dof)
    }
}

impl EmissionParams {
    /// Rejects non-finite locations, `scale <= 0` and `dof <= 2`.
    pub fn new(
        location: [f64; OBS_DIM],
        scale: [f64; OBS_DIM],
        dof: f64,
    ) -> Result<Self, InvalidParams> {
        if let Some(l) = location.iter().find(|l| !l.is_finite()) {
            return Err(InvalidParams(format!("location {} is not finite", l)));
        }
        if let Some(s) = scale.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
            return Err(InvalidParams(format!("scale {} must be positive", s)));
        }
        if !(dof.is_finite() && dof > 2.0) {
            return Err(InvalidParams(format!("dof {} must exceed 2", dof)));
        }
        Ok(Self {
            location,
            scale,
            dof,
        })
    }

    pub fn location(&self) -> &[f64; OBS_DIM] {
        &self.location
    }

    pub fn scale(&self) -> &[f64; OBS_DIM] {
        &self.scale
    }

    pub fn dof(&self) -> f64 {
        self.dof
    }

    /// Standardized residuals `(x - location) / scale`.
    pub fn standardize(&self, x: &[f64; OBS_DIM]) -> [f64; OBS_DIM] {
        let mut z = [0.0; OBS_DIM];
        for d in 0..OBS_DIM {
            z[d] = (x[d] - self.location[d]) / self.scale[d];
        }
        z
    }

    /// `log p(x | state)`.
    pub fn log_density(&self, x: &[f64; OBS_DIM]) -> f64 {
        let nu = self.dof;
        let norm = ln_gamma((nu + 1.0) / 2.0) - ln_gamma(nu / 2.0) - 0.5 * (nu * PI).ln();
        self.standardize(x)
            .iter()
            .zip(self.scale.iter())
            .map(|(z, s)| norm - s.ln() - 0.5 * (nu + 1.0) * (z * z / nu).ln_1p())
            .sum()
    }

    /// Posterior mean of the latent precision per dimension,
    /// `(dof + 1) / (dof + z^2)`. Outliers get weights near zero.
    pub fn tail_weights(&self, x: &[f64; OBS_DIM]) -> [f64; OBS_DIM] {
        let z = self.standardize(x);
        let mut u = [0.0; OBS_DIM];
        for d in 0..OBS_DIM {
            u[d] = (self.dof + 1.0) / (self.dof + z[d] * z[d]);
        }
        u
    }
}

/// Emission parameters for every state of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionModel {
    states: Vec<EmissionParams>,
}

impl EmissionModel {
    pub fn new(states: Vec<EmissionParams>) -> Result<Self, InvalidParams> {
        if states.is_empty() {
            return Err(InvalidParams("emission model needs at least one state".to_string()));
        }
        Ok(Self { states })
    }

    /// Prior emissions for an asset class.
    pub fn prior(
        asset_class: AssetClass,
        state_count: usize,
        config: &ModelConfig,
    ) -> Result<Self, InvalidParams> {
        if !(3..=PRIOR_SHAPES.len()).contains(&state_count) {
            return Err(InvalidParams(format!(
                "state count {} outside 3..={}",
                state_count,
                PRIOR_SHAPES.len()
            )));
        }
        let dof = config.dof.for_class(asset_class);
        let states = PRIOR_SHAPES[..state_count]
            .iter()
            .map(|(location, scale)| EmissionParams::new(*location, *scale, dof))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(states)
    }

    pub fn states(&self) -> &[EmissionParams] {
        &self.states
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn log_likelihoods(&self, x: &[f64; OBS_DIM]) -> Vec<f64> {
        self.states.iter().map(|s| s.log_density(x)).collect()
    }
}
