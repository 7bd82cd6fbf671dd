//! Run-length posterior with a constant hazard and a Normal-Gamma
//! observation model.
//!
//! Index `r` of the distribution is the run length: the observation just
//! absorbed started a new run when `r == 0`. A new run scores that
//! observation under the prior predictive, so `P(r = 0)` rises above the
//! hazard exactly when the observation is better explained by fresh
//! parameters than by any of the running ones.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use crate::error::{RegimeError, RegimeResult};
use crate::numeric::{argmax, is_distribution, log_sum_exp};

/// Conjugate prior for an unknown mean and precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalGammaPrior {
    pub mu: f64,
    pub kappa: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl Default for NormalGammaPrior {
    fn default() -> Self {
        Self {
            mu: 0.0,
            kappa: 0.1,
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

/// Posterior parameters of one hypothesized run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub mu: f64,
    pub kappa: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl From<NormalGammaPrior> for RunStatistics {
    fn from(p: NormalGammaPrior) -> Self {
        Self {
            mu: p.mu,
            kappa: p.kappa,
            alpha: p.alpha,
            beta: p.beta,
        }
    }
}

impl RunStatistics {
    /// Student-t posterior predictive log-density.
    pub fn log_predictive(&self, x: f64) -> f64 {
        let dof = 2.0 * self.alpha;
        let scale2 = self.beta * (self.kappa + 1.0) / (self.alpha * self.kappa);
        let z2 = (x - self.mu).powi(2) / scale2;
        ln_gamma((dof + 1.0) / 2.0)
            - ln_gamma(dof / 2.0)
            - 0.5 * (dof * PI * scale2).ln()
            - 0.5 * (dof + 1.0) * (z2 / dof).ln_1p()
    }

    /// Posterior after one more observation.
    pub fn update(&self, x: f64) -> Self {
        let kappa = self.kappa + 1.0;
        Self {
            mu: (self.kappa * self.mu + x) / kappa,
            kappa,
            alpha: self.alpha + 0.5,
            beta: self.beta + self.kappa * (x - self.mu).powi(2) / (2.0 * kappa),
        }
    }
}

/// Detector settings. `hazard_rate` has no default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangepointConfig {
    /// Prior probability of a break on any given day.
    pub hazard_rate: f64,
    /// Largest tracked run length; longer runs are merged into the last bucket.
    #[serde(default = "default_max_run_length")]
    pub max_run_length: usize,
    #[serde(default)]
    pub prior: NormalGammaPrior,
    /// Allowed deviation of the distribution total from 1.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_max_run_length() -> usize {
    365
}

fn default_tolerance() -> f64 {
    1e-6
}

impl ChangepointConfig {
    pub fn new(hazard_rate: f64) -> Self {
        Self {
            hazard_rate,
            max_run_length: default_max_run_length(),
            prior: NormalGammaPrior::default(),
            tolerance: default_tolerance(),
        }
    }

    pub fn validate(&self) -> RegimeResult<()> {
        if !(self.hazard_rate > 0.0 && self.hazard_rate < 1.0) {
            return Err(RegimeError::InvalidConfig(format!(
                "hazard_rate {} outside (0, 1)",
                self.hazard_rate
            )));
        }
        if self.max_run_length == 0 {
            return Err(RegimeError::InvalidConfig(
                "max_run_length must be at least 1".to_string(),
            ));
        }
        let p = &self.prior;
        if !(p.mu.is_finite() && p.kappa > 0.0 && p.alpha > 0.0 && p.beta > 0.0) {
            return Err(RegimeError::InvalidConfig(
                "changepoint prior needs finite mu and positive kappa, alpha, beta".to_string(),
            ));
        }
        if !(self.tolerance > 0.0 && self.tolerance < 1.0) {
            return Err(RegimeError::InvalidConfig(format!(
                "tolerance {} outside (0, 1)",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Per-asset run-length posterior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangepointState {
    pub asset_id: String,
    /// `P(run length = r)`, sums to 1.
    pub run_length_distribution: Vec<f64>,
    /// Observation model posterior per run length.
    pub run_stats: Vec<RunStatistics>,
    pub hazard_rate: f64,
    pub max_run_length: usize,
    pub observations: u64,
}

/// Detector output for one day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangepointOutput {
    /// `P(r = 0)`: a new run started today.
    pub changepoint_probability: f64,
    pub map_run_length: usize,
    pub expected_run_length: f64,
}

#[derive(Debug, Clone)]
pub struct ChangepointUpdate {
    pub state: ChangepointState,
    pub output: ChangepointOutput,
}

#[derive(Debug, Clone)]
pub struct ChangepointDetector {
    config: ChangepointConfig,
}

impl ChangepointDetector {
    pub fn new(config: ChangepointConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChangepointConfig {
        &self.config
    }

    /// All mass on run length 0 with the prior parameters.
    pub fn initial_state(&self, asset_id: &str) -> ChangepointState {
        ChangepointState {
            asset_id: asset_id.to_string(),
            run_length_distribution: vec![1.0],
            run_stats: vec![self.config.prior.into()],
            hazard_rate: self.config.hazard_rate,
            max_run_length: self.config.max_run_length,
            observations: 0,
        }
    }

    /// Absorb observation `x`. Fails with `ChangepointOverflow` when the
    /// updated distribution is not a valid distribution; the caller resets.
    pub fn update(&self, state: &ChangepointState, x: f64) -> RegimeResult<ChangepointUpdate> {
        let overflow = |detail: String| RegimeError::ChangepointOverflow {
            asset: state.asset_id.clone(),
            detail,
        };
        if !x.is_finite() {
            return Err(RegimeError::numerical(
                "changepoint.observation",
                format!("{} observation {} is not finite", state.asset_id, x),
            ));
        }
        if state.run_length_distribution.len() != state.run_stats.len()
            || state.run_length_distribution.is_empty()
        {
            return Err(overflow("run-length distribution and statistics disagree".to_string()));
        }

        let hazard = state.hazard_rate;
        let log_hazard = hazard.ln();
        let log_survival = (-hazard).ln_1p();
        let log_prior: Vec<f64> = state.run_length_distribution.iter().map(|p| p.ln()).collect();

        let prior_stats = RunStatistics::from(self.config.prior);
        let log_changepoint = log_hazard + prior_stats.log_predictive(x) + log_sum_exp(&log_prior);

        let mut log_joint = Vec::with_capacity(log_prior.len() + 1);
        log_joint.push(log_changepoint);
        log_joint.extend(
            log_prior
                .iter()
                .zip(&state.run_stats)
                .map(|(lp, stats)| lp + stats.log_predictive(x) + log_survival),
        );

        let mut run_stats = Vec::with_capacity(state.run_stats.len() + 1);
        run_stats.push(prior_stats.update(x));
        run_stats.extend(state.run_stats.iter().map(|s| s.update(x)));

        let bound = state.max_run_length + 1;
        while log_joint.len() > bound {
            if let (Some(tail), Some(last)) = (log_joint.pop(), log_joint.last_mut()) {
                *last = log_sum_exp(&[*last, tail]);
            }
            run_stats.pop();
        }

        let log_evidence = log_sum_exp(&log_joint);
        if !log_evidence.is_finite() {
            return Err(overflow(format!("log evidence {} is not finite", log_evidence)));
        }
        let distribution: Vec<f64> = log_joint.iter().map(|l| (l - log_evidence).exp()).collect();
        if !is_distribution(&distribution, self.config.tolerance) {
            return Err(overflow(format!(
                "distribution over {} run lengths sums to {}",
                distribution.len(),
                distribution.iter().sum::<f64>()
            )));
        }

        let output = ChangepointOutput {
            changepoint_probability: distribution[0],
            map_run_length: argmax(&distribution),
            expected_run_length: distribution.iter().enumerate().map(|(r, p)| r as f64 * p).sum(),
        };
        let state = ChangepointState {
            asset_id: state.asset_id.clone(),
            run_length_distribution: distribution,
            run_stats,
            hazard_rate: hazard,
            max_run_length: state.max_run_length,
            observations: state.observations + 1,
        };
        Ok(ChangepointUpdate { state, output })
    }
}
