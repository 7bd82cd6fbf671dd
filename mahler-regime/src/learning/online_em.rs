//! Recursive online EM for the Student-t IOHMM.
//!
//! Each day contributes expected sufficient statistics computed from the
//! filtered posterior. They are blended into the running accumulators with
//! stepsize `gamma_t = (t + t0)^-alpha` and the parameters are re-derived
//! from the accumulators. Raw observations are never kept.
//!
//! Per state the accumulators hold `E[r]`, `E[r u_d]`, `E[r u_d x_d]`,
//! `E[r u_d x_d^2]` and `E[r mean_d(ln u_d - u_d)]`, where `u_d` is the
//! Student-t latent precision. Transitions keep decayed expected counts and
//! take one gradient step on the expected complete-data log-likelihood.
//!
//! Every M-step adds `prior_strength` pseudo-observations of each prior state
//! to the accumulators, which hold about one observation of mass in total.
//! The prior therefore keeps a fixed share of each state's parameters: a
//! state that only ever sees `x` settles near `(u x + s mu0) / (u + s)`, not
//! at `x`, where `s` is `prior_strength`, `mu0` the prior location and `u` the
//! Student-t weight. Lowering `prior_strength` loosens this anchoring.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::digamma;
use tracing::debug;

use crate::error::{ensure_finite, RegimeError, RegimeResult};
use crate::features::{FeatureVector, OBS_DIM};
use crate::inference::FilterStep;
use crate::model::{
    EmissionModel, EmissionParams, RegimeModel, TransitionModel, TransitionParams,
};

/// Online EM settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnlineEmConfig {
    /// Stepsize exponent, `0.5 < alpha <= 1`.
    pub alpha: f64,
    /// Prior pseudo-count `t0`.
    pub stepsize_offset: f64,
    /// Multiplier on `gamma_t` for the transition gradient step.
    pub transition_learning_rate: f64,
    /// L2 shrinkage of transition weights towards the prior.
    pub weight_decay: f64,
    /// Pseudo-observations of each prior state added in the M-step.
    pub prior_strength: f64,
}

impl Default for OnlineEmConfig {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            stepsize_offset: 30.0,
            transition_learning_rate: 0.5,
            weight_decay: 0.01,
            prior_strength: 0.5,
        }
    }
}

impl OnlineEmConfig {
    pub fn validate(&self) -> RegimeResult<()> {
        if !(self.alpha > 0.5 && self.alpha <= 1.0) {
            return Err(RegimeError::InvalidConfig(format!(
                "alpha {} outside (0.5, 1]",
                self.alpha
            )));
        }
        let non_negative = [
            ("stepsize_offset", self.stepsize_offset),
            ("weight_decay", self.weight_decay),
            ("prior_strength", self.prior_strength),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(RegimeError::InvalidConfig(format!(
                    "{} {} must be non-negative",
                    name, value
                )));
            }
        }
        if !(self.transition_learning_rate.is_finite() && self.transition_learning_rate > 0.0) {
            return Err(RegimeError::InvalidConfig(format!(
                "transition_learning_rate {} must be positive",
                self.transition_learning_rate
            )));
        }
        Ok(())
    }
}

/// Expected sufficient statistics of one state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StateStatistics {
    pub mass: f64,
    pub weight: [f64; OBS_DIM],
    pub weighted_x: [f64; OBS_DIM],
    pub weighted_x2: [f64; OBS_DIM],
    pub log_weight_gap: f64,
}

impl StateStatistics {
    /// Statistics `mass` observations drawn from `params` would produce.
    /// The M-step maps them back to `params` exactly.
    pub fn expected(params: &EmissionParams, mass: f64) -> Self {
        let mut stats = Self {
            mass,
            log_weight_gap: mass * expected_log_weight_gap(params.dof()),
            ..Self::default()
        };
        for d in 0..OBS_DIM {
            let mu = params.location()[d];
            let sigma = params.scale()[d];
            stats.weight[d] = mass;
            stats.weighted_x[d] = mass * mu;
            stats.weighted_x2[d] = mass * (sigma * sigma + mu * mu);
        }
        stats
    }

    /// Statistics of observation `x` with responsibility `r`.
    pub fn observe(params: &EmissionParams, x: &[f64; OBS_DIM], r: f64) -> Self {
        let u = params.tail_weights(x);
        let mut stats = Self {
            mass: r,
            ..Self::default()
        };
        let mut gap = 0.0;
        for d in 0..OBS_DIM {
            stats.weight[d] = r * u[d];
            stats.weighted_x[d] = r * u[d] * x[d];
            stats.weighted_x2[d] = r * u[d] * x[d] * x[d];
            gap += u[d].ln() - u[d];
        }
        stats.log_weight_gap = r * gap / OBS_DIM as f64;
        stats
    }

    fn combine(&self, a: f64, other: &Self, b: f64) -> Self {
        let mut out = Self {
            mass: a * self.mass + b * other.mass,
            log_weight_gap: a * self.log_weight_gap + b * other.log_weight_gap,
            ..Self::default()
        };
        for d in 0..OBS_DIM {
            out.weight[d] = a * self.weight[d] + b * other.weight[d];
            out.weighted_x[d] = a * self.weighted_x[d] + b * other.weighted_x[d];
            out.weighted_x2[d] = a * self.weighted_x2[d] + b * other.weighted_x2[d];
        }
        out
    }

    fn values(&self) -> Vec<f64> {
        let mut values = vec![self.mass, self.log_weight_gap];
        values.extend_from_slice(&self.weight);
        values.extend_from_slice(&self.weighted_x);
        values.extend_from_slice(&self.weighted_x2);
        values
    }
}

/// Running accumulators owned by a model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SufficientStatistics {
    pub states: Vec<StateStatistics>,
    /// Decayed expected transition counts `E[xi_ij]`.
    pub transition_counts: Vec<Vec<f64>>,
    /// Updates folded in so far.
    pub updates: u64,
}

impl SufficientStatistics {
    /// One pseudo-observation spread evenly over the prior states.
    pub fn seeded(emission: &EmissionModel, transition: &TransitionModel) -> RegimeResult<Self> {
        let mass = 1.0 / emission.state_count() as f64;
        let states = emission
            .states()
            .iter()
            .map(|p| StateStatistics::expected(p, mass))
            .collect();
        let neutral = vec![0.0; transition.params().covariate_dim()];
        let transition_counts = transition
            .matrix(&neutral)?
            .into_iter()
            .map(|row| row.into_iter().map(|p| p * mass).collect())
            .collect();
        Ok(Self {
            states,
            transition_counts,
            updates: 0,
        })
    }

    /// Blend in the per-observation mean of `contribution` with stepsize `gamma`.
    pub fn accumulate(self, contribution: &DailyContribution, gamma: f64) -> Self {
        let keep = 1.0 - gamma;
        let per_obs = gamma / contribution.observations.max(1) as f64;
        let states = self
            .states
            .iter()
            .zip(&contribution.states)
            .map(|(acc, day)| acc.combine(keep, day, per_obs))
            .collect();

        let transition_counts = if contribution.pairwise_observations == 0 {
            self.transition_counts
        } else {
            let per_pair = gamma / contribution.pairwise_observations as f64;
            self.transition_counts
                .iter()
                .zip(&contribution.transitions)
                .map(|(acc, day)| {
                    acc.iter()
                        .zip(day)
                        .map(|(a, d)| keep * a + per_pair * d)
                        .collect()
                })
                .collect()
        };

        Self {
            states,
            transition_counts,
            updates: self.updates + 1,
        }
    }

    /// Row-normalized expected transition counts.
    pub fn expected_transitions(&self) -> Vec<Vec<f64>> {
        self.transition_counts
            .iter()
            .map(|row| {
                let total: f64 = row.iter().sum();
                if total > 0.0 {
                    row.iter().map(|c| c / total).collect()
                } else {
                    vec![1.0 / row.len() as f64; row.len()]
                }
            })
            .collect()
    }
}

/// E-step output. Sums over the observations it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyContribution {
    pub states: Vec<StateStatistics>,
    /// Pairwise posteriors `xi_ij`.
    pub transitions: Vec<Vec<f64>>,
    /// Gradient of the expected log transition likelihood, laid out like
    /// the transition weights.
    pub gradient: Vec<f64>,
    pub observations: usize,
    /// Observations that had a previous-day posterior.
    pub pairwise_observations: usize,
}

impl DailyContribution {
    fn empty(state_count: usize, weight_count: usize) -> Self {
        Self {
            states: vec![StateStatistics::default(); state_count],
            transitions: vec![vec![0.0; state_count]; state_count],
            gradient: vec![0.0; weight_count],
            observations: 0,
            pairwise_observations: 0,
        }
    }

    fn add(mut self, other: &Self) -> Self {
        for (acc, s) in self.states.iter_mut().zip(&other.states) {
            *acc = acc.combine(1.0, s, 1.0);
        }
        for (acc, row) in self.transitions.iter_mut().zip(&other.transitions) {
            for (a, x) in acc.iter_mut().zip(row) {
                *a += x;
            }
        }
        for (a, g) in self.gradient.iter_mut().zip(&other.gradient) {
            *a += g;
        }
        self.observations += other.observations;
        self.pairwise_observations += other.pairwise_observations;
        self
    }
}

#[derive(Debug, Clone)]
pub struct OnlineEmUpdater {
    config: OnlineEmConfig,
}

impl OnlineEmUpdater {
    pub fn new(config: OnlineEmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OnlineEmConfig {
        &self.config
    }

    /// Stepsize for the update following `updates` previous ones.
    pub fn stepsize(&self, updates: u64) -> f64 {
        ((updates + 1) as f64 + self.config.stepsize_offset).powf(-self.config.alpha)
    }

    /// Expected statistics of one asset-day under `model`.
    pub fn e_step(
        &self,
        model: &RegimeModel,
        features: &FeatureVector,
        step: &FilterStep,
    ) -> RegimeResult<DailyContribution> {
        let k = model.state_count;
        let responsibilities = &step.inference.state_probabilities;
        if responsibilities.len() != k {
            return Err(RegimeError::numerical(
                "online_em.e_step",
                format!("expected {} responsibilities, got {}", k, responsibilities.len()),
            ));
        }

        let params = model.transition.params();
        let mut contribution = DailyContribution::empty(k, params.weights().len());
        let x = features.observation();
        contribution.states = model
            .emission
            .states()
            .iter()
            .zip(responsibilities)
            .map(|(p, r)| StateStatistics::observe(p, &x, *r))
            .collect();
        contribution.observations = 1;

        if let Some(pairwise) = &step.pairwise {
            let input = model.transition.input_vector(features.covariates())?;
            for (i, xi_row) in pairwise.iter().enumerate().take(k) {
                let row = model.transition.row(i, &input);
                let leaving: f64 = xi_row.iter().sum();
                for j in 0..k {
                    contribution.transitions[i][j] = xi_row[j];
                    let residual = xi_row[j] - leaving * row[j];
                    let offset = params.offset(i, j);
                    for (d, v) in input.iter().enumerate() {
                        contribution.gradient[offset + d] = residual * v;
                    }
                }
            }
            contribution.pairwise_observations = 1;
        }

        for stats in &contribution.states {
            ensure_finite("online_em.e_step", &stats.values())?;
        }
        ensure_finite("online_em.gradient", &contribution.gradient)?;
        Ok(contribution)
    }

    /// Sum per-asset contributions of one class, in the given order.
    pub fn aggregate(contributions: &[DailyContribution]) -> Option<DailyContribution> {
        let first = contributions.first()?;
        let empty = DailyContribution::empty(first.states.len(), first.gradient.len());
        Some(contributions.iter().fold(empty, |acc, c| acc.add(c)))
    }

    /// Fold one day into `model`, returning its validated successor.
    ///
    /// `model` is left untouched; on error the caller keeps it.
    pub fn update(
        &self,
        model: &RegimeModel,
        contribution: &DailyContribution,
        date: NaiveDate,
    ) -> RegimeResult<RegimeModel> {
        if contribution.observations == 0 || contribution.states.len() != model.state_count {
            return Err(degenerate(model, "contribution does not match model".to_string()));
        }

        let gamma = self.stepsize(model.statistics.updates);
        let statistics = model.statistics.clone().accumulate(contribution, gamma);
        let emission = self.maximize_emission(model, &statistics)?;
        let transition = self.transition_step(model, contribution, gamma)?;

        debug!(
            asset_class = %model.asset_class,
            from_version = model.version,
            gamma,
            observations = contribution.observations,
            "Online EM step"
        );
        model.successor(emission, transition, statistics, date)
    }

    fn maximize_emission(
        &self,
        model: &RegimeModel,
        statistics: &SufficientStatistics,
    ) -> RegimeResult<EmissionModel> {
        let bounds = model.bounds;
        let states = model
            .prior
            .emission
            .states()
            .iter()
            .zip(&statistics.states)
            .enumerate()
            .map(|(i, (prior, acc))| {
                let pseudo = StateStatistics::expected(prior, self.config.prior_strength);
                let total = acc.combine(1.0, &pseudo, 1.0);
                if !(total.mass > 0.0 && total.mass.is_finite()) {
                    return Err(degenerate(model, format!("state {} has no mass", i)));
                }

                let mut location = [0.0; OBS_DIM];
                let mut scale = [0.0; OBS_DIM];
                for d in 0..OBS_DIM {
                    let w = total.weight[d];
                    if !(w > 0.0 && w.is_finite()) {
                        return Err(degenerate(model, format!("state {} dim {} has no weight", i, d)));
                    }
                    let mu = total.weighted_x[d] / w;
                    let variance = (total.weighted_x2[d] - mu * total.weighted_x[d]) / total.mass;
                    if !(variance.is_finite() && variance > 0.0) {
                        return Err(degenerate(
                            model,
                            format!("state {} dim {} variance {}", i, d, variance),
                        ));
                    }
                    location[d] = mu;
                    scale[d] = variance.sqrt();
                }

                let dof = solve_dof(total.log_weight_gap / total.mass, bounds.dof_min, bounds.dof_max);
                EmissionParams::new(location, scale, dof).map_err(|e| degenerate(model, e.0))
            })
            .collect::<RegimeResult<Vec<_>>>()?;
        EmissionModel::new(states).map_err(|e| degenerate(model, e.0))
    }

    fn transition_step(
        &self,
        model: &RegimeModel,
        contribution: &DailyContribution,
        gamma: f64,
    ) -> RegimeResult<TransitionModel> {
        if contribution.pairwise_observations == 0 {
            return Ok(model.transition.clone());
        }
        let current = model.transition.params();
        let prior = &model.prior.transition;
        if prior.weights().len() != current.weights().len()
            || contribution.gradient.len() != current.weights().len()
        {
            return Err(degenerate(model, "transition weight layout mismatch".to_string()));
        }

        let n = contribution.pairwise_observations as f64;
        let rate = gamma * self.config.transition_learning_rate;
        let decay = self.config.weight_decay;
        let weights = current
            .weights()
            .iter()
            .zip(prior.weights())
            .zip(&contribution.gradient)
            .map(|((w, w0), g)| w + rate * (g / n - decay * (w - w0)))
            .collect();

        let params = TransitionParams::new(current.state_count(), current.covariate_dim(), weights)
            .map_err(|e| degenerate(model, e.0))?;
        Ok(model.transition.with_params(params))
    }
}

fn degenerate(model: &RegimeModel, reason: String) -> RegimeError {
    RegimeError::DegenerateModel {
        asset_class: model.asset_class,
        reason,
    }
}

/// `E[mean_d(ln u_d - u_d)]` for data drawn from a Student-t with `dof`,
/// with `u_d` the posterior mean precision.
fn expected_log_weight_gap(dof: f64) -> f64 {
    digamma(dof / 2.0) - (dof / 2.0).ln() - 1.0 - digamma((dof + 1.0) / 2.0)
        + ((dof + 1.0) / 2.0).ln()
}

/// Solve the Student-t dof fixed point for mean gap `gap` by bisection,
/// clamped to `[lo, hi]`. The residual is decreasing in `dof`.
fn solve_dof(gap: f64, lo: f64, hi: f64) -> f64 {
    let residual = |nu: f64| {
        -digamma(nu / 2.0) + (nu / 2.0).ln() + 1.0 + gap + digamma((nu + 1.0) / 2.0)
            - ((nu + 1.0) / 2.0).ln()
    };
    if !gap.is_finite() || residual(lo) <= 0.0 {
        return lo;
    }
    if residual(hi) >= 0.0 {
        return hi;
    }
    let (mut a, mut b) = (lo, hi);
    for _ in 0..80 {
        let mid = 0.5 * (a + b);
        if residual(mid) > 0.0 {
            a = mid;
        } else {
            b = mid;
        }
    }
    0.5 * (a + b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AssetClass;
    use crate::features::obs_idx;
    use crate::features::testing::vector;
    use crate::inference::RegimeInference;
    use crate::model::ModelConfig;
    use approx::assert_abs_diff_eq;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn model() -> RegimeModel {
        RegimeModel::initial(AssetClass::Equity, &ModelConfig::default(), 2).unwrap()
    }

    fn step(probs: Vec<f64>, pairwise: Option<Vec<Vec<f64>>>) -> FilterStep {
        FilterStep {
            inference: RegimeInference {
                asset_id: "SPY".to_string(),
                date: date(),
                raw_argmax_state: crate::numeric::argmax(&probs),
                state_probabilities: probs,
            },
            pairwise,
            log_evidence: 0.0,
        }
    }

    #[test]
    fn test_stepsize_schedule() {
        let updater = OnlineEmUpdater::new(OnlineEmConfig {
            alpha: 1.0,
            stepsize_offset: 0.0,
            ..OnlineEmConfig::default()
        });
        assert_abs_diff_eq!(updater.stepsize(0), 1.0);
        assert_abs_diff_eq!(updater.stepsize(1), 0.5);

        let updater = OnlineEmUpdater::new(OnlineEmConfig::default());
        assert!(updater.stepsize(0) > updater.stepsize(10));
        assert_abs_diff_eq!(updater.stepsize(0), 31f64.powf(-0.7), epsilon = 1e-12);
    }

    #[test]
    fn test_dof_fixed_point() {
        for dof in [3.0, 5.0, 12.0] {
            assert_abs_diff_eq!(solve_dof(expected_log_weight_gap(dof), 2.5, 60.0), dof, epsilon = 1e-6);
        }
        // Every weight at 1: Gaussian data, dof pinned to the upper bound.
        assert_abs_diff_eq!(solve_dof(-1.0, 2.5, 60.0), 60.0);
        assert_abs_diff_eq!(solve_dof(-3.0, 2.5, 60.0), 2.5);
    }

    #[test]
    fn test_seeded_statistics_reproduce_prior() {
        let model = model();
        let updater = OnlineEmUpdater::new(OnlineEmConfig::default());
        let emission = updater.maximize_emission(&model, &model.statistics).unwrap();
        for (fitted, prior) in emission.states().iter().zip(model.emission.states()) {
            for d in 0..OBS_DIM {
                assert_abs_diff_eq!(fitted.location()[d], prior.location()[d], epsilon = 1e-9);
                assert_abs_diff_eq!(fitted.scale()[d], prior.scale()[d], epsilon = 1e-9);
            }
            assert_abs_diff_eq!(fitted.dof(), prior.dof(), epsilon = 1e-6);
        }
        let rows = model.statistics.expected_transitions();
        assert_abs_diff_eq!(rows[2][2], 0.95, epsilon = 1e-12);
    }

    #[test]
    fn test_update_moves_responsible_state() {
        let model = model();
        let updater = OnlineEmUpdater::new(OnlineEmConfig::default());
        let fv = vector("SPY", date(), [2.5, 0.0, 0.5], vec![0.0, 0.0]);
        let contribution = updater
            .e_step(&model, &fv, &step(vec![1.0, 0.0, 0.0, 0.0], None))
            .unwrap();
        let next = updater.update(&model, &contribution, date()).unwrap();

        assert_eq!(next.version, 2);
        assert_eq!(next.statistics.updates, 1);
        let bull_before = model.emission.states()[0].location()[0];
        let bull_after = next.emission.states()[0].location()[0];
        assert!(bull_after > bull_before && bull_after < 2.5);
        // States without responsibility keep their parameters.
        assert_abs_diff_eq!(
            next.emission.states()[2].location()[0],
            model.emission.states()[2].location()[0],
            epsilon = 1e-9
        );
        // The input model is never mutated.
        assert_eq!(model.version, 1);
        assert_eq!(model.statistics.updates, 0);
    }

    #[test]
    fn test_degenerate_update_is_rejected() {
        let model = model();
        let updater = OnlineEmUpdater::new(OnlineEmConfig {
            alpha: 1.0,
            stepsize_offset: 0.0,
            prior_strength: 0.05,
            ..OnlineEmConfig::default()
        });
        // Full stepsize and a weak prior: a strongly bearish day assigned to
        // Bull breaks the trend ordering.
        let fv = vector("SPY", date(), [-3.0, 0.0, 0.0], vec![0.0, 0.0]);
        let contribution = updater
            .e_step(&model, &fv, &step(vec![1.0, 0.0, 0.0, 0.0], None))
            .unwrap();
        let err = updater.update(&model, &contribution, date()).unwrap_err();
        assert!(matches!(err, RegimeError::DegenerateModel { .. }));
    }

    #[test]
    fn test_transition_gradient_follows_pairwise_posterior() {
        let model = model();
        let updater = OnlineEmUpdater::new(OnlineEmConfig::default());
        let fv = vector("SPY", date(), [0.0, 0.0, 0.0], vec![0.0, 0.0]);
        let mut xi = vec![vec![0.0; 4]; 4];
        xi[0][1] = 1.0;
        let contribution = updater
            .e_step(&model, &fv, &step(vec![0.0, 1.0, 0.0, 0.0], Some(xi)))
            .unwrap();
        assert_eq!(contribution.pairwise_observations, 1);

        let next = updater.update(&model, &contribution, date()).unwrap();
        let before = model.transition.matrix(&[0.0, 0.0]).unwrap();
        let after = next.transition.matrix(&[0.0, 0.0]).unwrap();
        assert!(after[0][1] > before[0][1]);
        assert_abs_diff_eq!(after[0].iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(next.statistics.transition_counts[0][1] > model.statistics.transition_counts[0][1]);
    }

    #[test]
    fn test_aggregate_sums_in_order() {
        let model = model();
        let updater = OnlineEmUpdater::new(OnlineEmConfig::default());
        let a = updater
            .e_step(
                &model,
                &vector("SPY", date(), [1.0, 0.0, 0.0], vec![0.0, 0.0]),
                &step(vec![0.5, 0.5, 0.0, 0.0], None),
            )
            .unwrap();
        let b = updater
            .e_step(
                &model,
                &vector("QQQ", date(), [0.0, 0.0, 0.0], vec![0.0, 0.0]),
                &step(vec![0.0, 1.0, 0.0, 0.0], None),
            )
            .unwrap();

        let total = OnlineEmUpdater::aggregate(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(total.observations, 2);
        assert_eq!(total.pairwise_observations, 0);
        assert_abs_diff_eq!(total.states[1].mass, 1.5);
        assert_abs_diff_eq!(total.states[0].mass, 0.5);
        assert!(OnlineEmUpdater::aggregate(&[]).is_none());
    }

    #[test]
    fn test_prior_keeps_a_fixed_share_of_the_location() {
        let mut model = model();
        let updater = OnlineEmUpdater::new(OnlineEmConfig::default());
        let prior = model.prior.emission.states()[0].location()[obs_idx::MOMENTUM];
        let mut x = *model.prior.emission.states()[0].location();
        x[obs_idx::MOMENTUM] += 2.0;

        let fv = vector("SPY", date(), x, vec![0.0, 0.0]);
        for _ in 0..400 {
            let contribution = updater
                .e_step(&model, &fv, &step(vec![1.0, 0.0, 0.0, 0.0], None))
                .unwrap();
            model = updater.update(&model, &contribution, date()).unwrap();
        }

        // The seeded statistics have decayed away; the pseudo-counts have not.
        let shift = model.emission.states()[0].location()[obs_idx::MOMENTUM] - prior;
        assert!(shift > 0.9 && shift < 1.6, "shift {}", shift);
        assert_eq!(model.statistics.updates, 400);
    }
}
