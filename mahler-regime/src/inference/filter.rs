//! Causal forward filter.
//!
//! `alpha_t(j) ∝ b_j(x_t) * sum_i alpha_{t-1}(i) * A'_ij(u_t)`, computed in
//! log space. `A'` is the covariate-driven transition matrix mixed towards
//! uniform by the day's changepoint probability:
//! `A' = (1 - lambda * p) * A + lambda * p / K`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{ensure_finite, RegimeError, RegimeResult};
use crate::features::FeatureVector;
use crate::model::RegimeModel;
use crate::numeric::{argmax, is_distribution, log_sum_exp, normalize_log_weights};

const DISTRIBUTION_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// `lambda` in `[0, 1]`: how far a certain changepoint pulls transitions
    /// towards uniform.
    pub changepoint_sensitivity: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            changepoint_sensitivity: 0.8,
        }
    }
}

impl InferenceConfig {
    pub fn validate(&self) -> RegimeResult<()> {
        if !(0.0..=1.0).contains(&self.changepoint_sensitivity) {
            return Err(RegimeError::InvalidConfig(format!(
                "changepoint_sensitivity {} outside [0, 1]",
                self.changepoint_sensitivity
            )));
        }
        Ok(())
    }
}

/// Filtered posterior for one asset on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeInference {
    pub asset_id: String,
    pub date: NaiveDate,
    pub state_probabilities: Vec<f64>,
    pub raw_argmax_state: usize,
}

/// Filter output plus the terms the online-EM E-step needs.
#[derive(Debug, Clone)]
pub struct FilterStep {
    pub inference: RegimeInference,
    /// `P(s_{t-1} = i, s_t = j | x_{1:t})`; `None` on the first day.
    pub pairwise: Option<Vec<Vec<f64>>>,
    /// `ln p(x_t | x_{1:t-1})`.
    pub log_evidence: f64,
}

#[derive(Debug, Clone)]
pub struct InferenceEngine {
    config: InferenceConfig,
}

impl InferenceEngine {
    pub fn new(config: InferenceConfig) -> Self {
        Self { config }
    }

    /// Mix transition rows towards uniform by `sensitivity * p`.
    pub fn effective_transitions(
        &self,
        matrix: Vec<Vec<f64>>,
        changepoint_probability: f64,
    ) -> Vec<Vec<f64>> {
        let p = if changepoint_probability.is_finite() {
            changepoint_probability.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let mix = self.config.changepoint_sensitivity * p;
        matrix
            .into_iter()
            .map(|row| {
                let uniform = mix / row.len() as f64;
                row.into_iter().map(|a| (1.0 - mix) * a + uniform).collect()
            })
            .collect()
    }

    /// Filter one day. `previous` is yesterday's posterior, `None` on cold
    /// start, where the predicted distribution is uniform.
    pub fn step(
        &self,
        model: &RegimeModel,
        previous: Option<&[f64]>,
        features: &FeatureVector,
        changepoint_probability: f64,
    ) -> RegimeResult<FilterStep> {
        let k = model.state_count;
        let log_b = model.emission.log_likelihoods(&features.observation());
        ensure_finite("inference.emission", &log_b)?;

        let (log_alpha, pairwise_log) = match previous {
            None => {
                let log_uniform = -(k as f64).ln();
                (log_b.iter().map(|b| b + log_uniform).collect::<Vec<_>>(), None)
            }
            Some(previous) => {
                if previous.len() != k || !is_distribution(previous, 1e-6) {
                    return Err(RegimeError::numerical(
                        "inference.prior",
                        format!(
                            "previous posterior for {} is not a distribution over {} states",
                            features.asset_id, k
                        ),
                    ));
                }
                let matrix = model.transition.matrix(features.covariates())?;
                let transitions = self.effective_transitions(matrix, changepoint_probability);

                let joint: Vec<Vec<f64>> = previous
                    .iter()
                    .zip(&transitions)
                    .map(|(p, row)| {
                        row.iter()
                            .zip(&log_b)
                            .map(|(a, b)| p.ln() + a.ln() + b)
                            .collect()
                    })
                    .collect();
                let log_alpha: Vec<f64> = (0..k)
                    .map(|j| log_sum_exp(&joint.iter().map(|row| row[j]).collect::<Vec<_>>()))
                    .collect();
                (log_alpha, Some(joint))
            }
        };

        let (probs, log_evidence) = normalize_log_weights(&log_alpha).ok_or_else(|| {
            RegimeError::numerical(
                "inference.posterior",
                format!("{} posterior has no finite mass", features.asset_id),
            )
        })?;
        ensure_finite("inference.posterior", &probs)?;
        if !is_distribution(&probs, DISTRIBUTION_TOLERANCE) {
            return Err(RegimeError::numerical(
                "inference.posterior",
                format!("{} posterior sums to {}", features.asset_id, probs.iter().sum::<f64>()),
            ));
        }

        let pairwise = match pairwise_log {
            Some(joint) => {
                let xi: Vec<Vec<f64>> = joint
                    .iter()
                    .map(|row| row.iter().map(|l| (l - log_evidence).exp()).collect())
                    .collect();
                for row in &xi {
                    ensure_finite("inference.pairwise", row)?;
                }
                Some(xi)
            }
            None => None,
        };

        Ok(FilterStep {
            inference: RegimeInference {
                asset_id: features.asset_id.clone(),
                date: features.date,
                raw_argmax_state: argmax(&probs),
                state_probabilities: probs,
            },
            pairwise,
            log_evidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AssetClass;
    use crate::features::testing::vector;
    use crate::model::ModelConfig;
    use approx::assert_abs_diff_eq;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
    }

    fn model() -> RegimeModel {
        RegimeModel::initial(AssetClass::Equity, &ModelConfig::default(), 2).unwrap()
    }

    fn engine() -> InferenceEngine {
        InferenceEngine::new(InferenceConfig::default())
    }

    #[test]
    fn test_cold_start_uses_emissions_only() {
        let fv = vector("SPY", date(), [1.8, -0.2, 0.4], vec![0.0, 0.0]);
        let step = engine().step(&model(), None, &fv, 0.0).unwrap();
        assert!(step.pairwise.is_none());
        assert_eq!(step.inference.raw_argmax_state, 0);
        assert_abs_diff_eq!(step.inference.state_probabilities.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pairwise_marginalizes_to_posterior() {
        let fv = vector("SPY", date(), [-1.2, 0.5, -0.3], vec![0.4, -1.0]);
        let prior = [0.6, 0.3, 0.08, 0.02];
        let step = engine().step(&model(), Some(&prior[..]), &fv, 0.1).unwrap();
        let xi = step.pairwise.unwrap();
        for j in 0..4 {
            let column: f64 = xi.iter().map(|row| row[j]).sum();
            assert_abs_diff_eq!(column, step.inference.state_probabilities[j], epsilon = 1e-12);
        }
        let total: f64 = xi.iter().flatten().sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sticky_prior_resists_single_day() {
        let model = model();
        let fv = vector("SPY", date(), [-0.3, 0.2, -0.5], vec![0.0, 0.0]);
        let cold = engine().step(&model, None, &fv, 0.0).unwrap();
        let bull = [0.97, 0.01, 0.01, 0.01];
        let warm = engine().step(&model, Some(&bull[..]), &fv, 0.0).unwrap();
        assert!(warm.inference.state_probabilities[0] > cold.inference.state_probabilities[0]);
    }

    #[test]
    fn test_changepoint_loosens_transitions() {
        let model = model();
        let fv = vector("SPY", date(), [-4.0, 4.0, -6.0], vec![0.0, 0.0]);
        let bull = [0.97, 0.01, 0.01, 0.01];
        let calm = engine().step(&model, Some(&bull[..]), &fv, 0.0).unwrap();
        let broken = engine().step(&model, Some(&bull[..]), &fv, 1.0).unwrap();
        assert!(broken.inference.state_probabilities[3] > calm.inference.state_probabilities[3]);

        let mixed = engine().effective_transitions(model.transition.matrix(&[0.0, 0.0]).unwrap(), 1.0);
        for (i, row) in mixed.iter().enumerate() {
            assert_abs_diff_eq!(row.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(row[i], 0.2 * 0.95 + 0.2, epsilon = 1e-12);
            assert_abs_diff_eq!(row[(i + 1) % 4], 0.2 * (0.05 / 3.0) + 0.2, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rejects_invalid_prior() {
        let fv = vector("SPY", date(), [0.0, 0.0, 0.0], vec![0.0, 0.0]);
        let err = engine().step(&model(), Some(&[0.5, 0.5][..]), &fv, 0.0).unwrap_err();
        assert!(matches!(err, RegimeError::NumericalInstability { .. }));
    }
}
