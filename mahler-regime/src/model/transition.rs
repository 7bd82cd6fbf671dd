//! Covariate-driven transition probabilities.
//!
//! `P(s_t = j | s_{t-1} = i, u_t) = softmax_j(w_ij . v_t)` with
//! `v_t = [1, clip(u_t)]`. Weights are stored flat, row `i`, column `j`,
//! input dimension `d` at `(i * K + j) * D + d`.

use serde::{Deserialize, Serialize};

use super::InvalidParams;
use crate::error::{RegimeError, RegimeResult};

/// Validated transition weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TransitionParamsRepr")]
pub struct TransitionParams {
    state_count: usize,
    covariate_dim: usize,
    weights: Vec<f64>,
}

#[derive(Deserialize)]
struct TransitionParamsRepr {
    state_count: usize,
    covariate_dim: usize,
    weights: Vec<f64>,
}

impl TryFrom<TransitionParamsRepr> for TransitionParams {
    type Error = InvalidParams;

    fn try_from(repr: TransitionParamsRepr) -> Result<Self, Self::Error> {
        Self::new(repr.state_count, repr.covariate_dim, repr.weights)
    }
}

impl TransitionParams {
    pub fn new(
        state_count: usize,
        covariate_dim: usize,
        weights: Vec<f64>,
    ) -> Result<Self, InvalidParams> {
        if state_count < 2 {
            return Err(InvalidParams(format!(
                "transition model needs at least 2 states, got {}",
                state_count
            )));
        }
        let expected = state_count * state_count * (covariate_dim + 1);
        if weights.len() != expected {
            return Err(InvalidParams(format!(
                "expected {} transition weights, got {}",
                expected,
                weights.len()
            )));
        }
        if let Some(w) = weights.iter().find(|w| !w.is_finite()) {
            return Err(InvalidParams(format!("transition weight {} is not finite", w)));
        }
        Ok(Self {
            state_count,
            covariate_dim,
            weights,
        })
    }

    /// Covariate-free weights whose diagonal holds probability `stickiness`
    /// at every input with zero covariates.
    pub fn sticky(
        state_count: usize,
        covariate_dim: usize,
        stickiness: f64,
    ) -> Result<Self, InvalidParams> {
        if !(stickiness > 0.0 && stickiness < 1.0) {
            return Err(InvalidParams(format!(
                "stickiness {} outside (0, 1)",
                stickiness
            )));
        }
        let input_dim = covariate_dim + 1;
        let others = state_count.saturating_sub(1) as f64;
        let intercept = (stickiness * others / (1.0 - stickiness)).ln();

        let mut weights = vec![0.0; state_count * state_count * input_dim];
        for i in 0..state_count {
            weights[(i * state_count + i) * input_dim] = intercept;
        }
        Self::new(state_count, covariate_dim, weights)
    }

    pub fn state_count(&self) -> usize {
        self.state_count
    }

    pub fn covariate_dim(&self) -> usize {
        self.covariate_dim
    }

    /// Covariates plus the intercept.
    pub fn input_dim(&self) -> usize {
        self.covariate_dim + 1
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Offset of `w_ij` in the flat weight vector.
    pub fn offset(&self, from: usize, to: usize) -> usize {
        (from * self.state_count + to) * self.input_dim()
    }

    pub fn weight(&self, from: usize, to: usize) -> &[f64] {
        let start = self.offset(from, to);
        &self.weights[start..start + self.input_dim()]
    }
}

/// Multinomial-logistic transition model with input clipping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionModel {
    params: TransitionParams,
    clip: f64,
}

impl TransitionModel {
    pub fn new(params: TransitionParams, clip: f64) -> Result<Self, InvalidParams> {
        if !(clip.is_finite() && clip > 0.0) {
            return Err(InvalidParams(format!("covariate clip {} must be positive", clip)));
        }
        Ok(Self { params, clip })
    }

    pub fn params(&self) -> &TransitionParams {
        &self.params
    }

    pub fn clip(&self) -> f64 {
        self.clip
    }

    /// Same clip bound, new weights.
    pub fn with_params(&self, params: TransitionParams) -> Self {
        Self {
            params,
            clip: self.clip,
        }
    }

    pub fn state_count(&self) -> usize {
        self.params.state_count
    }

    /// Link input `[1, clip(covariates)]`. Non-finite covariates count as 0.
    pub fn input_vector(&self, covariates: &[f64]) -> RegimeResult<Vec<f64>> {
        if covariates.len() != self.params.covariate_dim {
            return Err(RegimeError::numerical(
                "transition.input",
                format!(
                    "expected {} covariates, got {}",
                    self.params.covariate_dim,
                    covariates.len()
                ),
            ));
        }
        let mut input = Vec::with_capacity(self.params.input_dim());
        input.push(1.0);
        input.extend(covariates.iter().map(|c| {
            if c.is_finite() {
                c.clamp(-self.clip, self.clip)
            } else {
                0.0
            }
        }));
        Ok(input)
    }

    /// Transition row out of `from` for a prepared input vector.
    pub fn row(&self, from: usize, input: &[f64]) -> Vec<f64> {
        let logits: Vec<f64> = (0..self.state_count())
            .map(|to| {
                self.params
                    .weight(from, to)
                    .iter()
                    .zip(input)
                    .map(|(w, v)| w * v)
                    .sum()
            })
            .collect();
        softmax(&logits)
    }

    /// Full row-stochastic matrix for today's covariates.
    pub fn matrix(&self, covariates: &[f64]) -> RegimeResult<Vec<Vec<f64>>> {
        let input = self.input_vector(covariates)?;
        Ok((0..self.state_count()).map(|i| self.row(i, &input)).collect())
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}
