//! Small numeric helpers shared by the filter, the changepoint detector and
//! the EM updater.

use std::cmp::Ordering;

/// Numerically stable `ln(sum(exp(x)))`. Returns `-inf` for an empty slice or
/// when every term is `-inf`.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Convert log weights into probabilities summing to 1.
///
/// Returns `None` if no weight is finite.
pub fn normalize_log_weights(log_weights: &[f64]) -> Option<(Vec<f64>, f64)> {
    let log_total = log_sum_exp(log_weights);
    if !log_total.is_finite() {
        return None;
    }
    let probs = log_weights.iter().map(|w| (w - log_total).exp()).collect();
    Some((probs, log_total))
}

/// Index of the largest value; ties go to the lowest index.
pub fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_v), (i, &v)| {
            match v.partial_cmp(&best_v) {
                Some(Ordering::Greater) => (i, v),
                _ => (best, best_v),
            }
        })
        .0
}

/// Whether probabilities are finite, non-negative and sum to 1 within `tol`.
pub fn is_distribution(probs: &[f64], tol: f64) -> bool {
    !probs.is_empty()
        && probs.iter().all(|p| p.is_finite() && *p >= 0.0)
        && (probs.iter().sum::<f64>() - 1.0).abs() <= tol
}
