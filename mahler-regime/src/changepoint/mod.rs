//! Bayesian online changepoint detection.

pub mod bocd;

pub use bocd::{
    ChangepointConfig, ChangepointDetector, ChangepointOutput, ChangepointState,
    ChangepointUpdate, NormalGammaPrior, RunStatistics,
};
