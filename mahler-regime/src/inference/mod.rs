//! One-step forward filtering.

pub mod filter;

pub use filter::{FilterStep, InferenceConfig, InferenceEngine, RegimeInference};
