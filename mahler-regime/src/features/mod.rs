//! Feature construction.
//!
//! Turns raw OHLCV history and macro covariates into one normalized,
//! versioned feature vector per asset per day.

pub mod builder;
pub mod store;

pub use builder::{
    obs_idx, CovariateSets, FeatureBuilder, FeatureConfig, FeatureVector, NormalizedFeatures,
    RawFeatures, OBS_DIM,
};
pub use store::{FeatureStore, RecordOutcome};
