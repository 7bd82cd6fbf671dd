//! Regime labels, the hysteresis confirmation filter and hard overrides.
//!
//! - Bull: positive trend, ordinary volatility
//! - Neutral: no persistent trend
//! - Bear: negative trend
//! - Stress: volatility shock (four-state models only)

pub mod hysteresis;
pub mod label;
pub mod overrides;

pub use hysteresis::{HysteresisBuffer, HysteresisConfig, HysteresisFilter, HysteresisTransition};
pub use label::RegimeLabel;
pub use overrides::{
    OverrideCondition, OverrideContext, OverrideDecision, OverrideRule, OverrideTable,
};
