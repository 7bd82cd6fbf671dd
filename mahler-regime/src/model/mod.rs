//! Regime model: Student-t emissions, covariate-driven transitions and the
//! online-EM accumulators, versioned per asset class.

pub mod emission;
pub mod regime_model;
pub mod registry;
pub mod transition;

use thiserror::Error;

pub use emission::{EmissionModel, EmissionParams};
pub use regime_model::{DofPriors, ModelConfig, ModelPrior, ParameterBounds, RegimeModel};
pub use registry::{InMemoryModelRegistry, ModelEntry, ModelRegistry, ModelStatus};
pub use transition::{TransitionModel, TransitionParams};

/// A parameter set that fails its construction invariants.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid parameters: {0}")]
pub struct InvalidParams(pub String);
