//! Model persistence port.
//!
//! Exactly one active model per asset class. Publishing a model makes it
//! active and marks the previous version superseded; nothing is deleted.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use super::regime_model::{ModelConfig, RegimeModel};
use crate::data::AssetClass;
use crate::error::{RegimeError, RegimeResult};
use crate::features::CovariateSets;

/// Lifecycle of a stored model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    Active,
    Superseded {
        by: u32,
        at: Option<NaiveDate>,
    },
}

#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub model: Arc<RegimeModel>,
    pub status: ModelStatus,
    pub published_at: Option<NaiveDate>,
}

pub trait ModelRegistry: Send + Sync {
    /// The single active model for `class`.
    fn load_active(&self, class: AssetClass) -> RegimeResult<Arc<RegimeModel>>;

    /// A specific version, active or superseded.
    fn load_version(&self, class: AssetClass, version: u32) -> Option<Arc<RegimeModel>>;

    /// Make `model` active. Its version must be exactly one above the active one.
    fn publish(&mut self, model: RegimeModel) -> RegimeResult<Arc<RegimeModel>>;

    /// Every stored version for `class`, oldest first.
    fn history(&self, class: AssetClass) -> Vec<ModelEntry>;
}

#[derive(Debug, Default)]
pub struct InMemoryModelRegistry {
    entries: BTreeMap<AssetClass, Vec<ModelEntry>>,
}

impl InMemoryModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding version 1 for every asset class.
    pub fn with_initial_models(
        config: &ModelConfig,
        covariates: &CovariateSets,
    ) -> RegimeResult<Self> {
        let mut registry = Self::new();
        for class in AssetClass::ALL {
            let model = RegimeModel::initial(class, config, covariates.for_class(class).len())?;
            registry.publish(model)?;
        }
        Ok(registry)
    }
}

impl ModelRegistry for InMemoryModelRegistry {
    fn load_active(&self, class: AssetClass) -> RegimeResult<Arc<RegimeModel>> {
        self.entries
            .get(&class)
            .and_then(|versions| versions.last())
            .map(|entry| Arc::clone(&entry.model))
            .ok_or(RegimeError::UnknownAssetClass(class))
    }

    fn load_version(&self, class: AssetClass, version: u32) -> Option<Arc<RegimeModel>> {
        self.entries
            .get(&class)?
            .iter()
            .find(|entry| entry.model.version == version)
            .map(|entry| Arc::clone(&entry.model))
    }

    fn publish(&mut self, model: RegimeModel) -> RegimeResult<Arc<RegimeModel>> {
        model.validate()?;
        let class = model.asset_class;
        let versions = self.entries.entry(class).or_default();

        let expected = versions.last().map_or(1, |entry| entry.model.version + 1);
        if model.version != expected {
            return Err(RegimeError::VersionConflict {
                asset_class: class,
                expected,
                found: model.version,
            });
        }

        let published_at = model.last_updated_at;
        let model = Arc::new(model);
        if let Some(previous) = versions.last_mut() {
            previous.status = ModelStatus::Superseded {
                by: model.version,
                at: published_at,
            };
        }
        versions.push(ModelEntry {
            model: Arc::clone(&model),
            status: ModelStatus::Active,
            published_at,
        });

        info!(
            asset_class = %class,
            model_id = %model.model_id,
            version = model.version,
            "Published regime model"
        );
        Ok(model)
    }

    fn history(&self, class: AssetClass) -> Vec<ModelEntry> {
        self.entries.get(&class).cloned().unwrap_or_default()
    }
}
