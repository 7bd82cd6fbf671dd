//! Append-only store of feature vector versions.
//!
//! A vector for an (asset, date) is never overwritten. Recomputing it from the
//! same inputs is a no-op; recomputing it after an upstream price correction
//! appends a new version.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::builder::FeatureVector;

/// Result of recording a freshly built vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First vector for this key.
    Inserted,
    /// Same content as the latest version; nothing stored.
    Unchanged,
    /// Content differs from the latest version; stored as a new version.
    NewVersion(u32),
}

#[derive(Debug, Default)]
pub struct FeatureStore {
    versions: BTreeMap<(String, NaiveDate), Vec<FeatureVector>>,
}

impl FeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a vector, assigning its version. Returns the stored (or existing
    /// identical) vector and what happened.
    pub fn record(&mut self, vector: FeatureVector) -> (FeatureVector, RecordOutcome) {
        let (vector, outcome) = self.stage(vector);
        self.commit(vector.clone(), outcome);
        (vector, outcome)
    }

    /// Assign the version `vector` would get without storing it.
    pub fn stage(&self, mut vector: FeatureVector) -> (FeatureVector, RecordOutcome) {
        match self.latest(&vector.asset_id, vector.date) {
            None => {
                vector.version = 1;
                (vector, RecordOutcome::Inserted)
            }
            Some(latest) if latest.content_hash() == vector.content_hash() => {
                (latest.clone(), RecordOutcome::Unchanged)
            }
            Some(latest) => {
                let version = latest.version + 1;
                vector.version = version;
                (vector, RecordOutcome::NewVersion(version))
            }
        }
    }

    /// Store a vector returned by [`FeatureStore::stage`].
    pub fn commit(&mut self, vector: FeatureVector, outcome: RecordOutcome) {
        if outcome == RecordOutcome::Unchanged {
            return;
        }
        self.versions
            .entry((vector.asset_id.clone(), vector.date))
            .or_default()
            .push(vector);
    }

    pub fn latest(&self, asset_id: &str, date: NaiveDate) -> Option<&FeatureVector> {
        self.versions
            .get(&(asset_id.to_string(), date))
            .and_then(|v| v.last())
    }

    /// All versions for a key, oldest first.
    pub fn history(&self, asset_id: &str, date: NaiveDate) -> &[FeatureVector] {
        self.versions
            .get(&(asset_id.to_string(), date))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
