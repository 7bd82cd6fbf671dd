//! Output records and the append-only sink port.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RegimeError, RegimeResult};
use crate::regime::RegimeLabel;

/// Final classification for one asset on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeRecord {
    pub asset_id: String,
    pub date: NaiveDate,
    pub regime_label: RegimeLabel,
    /// Posterior mass of the emitted label, or the rule's confidence when
    /// overridden.
    pub confidence: f64,
    pub override_applied: bool,
    pub override_reason: Option<String>,
    /// What hysteresis concluded, overridden or not.
    pub hysteresis_label: RegimeLabel,
    pub model_id: String,
    pub model_version: u32,
    pub feature_fingerprint: String,
    pub lineage_hash: String,
    /// Lineage hash of the record this one corrects.
    pub supersedes: Option<String>,
}

/// SHA-256 over the model identity and the feature vector identity.
pub fn lineage_hash(model_id: &str, model_version: u32, feature_fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update(b"|");
    hasher.update(model_version.to_be_bytes());
    hasher.update(b"|");
    hasher.update(feature_fingerprint.as_bytes());
    hex::encode(hasher.finalize())
}

/// Append-only destination for records.
pub trait RecordSink: Send + Sync {
    /// A record for an existing `(asset, date)` key is only accepted when it
    /// supersedes the latest one.
    fn append(&mut self, record: RegimeRecord) -> RegimeResult<()>;

    /// Append a whole day. Either every record is stored or none is.
    fn append_batch(&mut self, records: Vec<RegimeRecord>) -> RegimeResult<()>;

    fn latest(&self, asset_id: &str, date: NaiveDate) -> Option<&RegimeRecord>;
}

#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: Vec<RegimeRecord>,
    index: BTreeMap<(String, NaiveDate), Vec<usize>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record in append order.
    pub fn records(&self) -> &[RegimeRecord] {
        &self.records
    }

    /// Latest record per day for one asset, in date order.
    pub fn timeline(&self, asset_id: &str) -> Vec<&RegimeRecord> {
        self.index
            .iter()
            .filter(|((asset, _), _)| asset == asset_id)
            .filter_map(|(_, positions)| positions.last().map(|&i| &self.records[i]))
            .collect()
    }

    /// All versions for a key, oldest first.
    pub fn versions(&self, asset_id: &str, date: NaiveDate) -> Vec<&RegimeRecord> {
        self.index
            .get(&(asset_id.to_string(), date))
            .map(|positions| positions.iter().map(|&i| &self.records[i]).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl InMemoryRecordStore {
    fn check(&self, record: &RegimeRecord) -> RegimeResult<()> {
        match self.latest(&record.asset_id, record.date) {
            Some(latest) if record.supersedes.as_deref() != Some(latest.lineage_hash.as_str()) => {
                Err(RegimeError::DuplicateRecord {
                    asset: record.asset_id.clone(),
                    date: record.date,
                })
            }
            _ => Ok(()),
        }
    }

    fn push(&mut self, record: RegimeRecord) {
        let key = (record.asset_id.clone(), record.date);
        self.records.push(record);
        self.index.entry(key).or_default().push(self.records.len() - 1);
    }
}

impl RecordSink for InMemoryRecordStore {
    fn append(&mut self, record: RegimeRecord) -> RegimeResult<()> {
        self.check(&record)?;
        self.push(record);
        Ok(())
    }

    fn append_batch(&mut self, records: Vec<RegimeRecord>) -> RegimeResult<()> {
        let mut keys = BTreeSet::new();
        for record in &records {
            self.check(record)?;
            if !keys.insert((record.asset_id.as_str(), record.date)) {
                return Err(RegimeError::DuplicateRecord {
                    asset: record.asset_id.clone(),
                    date: record.date,
                });
            }
        }
        for record in records {
            self.push(record);
        }
        Ok(())
    }

    fn latest(&self, asset_id: &str, date: NaiveDate) -> Option<&RegimeRecord> {
        self.index
            .get(&(asset_id.to_string(), date))
            .and_then(|positions| positions.last())
            .map(|&i| &self.records[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(date: NaiveDate, fingerprint: &str) -> RegimeRecord {
        RegimeRecord {
            asset_id: "SPY".to_string(),
            date,
            regime_label: RegimeLabel::Bull,
            confidence: 0.8,
            override_applied: false,
            override_reason: None,
            hysteresis_label: RegimeLabel::Bull,
            model_id: "equity-v3".to_string(),
            model_version: 3,
            feature_fingerprint: fingerprint.to_string(),
            lineage_hash: lineage_hash("equity-v3", 3, fingerprint),
            supersedes: None,
        }
    }

    #[test]
    fn test_lineage_hash_is_deterministic() {
        let a = lineage_hash("equity-v3", 3, "abc:v1");
        assert_eq!(a, lineage_hash("equity-v3", 3, "abc:v1"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, lineage_hash("equity-v3", 3, "abc:v2"));
        assert_ne!(a, lineage_hash("equity-v4", 4, "abc:v1"));
    }

    #[test]
    fn test_append_only() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let mut store = InMemoryRecordStore::new();
        let original = record(date, "abc:v1");
        store.append(original.clone()).unwrap();

        let err = store.append(record(date, "abc:v2")).unwrap_err();
        assert!(matches!(err, RegimeError::DuplicateRecord { .. }));

        let mut correction = record(date, "abc:v2");
        correction.supersedes = Some(original.lineage_hash.clone());
        store.append(correction.clone()).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.latest("SPY", date), Some(&correction));
        assert_eq!(store.versions("SPY", date)[0], &original);
        assert_eq!(store.timeline("SPY").len(), 1);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let day1 = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap();
        let mut store = InMemoryRecordStore::new();
        store.append(record(day1, "abc:v1")).unwrap();

        let mut btc = record(day2, "def:v1");
        btc.asset_id = "BTC-USD".to_string();
        let err = store
            .append_batch(vec![btc.clone(), record(day1, "abc:v2")])
            .unwrap_err();
        assert!(matches!(err, RegimeError::DuplicateRecord { .. }));
        assert_eq!(store.len(), 1);
        assert!(store.latest("BTC-USD", day2).is_none());

        let err = store
            .append_batch(vec![record(day2, "abc:v1"), record(day2, "abc:v2")])
            .unwrap_err();
        assert!(matches!(err, RegimeError::DuplicateRecord { .. }));
        assert_eq!(store.len(), 1);

        store.append_batch(vec![btc, record(day2, "abc:v1")]).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.timeline("SPY").len(), 2);
    }
}
