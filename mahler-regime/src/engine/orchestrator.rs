//! Daily orchestration.
//!
//! One call to [`RegimeOrchestrator::run_day`] processes every asset listed
//! for that day:
//! 1. assets run in parallel against the active model of their class, each
//!    on a private copy of its changepoint and hysteresis state
//! 2. asset-local failures are logged and skipped
//! 3. per class, the day's E-step contributions are summed in asset order
//!    and folded into a scratch successor model
//! 4. records, asset states and validated models are committed together
//!
//! Days must arrive in strictly increasing order.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::record::{lineage_hash, InMemoryRecordStore, RecordSink, RegimeRecord};
use crate::changepoint::{ChangepointDetector, ChangepointOutput, ChangepointState};
use crate::config::EngineConfig;
use crate::data::{AssetClass, MarketFeed, RiskSignals};
use crate::error::{RegimeError, RegimeResult};
use crate::features::{FeatureBuilder, FeatureStore, FeatureVector, RecordOutcome};
use crate::inference::{InferenceEngine, RegimeInference};
use crate::learning::{DailyContribution, OnlineEmUpdater};
use crate::model::{InMemoryModelRegistry, ModelRegistry, RegimeModel};
use crate::regime::{
    HysteresisFilter, HysteresisTransition, OverrideContext, OverrideDecision, RegimeLabel,
};

/// Long-lived per-asset state owned by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetState {
    pub asset_id: String,
    pub asset_class: AssetClass,
    pub changepoint: ChangepointState,
    pub hysteresis: HysteresisFilter,
    /// Yesterday's filtered posterior.
    pub filtered: Option<Vec<f64>>,
    pub last_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedAsset {
    pub asset_id: String,
    pub kind: &'static str,
    pub reason: String,
}

/// What happened to a class model at the end of a day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ModelOutcome {
    Published { version: u32 },
    /// The previous version stays active.
    Rejected { reason: String },
    /// No asset of the class produced a contribution.
    NoData,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayReport {
    pub date: NaiveDate,
    pub records: Vec<RegimeRecord>,
    pub skipped: Vec<SkippedAsset>,
    pub model_outcomes: BTreeMap<AssetClass, ModelOutcome>,
    /// Assets whose changepoint state was reset.
    pub changepoint_resets: Vec<String>,
}

/// Everything computed for one asset before commit.
#[derive(Debug)]
struct AssetDay {
    features: FeatureVector,
    state: AssetState,
    contribution: Option<DailyContribution>,
    inference: RegimeInference,
    confirmed_state: usize,
    hysteresis_label: RegimeLabel,
    decision: Option<OverrideDecision>,
    changepoint_reset: bool,
}

/// Inputs needed to recompute the last committed day.
#[derive(Debug)]
struct DayCheckpoint {
    date: NaiveDate,
    models: BTreeMap<AssetClass, Arc<RegimeModel>>,
    /// Asset state before the day, `None` for assets first seen that day.
    prior_states: BTreeMap<String, Option<AssetState>>,
}

pub struct RegimeOrchestrator<R: ModelRegistry, S: RecordSink> {
    config: EngineConfig,
    builder: FeatureBuilder,
    updater: OnlineEmUpdater,
    detector: ChangepointDetector,
    engine: InferenceEngine,
    registry: R,
    sink: S,
    features: FeatureStore,
    assets: BTreeMap<String, AssetState>,
    last_committed: Option<NaiveDate>,
    checkpoint: Option<DayCheckpoint>,
}

impl RegimeOrchestrator<InMemoryModelRegistry, InMemoryRecordStore> {
    /// Orchestrator over in-memory stores seeded with prior models.
    pub fn in_memory(config: EngineConfig) -> RegimeResult<Self> {
        let registry =
            InMemoryModelRegistry::with_initial_models(&config.model, &config.features.covariates)?;
        Self::new(config, registry, InMemoryRecordStore::new())
    }
}

impl<R: ModelRegistry, S: RecordSink> RegimeOrchestrator<R, S> {
    pub fn new(config: EngineConfig, registry: R, sink: S) -> RegimeResult<Self> {
        config.validate()?;
        Ok(Self {
            builder: FeatureBuilder::new(config.features.clone()),
            updater: OnlineEmUpdater::new(config.online_em.clone()),
            detector: ChangepointDetector::new(config.changepoint.clone()),
            engine: InferenceEngine::new(config.inference.clone()),
            config,
            registry,
            sink,
            features: FeatureStore::new(),
            assets: BTreeMap::new(),
            last_committed: None,
            checkpoint: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn feature_store(&self) -> &FeatureStore {
        &self.features
    }

    pub fn asset_state(&self, asset_id: &str) -> Option<&AssetState> {
        self.assets.get(asset_id)
    }

    pub fn last_committed(&self) -> Option<NaiveDate> {
        self.last_committed
    }

    /// Process every trading date after the last committed one.
    pub fn run_all<F: MarketFeed + ?Sized>(&mut self, feed: &F) -> RegimeResult<Vec<DayReport>> {
        let dates: Vec<NaiveDate> = feed
            .trading_dates()
            .into_iter()
            .filter(|d| self.last_committed.map_or(true, |last| *d > last))
            .collect();
        dates.into_iter().map(|date| self.run_day(feed, date)).collect()
    }

    pub fn run_day<F: MarketFeed + ?Sized>(
        &mut self,
        feed: &F,
        date: NaiveDate,
    ) -> RegimeResult<DayReport> {
        if let Some(last) = self.last_committed {
            if date <= last {
                return Err(RegimeError::OutOfOrderDay {
                    date,
                    last_committed: last,
                });
            }
        }

        let mut assets = feed.assets_on(date);
        assets.sort();
        assets.dedup();

        let mut models = BTreeMap::new();
        for asset in &assets {
            let class = self.builder.classify(asset);
            if let Entry::Vacant(slot) = models.entry(class) {
                slot.insert(self.registry.load_active(class)?);
            }
        }

        let results: Vec<(String, RegimeResult<AssetDay>)> = assets
            .par_iter()
            .map(|asset| (asset.clone(), self.process_asset(feed, asset, date, &models)))
            .collect();

        let mut days = Vec::with_capacity(results.len());
        let mut skipped = Vec::new();
        for (asset_id, result) in results {
            match result {
                Ok(day) => days.push(day),
                Err(e) if e.is_asset_local() => {
                    warn!(asset = %asset_id, %date, kind = e.kind(), error = %e, "Skipping asset");
                    skipped.push(SkippedAsset {
                        asset_id,
                        kind: e.kind(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        let (staged, mut model_outcomes) = self.stage_models(&models, &days, date);

        // Nothing is written until the sink has accepted the whole day.
        let mut records = Vec::with_capacity(days.len());
        let mut committed = Vec::with_capacity(days.len());
        for day in days {
            let model = model_for(&models, day.state.asset_class)?;
            let (features, outcome) = self.features.stage(day.features.clone());
            records.push(build_record(&day, &features, model, None));
            committed.push((day, features, outcome));
        }
        self.sink.append_batch(records.clone())?;

        let mut prior_states = BTreeMap::new();
        let mut changepoint_resets = Vec::new();
        for (day, features, outcome) in committed {
            self.features.commit(features, outcome);
            let asset_id = day.state.asset_id.clone();
            if day.changepoint_reset {
                changepoint_resets.push(asset_id.clone());
            }
            let previous = self.assets.insert(asset_id.clone(), day.state);
            prior_states.insert(asset_id, previous);
        }

        for (class, model) in staged {
            let outcome = match self.registry.publish(model) {
                Ok(published) => ModelOutcome::Published {
                    version: published.version,
                },
                Err(e) => {
                    warn!(asset_class = %class, %date, error = %e, "Model publication failed");
                    ModelOutcome::Rejected {
                        reason: e.to_string(),
                    }
                }
            };
            model_outcomes.insert(class, outcome);
        }

        self.last_committed = Some(date);
        self.checkpoint = Some(DayCheckpoint {
            date,
            models,
            prior_states,
        });

        info!(
            %date,
            records = records.len(),
            skipped = skipped.len(),
            "Committed day"
        );
        Ok(DayReport {
            date,
            records,
            skipped,
            model_outcomes,
            changepoint_resets,
        })
    }

    /// Recompute the last committed day for one asset after an upstream
    /// correction. Appends a superseding record and replaces the asset's
    /// state. Models are not re-learned. Returns `None` when there is no
    /// such day for the asset or the recomputed features are unchanged.
    pub fn restate_last_day<F: MarketFeed + ?Sized>(
        &mut self,
        feed: &F,
        asset_id: &str,
    ) -> RegimeResult<Option<RegimeRecord>> {
        let (date, model, prior) = match self.checkpoint.as_ref() {
            Some(checkpoint) => match checkpoint.prior_states.get(asset_id) {
                Some(prior) => {
                    let class = self.builder.classify(asset_id);
                    let model = Arc::clone(model_for(&checkpoint.models, class)?);
                    (checkpoint.date, model, prior.clone())
                }
                None => return Ok(None),
            },
            None => return Ok(None),
        };

        let features = self.build_features(feed, asset_id, date)?;
        let (features, outcome) = self.features.stage(features);
        if outcome == RecordOutcome::Unchanged {
            return Ok(None);
        }

        let signals = feed.risk_signals(asset_id, date);
        let day = self.evaluate(&model, features.clone(), &signals, prior.as_ref(), false)?;
        let supersedes = self
            .sink
            .latest(asset_id, date)
            .map(|r| r.lineage_hash.clone());
        let record = build_record(&day, &features, &model, supersedes);
        self.sink.append(record.clone())?;
        self.features.commit(features.clone(), outcome);
        self.assets.insert(asset_id.to_string(), day.state);

        info!(
            asset = %asset_id,
            %date,
            feature_version = features.version,
            "Restated record"
        );
        Ok(Some(record))
    }

    fn build_features<F: MarketFeed + ?Sized>(
        &self,
        feed: &F,
        asset_id: &str,
        date: NaiveDate,
    ) -> RegimeResult<FeatureVector> {
        let cfg = self.builder.config();
        let bars = feed.bars_through(asset_id, date, cfg.lookback());
        let macro_history = feed.macro_history(date, cfg.macro_lookback);
        self.builder.build(asset_id, date, &bars, &macro_history)
    }

    fn process_asset<F: MarketFeed + ?Sized>(
        &self,
        feed: &F,
        asset_id: &str,
        date: NaiveDate,
        models: &BTreeMap<AssetClass, Arc<RegimeModel>>,
    ) -> RegimeResult<AssetDay> {
        let features = self.build_features(feed, asset_id, date)?;
        let model = model_for(models, features.asset_class)?;
        let signals = feed.risk_signals(asset_id, date);
        self.evaluate(model, features, &signals, self.assets.get(asset_id), true)
    }

    /// Run changepoint detection, filtering, hysteresis and overrides on a
    /// copy of the asset's state.
    fn evaluate(
        &self,
        model: &RegimeModel,
        features: FeatureVector,
        signals: &RiskSignals,
        previous: Option<&AssetState>,
        learn: bool,
    ) -> RegimeResult<AssetDay> {
        let mut state = match previous {
            Some(state) => state.clone(),
            None => AssetState {
                asset_id: features.asset_id.clone(),
                asset_class: features.asset_class,
                changepoint: self.detector.initial_state(&features.asset_id),
                hysteresis: HysteresisFilter::new(&features.asset_id, self.config.hysteresis.k),
                filtered: None,
                last_date: None,
            },
        };

        let (changepoint, changepoint_reset) =
            self.detect(&mut state, features.normalized.return_z)?;
        let step = self.engine.step(
            model,
            state.filtered.as_deref(),
            &features,
            changepoint.changepoint_probability,
        )?;
        let contribution = if learn {
            Some(self.updater.e_step(model, &features, &step)?)
        } else {
            None
        };

        let transition = state.hysteresis.observe(&step.inference);
        let confirmed_state = match transition {
            HysteresisTransition::ColdStart { state: s } | HysteresisTransition::Held { state: s } => s,
            HysteresisTransition::Pending { confirmed, .. } => confirmed,
            HysteresisTransition::Confirmed { to, .. } => to,
        };
        let hysteresis_label = model.label(confirmed_state)?;

        let decision = self.config.overrides.evaluate(&OverrideContext {
            asset_class: features.asset_class,
            features: &features,
            signals,
        });

        debug!(
            asset = %features.asset_id,
            date = %features.date,
            model_version = model.version,
            raw_state = step.inference.raw_argmax_state,
            confirmed = %hysteresis_label,
            changepoint = changepoint.changepoint_probability,
            overridden = decision.is_some(),
            "Asset step"
        );

        state.filtered = Some(step.inference.state_probabilities.clone());
        state.last_date = Some(features.date);
        Ok(AssetDay {
            features,
            state,
            contribution,
            inference: step.inference,
            confirmed_state,
            hysteresis_label,
            decision,
            changepoint_reset,
        })
    }

    /// Advance the changepoint state; an overflowing state is reset and the
    /// observation re-applied to the fresh one.
    fn detect(&self, state: &mut AssetState, x: f64) -> RegimeResult<(ChangepointOutput, bool)> {
        match self.detector.update(&state.changepoint, x) {
            Ok(update) => {
                state.changepoint = update.state;
                Ok((update.output, false))
            }
            Err(RegimeError::ChangepointOverflow { asset, detail }) => {
                error!(asset = %asset, detail = %detail, "Changepoint state overflowed, resetting");
                let fresh = self.detector.initial_state(&state.asset_id);
                let update = self.detector.update(&fresh, x)?;
                state.changepoint = update.state;
                Ok((update.output, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Compute successor models without publishing them.
    fn stage_models(
        &self,
        models: &BTreeMap<AssetClass, Arc<RegimeModel>>,
        days: &[AssetDay],
        date: NaiveDate,
    ) -> (Vec<(AssetClass, RegimeModel)>, BTreeMap<AssetClass, ModelOutcome>) {
        let mut contributions: BTreeMap<AssetClass, Vec<DailyContribution>> = BTreeMap::new();
        for day in days {
            if let Some(c) = &day.contribution {
                contributions
                    .entry(day.state.asset_class)
                    .or_default()
                    .push(c.clone());
            }
        }

        let mut staged = Vec::new();
        let mut outcomes = BTreeMap::new();
        for (class, model) in models {
            let aggregate = contributions
                .get(class)
                .and_then(|cs| OnlineEmUpdater::aggregate(cs));
            let Some(aggregate) = aggregate else {
                outcomes.insert(*class, ModelOutcome::NoData);
                continue;
            };
            match self.updater.update(model, &aggregate, date) {
                Ok(next) => staged.push((*class, next)),
                Err(e) => {
                    warn!(
                        asset_class = %class,
                        %date,
                        kept_version = model.version,
                        error = %e,
                        "Rejected model update"
                    );
                    outcomes.insert(
                        *class,
                        ModelOutcome::Rejected {
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }
        (staged, outcomes)
    }
}

fn model_for(
    models: &BTreeMap<AssetClass, Arc<RegimeModel>>,
    class: AssetClass,
) -> RegimeResult<&Arc<RegimeModel>> {
    models.get(&class).ok_or(RegimeError::UnknownAssetClass(class))
}

fn build_record(
    day: &AssetDay,
    features: &FeatureVector,
    model: &RegimeModel,
    supersedes: Option<String>,
) -> RegimeRecord {
    let (regime_label, confidence, override_reason) = match &day.decision {
        Some(decision) => (decision.label, decision.confidence, Some(decision.reason.clone())),
        None => (
            day.hysteresis_label,
            day.inference.state_probabilities[day.confirmed_state],
            None,
        ),
    };
    let feature_fingerprint = features.fingerprint();
    RegimeRecord {
        asset_id: features.asset_id.clone(),
        date: features.date,
        regime_label,
        confidence,
        override_applied: day.decision.is_some(),
        override_reason,
        hysteresis_label: day.hysteresis_label,
        model_id: model.model_id.clone(),
        model_version: model.version,
        lineage_hash: lineage_hash(&model.model_id, model.version, &feature_fingerprint),
        feature_fingerprint,
        supersedes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{build_feed, InMemoryFeed, OhlcvBar, Segment, SyntheticPath};
    use crate::learning::OnlineEmConfig;
    use crate::regime::{OverrideCondition, OverrideRule, OverrideTable};
    use approx::assert_abs_diff_eq;
    use rust_decimal::Decimal;

    /// Store that fails the next `failures` writes.
    #[derive(Default)]
    struct FlakySink {
        inner: InMemoryRecordStore,
        failures: usize,
    }

    impl FlakySink {
        fn fail(&mut self) -> RegimeResult<()> {
            if self.failures == 0 {
                return Ok(());
            }
            self.failures -= 1;
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
        }
    }

    impl RecordSink for FlakySink {
        fn append(&mut self, record: RegimeRecord) -> RegimeResult<()> {
            self.fail()?;
            self.inner.append(record)
        }

        fn append_batch(&mut self, records: Vec<RegimeRecord>) -> RegimeResult<()> {
            self.fail()?;
            self.inner.append_batch(records)
        }

        fn latest(&self, asset_id: &str, date: NaiveDate) -> Option<&RegimeRecord> {
            self.inner.latest(asset_id, date)
        }
    }

    fn flaky(failures: usize) -> RegimeOrchestrator<InMemoryModelRegistry, FlakySink> {
        let config = EngineConfig::new(1.0 / 250.0, 3);
        let registry =
            InMemoryModelRegistry::with_initial_models(&config.model, &config.features.covariates)
                .unwrap();
        let sink = FlakySink {
            failures,
            ..FlakySink::default()
        };
        RegimeOrchestrator::new(config, registry, sink).unwrap()
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
    }

    fn feed(days: usize) -> InMemoryFeed {
        let paths = [
            SyntheticPath::new("SPY", start(), 1).segment(Segment::new(days, 0.001, 0.01)),
            SyntheticPath::new("QQQ", start(), 2).segment(Segment::new(days, 0.0015, 0.012)),
            SyntheticPath::new("BTC-USD", start(), 3).segment(Segment::new(days, 0.002, 0.03)),
        ];
        build_feed(&paths, &["liquidity", "credit_spread", "dollar_index"], 7)
    }

    fn orchestrator() -> RegimeOrchestrator<InMemoryModelRegistry, InMemoryRecordStore> {
        RegimeOrchestrator::in_memory(EngineConfig::new(1.0 / 250.0, 3)).unwrap()
    }

    fn day(n: i64) -> NaiveDate {
        start() + chrono::Duration::days(n)
    }

    #[test]
    fn test_warmup_days_are_skipped() {
        let feed = feed(100);
        let mut orch = orchestrator();
        let report = orch.run_day(&feed, day(10)).unwrap();
        assert!(report.records.is_empty());
        assert_eq!(report.skipped.len(), 3);
        assert!(report.skipped.iter().all(|s| s.kind == "insufficient_history"));
        assert!(report.model_outcomes.values().all(|o| *o == ModelOutcome::NoData));
        assert_eq!(orch.last_committed(), Some(day(10)));
    }

    #[test]
    fn test_day_publishes_one_model_per_class() {
        let feed = feed(100);
        let mut orch = orchestrator();
        let report = orch.run_day(&feed, day(90)).unwrap();

        assert_eq!(report.records.len(), 3);
        assert_eq!(
            report.model_outcomes.get(&AssetClass::Equity),
            Some(&ModelOutcome::Published { version: 2 })
        );
        assert_eq!(
            report.model_outcomes.get(&AssetClass::Crypto),
            Some(&ModelOutcome::Published { version: 2 })
        );
        // Records carry the model that was active during the day.
        assert!(report.records.iter().all(|r| r.model_version == 1));
        assert_eq!(orch.registry().load_active(AssetClass::Equity).unwrap().version, 2);
        assert_eq!(orch.registry().load_active(AssetClass::Fx).unwrap().version, 1);
    }

    #[test]
    fn test_rejects_out_of_order_days() {
        let feed = feed(100);
        let mut orch = orchestrator();
        orch.run_day(&feed, day(90)).unwrap();
        for date in [day(90), day(85)] {
            let err = orch.run_day(&feed, date).unwrap_err();
            assert!(matches!(err, RegimeError::OutOfOrderDay { .. }));
        }
        assert_eq!(orch.sink().len(), 3);
    }

    #[test]
    fn test_one_failing_asset_does_not_abort_day() {
        let mut feed = feed(100);
        // A non-positive close poisons only this asset.
        feed.insert_bar(
            "QQQ",
            OhlcvBar {
                date: day(90),
                open: Decimal::ONE,
                high: Decimal::ONE,
                low: Decimal::ZERO,
                close: Decimal::ZERO,
                volume: 0,
            },
        );
        let mut orch = orchestrator();
        let report = orch.run_day(&feed, day(90)).unwrap();
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].asset_id, "QQQ");
        assert_eq!(report.skipped[0].kind, "numerical_instability");
        assert!(orch.asset_state("QQQ").is_none());
    }

    #[test]
    fn test_override_is_recorded_in_parallel() {
        let mut feed = feed(100);
        feed.insert_signal("SPY", day(90), "fragility", 0.95);
        let rules = OverrideTable::new(vec![OverrideRule {
            name: "fragility".to_string(),
            condition: OverrideCondition::SignalAbove {
                signal: "fragility".to_string(),
                threshold: 0.8,
            },
            label: RegimeLabel::Stress,
            confidence: 0.9,
            asset_classes: vec![],
        }]);
        let config = EngineConfig::new(1.0 / 250.0, 3).with_overrides(rules);
        let mut orch = RegimeOrchestrator::in_memory(config).unwrap();
        let report = orch.run_day(&feed, day(90)).unwrap();

        let spy = report.records.iter().find(|r| r.asset_id == "SPY").unwrap();
        assert!(spy.override_applied);
        assert_eq!(spy.regime_label, RegimeLabel::Stress);
        assert_eq!(spy.confidence, 0.9);
        assert!(spy.override_reason.as_deref().unwrap().starts_with("fragility"));

        let qqq = report.records.iter().find(|r| r.asset_id == "QQQ").unwrap();
        assert!(!qqq.override_applied);
        assert_eq!(qqq.regime_label, qqq.hysteresis_label);
    }

    #[test]
    fn test_restate_last_day_supersedes() {
        let mut feed = feed(100);
        let mut orch = orchestrator();
        orch.run_day(&feed, day(89)).unwrap();
        let report = orch.run_day(&feed, day(90)).unwrap();
        let original = report
            .records
            .iter()
            .find(|r| r.asset_id == "SPY")
            .unwrap()
            .clone();

        // Unchanged inputs: nothing to restate.
        assert!(orch.restate_last_day(&feed, "SPY").unwrap().is_none());

        let bars = feed.bars_through("SPY", day(90), 1);
        let mut corrected = bars[0].clone();
        corrected.close = corrected.close * Decimal::new(97, 2);
        feed.insert_bar("SPY", corrected);

        let restated = orch.restate_last_day(&feed, "SPY").unwrap().unwrap();
        assert_eq!(restated.supersedes.as_deref(), Some(original.lineage_hash.as_str()));
        assert_ne!(restated.lineage_hash, original.lineage_hash);
        assert_eq!(restated.model_version, original.model_version);
        assert!(restated.feature_fingerprint.ends_with(":v2"));
        assert_eq!(orch.sink().versions("SPY", day(90)).len(), 2);
        assert_eq!(orch.feature_store().history("SPY", day(90)).len(), 2);
        assert!(orch.restate_last_day(&feed, "GLD").unwrap().is_none());
    }

    #[test]
    fn test_failed_write_leaves_day_uncommitted() {
        let feed = feed(100);
        let mut orch = flaky(1);

        let err = orch.run_day(&feed, day(90)).unwrap_err();
        assert!(matches!(err, RegimeError::Io(_)));
        assert!(orch.sink().inner.is_empty());
        assert!(orch.feature_store().is_empty());
        assert!(orch.asset_state("SPY").is_none());
        assert_eq!(orch.last_committed(), None);
        assert_eq!(orch.registry().load_active(AssetClass::Equity).unwrap().version, 1);

        // The same day goes through once the sink recovers.
        let report = orch.run_day(&feed, day(90)).unwrap();
        assert_eq!(report.records.len(), 3);
        assert_eq!(orch.sink().inner.len(), 3);
        assert_eq!(orch.last_committed(), Some(day(90)));
        assert_eq!(orch.registry().load_active(AssetClass::Equity).unwrap().version, 2);
    }

    #[test]
    fn test_failed_restatement_keeps_feature_versions() {
        let mut feed = feed(100);
        let mut orch = flaky(0);
        orch.run_day(&feed, day(90)).unwrap();
        let state = orch.asset_state("SPY").cloned();

        let mut corrected = feed.bars_through("SPY", day(90), 1)[0].clone();
        corrected.close = corrected.close * Decimal::new(97, 2);
        feed.insert_bar("SPY", corrected);

        orch.sink.failures = 1;
        assert!(orch.restate_last_day(&feed, "SPY").is_err());
        assert_eq!(orch.feature_store().history("SPY", day(90)).len(), 1);
        assert_eq!(orch.asset_state("SPY").cloned(), state);

        let restated = orch.restate_last_day(&feed, "SPY").unwrap().unwrap();
        assert!(restated.feature_fingerprint.ends_with(":v2"));
        assert_eq!(orch.feature_store().history("SPY", day(90)).len(), 2);
    }

    #[test]
    fn test_corrupted_changepoint_state_is_reset() {
        let feed = feed(100);
        let mut orch = orchestrator();
        orch.run_day(&feed, day(89)).unwrap();
        if let Some(state) = orch.assets.get_mut("SPY") {
            state.changepoint.run_length_distribution = vec![0.0];
        }

        let report = orch.run_day(&feed, day(90)).unwrap();
        assert_eq!(report.changepoint_resets, vec!["SPY".to_string()]);
        assert!(report.skipped.is_empty());
        assert!(report.records.iter().any(|r| r.asset_id == "SPY"));

        let changepoint = &orch.asset_state("SPY").unwrap().changepoint;
        assert_eq!(changepoint.observations, 1);
        assert_abs_diff_eq!(
            changepoint.run_length_distribution.iter().sum::<f64>(),
            1.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_rejected_class_keeps_its_version() {
        // Full first step with no prior pseudo-counts collapses a state onto
        // a single observation.
        let mut config = EngineConfig::new(1.0 / 250.0, 3);
        config.online_em = OnlineEmConfig {
            alpha: 1.0,
            stepsize_offset: 0.0,
            prior_strength: 0.0,
            ..OnlineEmConfig::default()
        };
        let mut registry = InMemoryModelRegistry::new();
        for class in AssetClass::ALL {
            let covariates = config.features.covariates.for_class(class).len();
            let mut model = RegimeModel::initial(class, &config.model, covariates).unwrap();
            if class == AssetClass::Crypto {
                // A long-lived model only moves by a small step.
                model.statistics.updates = 10_000;
            }
            registry.publish(model).unwrap();
        }
        let mut orch = RegimeOrchestrator::new(config, registry, InMemoryRecordStore::new()).unwrap();

        let paths = [
            SyntheticPath::new("SPY", start(), 1).segment(Segment::new(100, 0.001, 0.01)),
            SyntheticPath::new("BTC-USD", start(), 3).segment(Segment::new(100, 0.002, 0.03)),
        ];
        let feed = build_feed(&paths, &["liquidity", "credit_spread", "dollar_index"], 7);
        let report = orch.run_day(&feed, day(90)).unwrap();

        assert!(matches!(
            report.model_outcomes.get(&AssetClass::Equity),
            Some(ModelOutcome::Rejected { .. })
        ));
        assert_eq!(
            report.model_outcomes.get(&AssetClass::Crypto),
            Some(&ModelOutcome::Published { version: 2 })
        );
        assert_eq!(report.records.len(), 2);
        assert!(report.records.iter().all(|r| r.model_version == 1));
        assert_eq!(orch.registry().load_active(AssetClass::Equity).unwrap().version, 1);
        assert_eq!(orch.registry().load_active(AssetClass::Crypto).unwrap().version, 2);

        // The next day still runs against the kept version.
        let report = orch.run_day(&feed, day(91)).unwrap();
        let spy = report.records.iter().find(|r| r.asset_id == "SPY").unwrap();
        assert_eq!(spy.model_version, 1);
    }
}
