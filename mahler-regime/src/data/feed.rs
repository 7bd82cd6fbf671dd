//! Read-only market feed consumed by the engine.
//!
//! The ingestion collaborator owns fetching and storage; the engine only sees
//! immutable bars and snapshots addressable by (asset, date).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::RegimeResult;

use super::types::{MacroSnapshot, OhlcvBar, RiskSignals};

/// Point-in-time access to daily inputs.
///
/// Implementations must never return data dated after the requested day.
pub trait MarketFeed: Sync {
    /// Assets with a bar on `date`, in deterministic (sorted) order.
    fn assets_on(&self, date: NaiveDate) -> Vec<String>;

    /// Up to `lookback` most recent bars for `asset` dated on or before `date`,
    /// oldest first.
    fn bars_through(&self, asset: &str, date: NaiveDate, lookback: usize) -> Vec<OhlcvBar>;

    /// Up to `lookback` most recent macro snapshots available on or before
    /// `date`, oldest first.
    fn macro_history(&self, date: NaiveDate, lookback: usize) -> Vec<MacroSnapshot>;

    /// Risk signals published for `asset` on `date`.
    fn risk_signals(&self, asset: &str, date: NaiveDate) -> RiskSignals;

    /// Every date with at least one bar, ascending.
    fn trading_dates(&self) -> Vec<NaiveDate>;
}

/// Feed held fully in memory. Used by the replay binary and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryFeed {
    /// Bars per asset, sorted by date, one per date.
    #[serde(default)]
    bars: BTreeMap<String, Vec<OhlcvBar>>,

    /// Macro snapshots sorted by `as_of`, one per date.
    #[serde(default)]
    macro_snapshots: Vec<MacroSnapshot>,

    /// Risk signals per asset per date.
    #[serde(default)]
    signals: BTreeMap<String, BTreeMap<NaiveDate, RiskSignals>>,
}

impl InMemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a feed from JSON.
    pub fn from_json_str(json: &str) -> RegimeResult<Self> {
        let mut feed: Self = serde_json::from_str(json)?;
        feed.normalize();
        Ok(feed)
    }

    /// Load a feed from a JSON file.
    pub fn from_file(path: &Path) -> RegimeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json(&self) -> RegimeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Insert a bar. A bar for an existing date replaces it (a vendor correction).
    pub fn insert_bar(&mut self, asset: &str, bar: OhlcvBar) {
        let series = self.bars.entry(asset.to_string()).or_default();
        match series.binary_search_by_key(&bar.date, |b| b.date) {
            Ok(idx) => series[idx] = bar,
            Err(idx) => series.insert(idx, bar),
        }
    }

    pub fn insert_macro(&mut self, snapshot: MacroSnapshot) {
        match self
            .macro_snapshots
            .binary_search_by_key(&snapshot.as_of, |s| s.as_of)
        {
            Ok(idx) => self.macro_snapshots[idx] = snapshot,
            Err(idx) => self.macro_snapshots.insert(idx, snapshot),
        }
    }

    pub fn insert_signal(&mut self, asset: &str, date: NaiveDate, name: &str, value: f64) {
        self.signals
            .entry(asset.to_string())
            .or_default()
            .entry(date)
            .or_default()
            .insert(name.to_string(), value);
    }

    /// Number of assets with at least one bar.
    pub fn asset_count(&self) -> usize {
        self.bars.len()
    }

    /// Sort and deduplicate after deserialization.
    fn normalize(&mut self) {
        for series in self.bars.values_mut() {
            series.sort_by_key(|b| b.date);
            series.dedup_by_key(|b| b.date);
        }
        self.macro_snapshots.sort_by_key(|s| s.as_of);
        self.macro_snapshots.dedup_by_key(|s| s.as_of);
    }
}

impl MarketFeed for InMemoryFeed {
    fn assets_on(&self, date: NaiveDate) -> Vec<String> {
        self.bars
            .iter()
            .filter(|(_, series)| series.binary_search_by_key(&date, |b| b.date).is_ok())
            .map(|(asset, _)| asset.clone())
            .collect()
    }

    fn bars_through(&self, asset: &str, date: NaiveDate, lookback: usize) -> Vec<OhlcvBar> {
        let Some(series) = self.bars.get(asset) else {
            return Vec::new();
        };
        let end = series.partition_point(|b| b.date <= date);
        let start = end.saturating_sub(lookback);
        series[start..end].to_vec()
    }

    fn macro_history(&self, date: NaiveDate, lookback: usize) -> Vec<MacroSnapshot> {
        let end = self.macro_snapshots.partition_point(|s| s.as_of <= date);
        let start = end.saturating_sub(lookback);
        self.macro_snapshots[start..end].to_vec()
    }

    fn risk_signals(&self, asset: &str, date: NaiveDate) -> RiskSignals {
        self.signals
            .get(asset)
            .and_then(|by_date| by_date.get(&date))
            .cloned()
            .unwrap_or_default()
    }

    fn trading_dates(&self) -> Vec<NaiveDate> {
        let dates: BTreeSet<NaiveDate> = self
            .bars
            .values()
            .flat_map(|series| series.iter().map(|b| b.date))
            .collect();
        dates.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn bar(date: NaiveDate, close: i64) -> OhlcvBar {
        let px = Decimal::from(close);
        OhlcvBar {
            date,
            open: px,
            high: px,
            low: px,
            close: px,
            volume: 100,
        }
    }

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(n)
    }

    #[test]
    fn test_bars_through_is_point_in_time() {
        let mut feed = InMemoryFeed::new();
        for i in 0..10 {
            feed.insert_bar("SPY", bar(day(i), 100 + i));
        }

        let bars = feed.bars_through("SPY", day(5), 3);
        assert_eq!(bars.len(), 3);
        assert_eq!(bars.last().unwrap().date, day(5));
        assert_eq!(bars.first().unwrap().date, day(3));
        assert!(feed.bars_through("QQQ", day(5), 3).is_empty());
    }

    #[test]
    fn test_insert_bar_replaces_same_date() {
        let mut feed = InMemoryFeed::new();
        feed.insert_bar("SPY", bar(day(0), 100));
        feed.insert_bar("SPY", bar(day(0), 105));
        let bars = feed.bars_through("SPY", day(0), 10);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, Decimal::from(105));
    }

    #[test]
    fn test_assets_on_and_dates() {
        let mut feed = InMemoryFeed::new();
        feed.insert_bar("SPY", bar(day(0), 100));
        feed.insert_bar("SPY", bar(day(1), 101));
        feed.insert_bar("BTC-USD", bar(day(1), 40_000));

        assert_eq!(feed.assets_on(day(0)), vec!["SPY".to_string()]);
        assert_eq!(feed.assets_on(day(1)).len(), 2);
        assert_eq!(feed.trading_dates(), vec![day(0), day(1)]);
    }

    #[test]
    fn test_macro_history_and_signals() {
        let mut feed = InMemoryFeed::new();
        for i in 0..5 {
            feed.insert_macro(MacroSnapshot::new(day(i)).with_value("liquidity", i as f64));
        }
        feed.insert_signal("SPY", day(2), "fragility", 0.9);

        let hist = feed.macro_history(day(2), 10);
        assert_eq!(hist.len(), 3);
        assert_eq!(hist.last().unwrap().get("liquidity"), Some(2.0));
        assert_eq!(feed.risk_signals("SPY", day(2)).get("fragility"), Some(&0.9));
        assert!(feed.risk_signals("SPY", day(3)).is_empty());
    }

    #[test]
    fn test_json_roundtrip_normalizes() {
        let mut feed = InMemoryFeed::new();
        feed.insert_bar("SPY", bar(day(1), 101));
        feed.insert_bar("SPY", bar(day(0), 100));
        let json = feed.to_json().unwrap();
        let parsed = InMemoryFeed::from_json_str(&json).unwrap();
        assert_eq!(parsed.trading_dates(), vec![day(0), day(1)]);
    }
}
