//! Seeded synthetic price paths for scenarios and demos.
//!
//! A path is a list of segments, each with its own daily drift and volatility
//! of log returns. The first day of a segment can carry an extra shock.

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::feed::InMemoryFeed;
use super::types::{MacroSnapshot, OhlcvBar};

/// A stretch of days with stationary return dynamics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub days: usize,
    /// Mean daily log return.
    pub drift: f64,
    /// Daily log return standard deviation.
    pub volatility: f64,
    /// Extra log return added on the first day of the segment.
    #[serde(default)]
    pub shock: f64,
}

impl Segment {
    pub fn new(days: usize, drift: f64, volatility: f64) -> Self {
        Self {
            days,
            drift,
            volatility,
            shock: 0.0,
        }
    }

    pub fn with_shock(mut self, shock: f64) -> Self {
        self.shock = shock;
        self
    }
}

/// Synthetic daily price path for one asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticPath {
    pub asset: String,
    pub start: NaiveDate,
    pub start_price: f64,
    pub segments: Vec<Segment>,
    pub seed: u64,
}

impl SyntheticPath {
    pub fn new(asset: &str, start: NaiveDate, seed: u64) -> Self {
        Self {
            asset: asset.to_string(),
            start,
            start_price: 100.0,
            segments: Vec::new(),
            seed,
        }
    }

    pub fn segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn total_days(&self) -> usize {
        self.segments.iter().map(|s| s.days).sum()
    }

    /// Generate one bar per calendar day.
    pub fn bars(&self) -> Vec<OhlcvBar> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut bars = Vec::with_capacity(self.total_days());
        let mut prev_close = self.start_price;
        let mut date = self.start;

        for segment in &self.segments {
            for i in 0..segment.days {
                let z: f64 = rng.sample(StandardNormal);
                let mut log_return = segment.drift + segment.volatility * z;
                if i == 0 {
                    log_return += segment.shock;
                }

                let open = prev_close;
                let close = prev_close * log_return.exp();
                let wick: f64 = rng.sample::<f64, _>(StandardNormal).abs() * segment.volatility * 0.5;
                let high = open.max(close) * (1.0 + wick);
                let low = open.min(close) * (1.0 - wick).max(0.5);
                let volume = 1_000_000 + (rng.gen::<f64>() * 250_000.0) as i64;

                bars.push(OhlcvBar {
                    date,
                    open: to_price(open),
                    high: to_price(high),
                    low: to_price(low),
                    close: to_price(close),
                    volume,
                });

                prev_close = close;
                date += Duration::days(1);
            }
        }

        bars
    }
}

fn to_price(value: f64) -> Decimal {
    Decimal::from_f64_retain(value)
        .unwrap_or_default()
        .round_dp(6)
}

/// Slowly mean-reverting macro covariates, one snapshot per day.
pub fn macro_series(start: NaiveDate, days: usize, names: &[&str], seed: u64) -> Vec<MacroSnapshot> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut levels = vec![0.0_f64; names.len()];
    let mut snapshots = Vec::with_capacity(days);

    for d in 0..days {
        let mut snapshot = MacroSnapshot::new(start + Duration::days(d as i64));
        for (level, name) in levels.iter_mut().zip(names) {
            let z: f64 = rng.sample(StandardNormal);
            *level = 0.97 * *level + 0.1 * z;
            snapshot.values.insert((*name).to_string(), *level);
        }
        snapshots.push(snapshot);
    }

    snapshots
}

/// Build a feed from paths plus a shared macro series covering the longest path.
pub fn build_feed(paths: &[SyntheticPath], macro_names: &[&str], seed: u64) -> InMemoryFeed {
    let mut feed = InMemoryFeed::new();
    let mut start: Option<NaiveDate> = None;
    let mut end: Option<NaiveDate> = None;

    for path in paths {
        for bar in path.bars() {
            start = Some(start.map_or(bar.date, |s| s.min(bar.date)));
            end = Some(end.map_or(bar.date, |e| e.max(bar.date)));
            feed.insert_bar(&path.asset, bar);
        }
    }

    if let (Some(start), Some(end)) = (start, end) {
        let days = (end - start).num_days() as usize + 1;
        for snapshot in macro_series(start, days, macro_names, seed) {
            feed.insert_macro(snapshot);
        }
    }

    feed
}
