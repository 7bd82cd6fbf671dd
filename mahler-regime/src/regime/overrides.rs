//! Hard override rules.
//!
//! An ordered table of predicate -> label pairs. Rules are evaluated in
//! declaration order and the first match wins. Evaluation is pure: it reads
//! the day's features and external risk signals and never touches the
//! hysteresis buffer.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::label::RegimeLabel;
use crate::data::{AssetClass, RiskSignals};
use crate::error::{RegimeError, RegimeResult};
use crate::features::FeatureVector;

/// Override condition. Thresholds are required in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverrideCondition {
    /// External risk signal strictly above `threshold`. Missing signals never match.
    SignalAbove { signal: String, threshold: f64 },
    SignalBelow { signal: String, threshold: f64 },
    /// Fractional drawdown from the trailing peak strictly below `threshold`.
    DrawdownBelow { threshold: f64 },
    /// Normalized short-window volatility strictly above `threshold`.
    VolatilityZAbove { threshold: f64 },
    All { conditions: Vec<OverrideCondition> },
    Any { conditions: Vec<OverrideCondition> },
}

impl OverrideCondition {
    pub fn matches(&self, ctx: &OverrideContext<'_>) -> bool {
        match self {
            Self::SignalAbove { signal, threshold } => {
                ctx.signal(signal).map_or(false, |v| v > *threshold)
            }
            Self::SignalBelow { signal, threshold } => {
                ctx.signal(signal).map_or(false, |v| v < *threshold)
            }
            Self::DrawdownBelow { threshold } => ctx.features.raw.drawdown < *threshold,
            Self::VolatilityZAbove { threshold } => {
                ctx.features.normalized.volatility_z > *threshold
            }
            Self::All { conditions } => conditions.iter().all(|c| c.matches(ctx)),
            Self::Any { conditions } => conditions.iter().any(|c| c.matches(ctx)),
        }
    }

    /// Human-readable description with the observed values.
    pub fn describe(&self, ctx: &OverrideContext<'_>) -> String {
        let observed = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v));
        match self {
            Self::SignalAbove { signal, threshold } => {
                format!("{} {} > {}", signal, observed(ctx.signal(signal)), threshold)
            }
            Self::SignalBelow { signal, threshold } => {
                format!("{} {} < {}", signal, observed(ctx.signal(signal)), threshold)
            }
            Self::DrawdownBelow { threshold } => {
                format!("drawdown {:.4} < {}", ctx.features.raw.drawdown, threshold)
            }
            Self::VolatilityZAbove { threshold } => format!(
                "volatility_z {:.4} > {}",
                ctx.features.normalized.volatility_z, threshold
            ),
            Self::All { conditions } => join(conditions, " and ", ctx),
            Self::Any { conditions } => join(
                &conditions
                    .iter()
                    .filter(|c| c.matches(ctx))
                    .cloned()
                    .collect::<Vec<_>>(),
                " or ",
                ctx,
            ),
        }
    }

    fn validate(&self, rule: &str) -> RegimeResult<()> {
        let invalid = |msg: &str| Err(RegimeError::InvalidConfig(format!("override {}: {}", rule, msg)));
        match self {
            Self::SignalAbove { signal, threshold } | Self::SignalBelow { signal, threshold } => {
                if signal.is_empty() {
                    return invalid("signal name is empty");
                }
                if !threshold.is_finite() {
                    return invalid("threshold must be finite");
                }
            }
            Self::DrawdownBelow { threshold } | Self::VolatilityZAbove { threshold } => {
                if !threshold.is_finite() {
                    return invalid("threshold must be finite");
                }
            }
            Self::All { conditions } | Self::Any { conditions } => {
                if conditions.is_empty() {
                    return invalid("condition group is empty");
                }
                for c in conditions {
                    c.validate(rule)?;
                }
            }
        }
        Ok(())
    }
}

fn join(conditions: &[OverrideCondition], sep: &str, ctx: &OverrideContext<'_>) -> String {
    conditions
        .iter()
        .map(|c| c.describe(ctx))
        .collect::<Vec<_>>()
        .join(sep)
}

fn default_confidence() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRule {
    pub name: String,
    pub condition: OverrideCondition,
    /// Forced label.
    pub label: RegimeLabel,
    /// Confidence reported for overridden records.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Asset classes the rule applies to; empty means all.
    #[serde(default)]
    pub asset_classes: Vec<AssetClass>,
}

impl OverrideRule {
    pub fn applies_to(&self, class: AssetClass) -> bool {
        self.asset_classes.is_empty() || self.asset_classes.contains(&class)
    }
}

/// Inputs a rule may read.
#[derive(Debug, Clone, Copy)]
pub struct OverrideContext<'a> {
    pub asset_class: AssetClass,
    pub features: &'a FeatureVector,
    pub signals: &'a RiskSignals,
}

impl OverrideContext<'_> {
    fn signal(&self, name: &str) -> Option<f64> {
        self.signals.get(name).copied().filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideDecision {
    pub rule: String,
    pub label: RegimeLabel,
    pub confidence: f64,
    pub reason: String,
}

/// Ordered rule table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverrideTable {
    rules: Vec<OverrideRule>,
}

impl OverrideTable {
    pub fn new(rules: Vec<OverrideRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[OverrideRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First matching rule in declaration order.
    pub fn evaluate(&self, ctx: &OverrideContext<'_>) -> Option<OverrideDecision> {
        self.rules
            .iter()
            .filter(|rule| rule.applies_to(ctx.asset_class))
            .find(|rule| rule.condition.matches(ctx))
            .map(|rule| OverrideDecision {
                rule: rule.name.clone(),
                label: rule.label,
                confidence: rule.confidence,
                reason: format!("{}: {}", rule.name, rule.condition.describe(ctx)),
            })
    }

    /// Names unique, thresholds finite, confidence in `[0, 1]`, labels
    /// available for the model's state count.
    pub fn validate(&self, state_count: usize) -> RegimeResult<()> {
        let mut names = HashSet::new();
        for rule in &self.rules {
            if rule.name.is_empty() || !names.insert(rule.name.as_str()) {
                return Err(RegimeError::InvalidConfig(format!(
                    "override rule name {:?} is empty or duplicated",
                    rule.name
                )));
            }
            if !(0.0..=1.0).contains(&rule.confidence) {
                return Err(RegimeError::InvalidConfig(format!(
                    "override {}: confidence {} outside [0, 1]",
                    rule.name, rule.confidence
                )));
            }
            if rule.label.state_index(state_count).is_none() {
                return Err(RegimeError::InvalidConfig(format!(
                    "override {}: label {} not available with {} states",
                    rule.name, rule.label, state_count
                )));
            }
            rule.condition.validate(&rule.name)?;
        }
        Ok(())
    }
}
