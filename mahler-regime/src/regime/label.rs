//! Regime labels.
//!
//! Latent state `i` of a model with `n` states carries label
//! `RegimeLabel::for_state_count(n)[i]`:
//! - 3 states: Bull, Neutral, Bear
//! - 4 states: Bull, Neutral, Bear, Stress

use std::fmt;

use serde::{Deserialize, Serialize};

/// Market regime label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegimeLabel {
    /// Positive trend, ordinary volatility.
    Bull,
    /// No persistent trend.
    Neutral,
    /// Negative trend.
    Bear,
    /// Volatility shock, typically with sharp drawdowns.
    Stress,
}

static THREE_STATES: [RegimeLabel; 3] = [RegimeLabel::Bull, RegimeLabel::Neutral, RegimeLabel::Bear];
static FOUR_STATES: [RegimeLabel; 4] = [
    RegimeLabel::Bull,
    RegimeLabel::Neutral,
    RegimeLabel::Bear,
    RegimeLabel::Stress,
];

impl RegimeLabel {
    /// Labels for a model with `state_count` states. `None` outside 3..=4.
    pub fn for_state_count(state_count: usize) -> Option<&'static [RegimeLabel]> {
        match state_count {
            3 => Some(&THREE_STATES[..]),
            4 => Some(&FOUR_STATES[..]),
            _ => None,
        }
    }

    /// State index of this label in a model with `state_count` states.
    pub fn state_index(&self, state_count: usize) -> Option<usize> {
        Self::for_state_count(state_count)?
            .iter()
            .position(|l| l == self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bull => "BULL",
            Self::Neutral => "NEUTRAL",
            Self::Bear => "BEAR",
            Self::Stress => "STRESS",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Bull => "Upward trending market",
            Self::Neutral => "Range-bound market",
            Self::Bear => "Downward trending market",
            Self::Stress => "Market under stress",
        }
    }
}

impl fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
