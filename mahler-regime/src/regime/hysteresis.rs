//! Confirmation filter over daily argmax states.
//!
//! The confirmed state only changes after `k` consecutive days proposing the
//! same alternative. Any day agreeing with the confirmed state clears the
//! pending candidate; a different candidate restarts the count at 1.

use serde::{Deserialize, Serialize};

use crate::error::{RegimeError, RegimeResult};
use crate::inference::RegimeInference;

/// Confirmation threshold. Required in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HysteresisConfig {
    pub k: usize,
}

impl HysteresisConfig {
    pub fn validate(&self) -> RegimeResult<()> {
        if self.k == 0 {
            return Err(RegimeError::InvalidConfig(
                "hysteresis k must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HysteresisBuffer {
    pub asset_id: String,
    /// `None` until the first observation.
    pub confirmed_state: Option<usize>,
    pub pending_state: Option<usize>,
    pub pending_run_length: usize,
    pub k: usize,
}

/// What one observation did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum HysteresisTransition {
    /// First observation, confirmed directly.
    ColdStart { state: usize },
    /// Observation agreed with the confirmed state.
    Held { state: usize },
    /// Alternative proposed, not yet confirmed.
    Pending {
        confirmed: usize,
        candidate: usize,
        run_length: usize,
    },
    Confirmed { from: usize, to: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HysteresisFilter {
    buffer: HysteresisBuffer,
}

impl HysteresisFilter {
    pub fn new(asset_id: &str, k: usize) -> Self {
        Self {
            buffer: HysteresisBuffer {
                asset_id: asset_id.to_string(),
                confirmed_state: None,
                pending_state: None,
                pending_run_length: 0,
                k: k.max(1),
            },
        }
    }

    pub fn buffer(&self) -> &HysteresisBuffer {
        &self.buffer
    }

    pub fn confirmed_state(&self) -> Option<usize> {
        self.buffer.confirmed_state
    }

    pub fn observe(&mut self, inference: &RegimeInference) -> HysteresisTransition {
        let proposed = inference.raw_argmax_state;
        let buffer = &mut self.buffer;

        let Some(confirmed) = buffer.confirmed_state else {
            buffer.confirmed_state = Some(proposed);
            buffer.pending_state = None;
            buffer.pending_run_length = 0;
            return HysteresisTransition::ColdStart { state: proposed };
        };

        if proposed == confirmed {
            buffer.pending_state = None;
            buffer.pending_run_length = 0;
            return HysteresisTransition::Held { state: confirmed };
        }

        if buffer.pending_state == Some(proposed) {
            buffer.pending_run_length += 1;
        } else {
            buffer.pending_state = Some(proposed);
            buffer.pending_run_length = 1;
        }

        if buffer.pending_run_length >= buffer.k {
            buffer.confirmed_state = Some(proposed);
            buffer.pending_state = None;
            buffer.pending_run_length = 0;
            return HysteresisTransition::Confirmed {
                from: confirmed,
                to: proposed,
            };
        }

        HysteresisTransition::Pending {
            confirmed,
            candidate: proposed,
            run_length: buffer.pending_run_length,
        }
    }
}
