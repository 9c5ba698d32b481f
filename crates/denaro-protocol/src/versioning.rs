//! Activation-height consensus versioning.
//!
//! A monotonic table of `(activation_height, version)` entries selects the
//! rule set for a given height. Version 0 covers genesis. Activations are
//! inclusive lower bounds.

use denaro_types::NodeError;

/// Rule knobs that vary across consensus versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusRules {
    pub version: u16,
    pub activation_height: u64,
    /// How far into the future a block timestamp may run, in seconds.
    pub max_future_skew_secs: u64,
    /// How far below the parent timestamp a block may fall, in seconds.
    pub max_past_drift_secs: u64,
}

impl ConsensusRules {
    /// Timestamp monotonicity and skew check.
    pub fn timestamp_ok(&self, timestamp: u64, parent_timestamp: Option<u64>, now: u64) -> bool {
        if let Some(parent) = parent_timestamp {
            if timestamp + self.max_past_drift_secs < parent {
                return false;
            }
        }
        timestamp <= now + self.max_future_skew_secs
    }
}

/// The ordered activation table.
#[derive(Debug, Clone)]
pub struct ConsensusSchedule {
    entries: Vec<ConsensusRules>,
}

impl ConsensusSchedule {
    /// Build from entries; activations and versions must be strictly
    /// increasing and the table must cover height 1.
    pub fn new(entries: Vec<ConsensusRules>) -> Result<ConsensusSchedule, NodeError> {
        if entries.first().map(|e| e.activation_height) != Some(1) {
            return Err(NodeError::Internal(
                "consensus schedule must activate version 0 at height 1".into(),
            ));
        }
        let monotonic = entries
            .windows(2)
            .all(|w| w[0].activation_height < w[1].activation_height && w[0].version < w[1].version);
        if !monotonic {
            return Err(NodeError::Internal(
                "consensus schedule must be strictly increasing".into(),
            ));
        }
        Ok(ConsensusSchedule { entries })
    }

    /// The production activation table.
    pub fn mainnet() -> ConsensusSchedule {
        ConsensusSchedule {
            entries: vec![
                ConsensusRules {
                    version: 0,
                    activation_height: 1,
                    max_future_skew_secs: 600,
                    max_past_drift_secs: 0,
                },
                ConsensusRules {
                    version: 1,
                    activation_height: 500_000,
                    max_future_skew_secs: 120,
                    max_past_drift_secs: 0,
                },
            ],
        }
    }

    /// Rules in force at `height`.
    pub fn rules_for(&self, height: u64) -> &ConsensusRules {
        self.entries
            .iter()
            .rev()
            .find(|e| e.activation_height <= height)
            .unwrap_or(&self.entries[0])
    }

    pub fn entries(&self) -> &[ConsensusRules] {
        &self.entries
    }
}
