//! Tunable parameters of the light client.
//!
//! The defaults are the production values for a remote chain with 21 active
//! producers, 12 consecutive blocks per producer and 500 ms blocks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest `lib_depth` an operator may configure.
pub const MIN_LIB_DEPTH: u32 = 50;

/// Largest `lib_depth` an operator may configure.
pub const MAX_LIB_DEPTH: u32 = 400;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("lib_depth {0} out of range 50..=400")]
    LibDepthOutOfRange(u32),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("trim_length {trim_length} must be smaller than section_max_length {section_max_length}")]
    TrimLength {
        trim_length: u32,
        section_max_length: u32,
    },

    #[error("repeat_window {repeat_window} must not exceed rotation_window {rotation_window}")]
    RepeatWindow {
        repeat_window: usize,
        rotation_window: usize,
    },

    #[error("Invalid configuration JSON: {0}")]
    Json(String),
}

/// How a producer schedule is hashed into the signing digest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleHashMode {
    /// SHA256 over the packed `(version, [(producer, key)])` schedule.
    #[default]
    Legacy,
    /// SHA256 over the packed weighted-authority form of the schedule,
    /// used once the remote chain activates multi-key signing authorities.
    WeightedAuthority,
}

/// Parameters of header-chain verification and storage bounds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Confirming blocks after which a section counts as final.
    pub lib_depth: u32,
    /// Longest span a section may reach before its oldest records are trimmed.
    pub section_max_length: u32,
    /// Records removed from the front of an over-long section in one step.
    pub trim_length: u32,
    /// Producer schedules retained before the oldest is evicted.
    pub prodsches_max_records: u64,
    /// Sections retained before the oldest is evicted.
    pub sections_max_records: usize,
    /// Consecutive blocks each producer signs per turn.
    pub producer_repetitions: u32,
    /// Producer/block-number pairs kept in a section's rotation window.
    pub rotation_window: usize,
    /// A producer may not reappear within this many window entries.
    pub repeat_window: usize,
    /// Largest allowed jump between consecutive producers' schedule positions.
    pub max_span: usize,
    /// Smallest schedule for which rotation-window checks can be enforced.
    pub min_schedule_producers: usize,
    /// Blocks that must elapse between a schedule proposal and its activation.
    pub min_rotation_gap: u32,
    /// Records any pruning call may delete.
    pub max_delete_per_call: u32,
    /// Distinct producers a PBFT proof must carry.
    pub pbft_quorum: usize,
    /// Batch mode keeps header records this many blocks behind the head.
    pub chaindb_max_history_blocks: u32,
    /// Local test networks with fewer producers than a real schedule:
    /// disables the rotation window and the rotation gap checks.
    pub few_producers_test: bool,
    pub schedule_hash_mode: ScheduleHashMode,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            lib_depth: 325,
            section_max_length: 1000,
            trim_length: 50,
            prodsches_max_records: 5,
            sections_max_records: 5,
            producer_repetitions: 12,
            rotation_window: 21,
            repeat_window: 15,
            max_span: 4,
            min_schedule_producers: 16,
            min_rotation_gap: 20 * 12,
            max_delete_per_call: 150,
            pbft_quorum: 15,
            chaindb_max_history_blocks: 60 * 60 * 2,
            few_producers_test: false,
            schedule_hash_mode: ScheduleHashMode::Legacy,
        }
    }
}

impl ChainConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Json(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_LIB_DEPTH..=MAX_LIB_DEPTH).contains(&self.lib_depth) {
            return Err(ConfigError::LibDepthOutOfRange(self.lib_depth));
        }

        let non_zero = [
            ("section_max_length", self.section_max_length as u64),
            ("trim_length", self.trim_length as u64),
            ("prodsches_max_records", self.prodsches_max_records),
            ("sections_max_records", self.sections_max_records as u64),
            ("producer_repetitions", self.producer_repetitions as u64),
            ("rotation_window", self.rotation_window as u64),
            ("max_delete_per_call", self.max_delete_per_call as u64),
            ("pbft_quorum", self.pbft_quorum as u64),
            ("chaindb_max_history_blocks", self.chaindb_max_history_blocks as u64),
        ];
        if let Some(&(field, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero { field });
        }

        if self.trim_length >= self.section_max_length {
            return Err(ConfigError::TrimLength {
                trim_length: self.trim_length,
                section_max_length: self.section_max_length,
            });
        }
        if self.repeat_window > self.rotation_window {
            return Err(ConfigError::RepeatWindow {
                repeat_window: self.repeat_window,
                rotation_window: self.rotation_window,
            });
        }
        Ok(())
    }
}
