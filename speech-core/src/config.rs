//! Tuning for the speech system.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors from loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Speech system settings. Every field has a default, so partial JSON is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Respondents farther than this from the issuer are ignored by any/all dispatch.
    pub followup_max_distance: f32,

    /// Candidates within this much of the best score share the any-dispatch draw.
    pub any_score_slop: f32,

    /// Maximum candidates kept for the any-dispatch draw.
    pub any_reservoir_capacity: usize,

    /// Postpone follow-ups of zero-duration responses like every other kind.
    pub legacy_followups: bool,

    /// Nominal duration of print responses.
    pub print_duration: f32,

    /// Warn once the queue holds this many entries.
    pub queue_warn_size: usize,

    /// Give up a dispatch sweep after this many restarts.
    pub max_sweep_restarts: usize,

    /// Weight of the `concept` criterion.
    pub concept_weight: f32,

    /// Seed for the any-dispatch draw. Random when unset.
    pub rng_seed: Option<u64>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            followup_max_distance: 1800.0,
            any_score_slop: 0.0,
            any_reservoir_capacity: 16,
            legacy_followups: false,
            print_duration: 1.0,
            queue_warn_size: 64,
            max_sweep_restarts: 32,
            concept_weight: 5.0,
            rng_seed: None,
        }
    }
}

impl SpeechConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate settings. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load settings from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Reject an empty reservoir, negative slop and a non-positive follow-up distance.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.any_reservoir_capacity == 0 {
            return Err(ConfigError::Invalid {
                name: "any_reservoir_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.any_score_slop < 0.0 {
            return Err(ConfigError::Invalid {
                name: "any_score_slop",
                reason: format!("must not be negative, got {}", self.any_score_slop),
            });
        }
        if self.followup_max_distance <= 0.0 {
            return Err(ConfigError::Invalid {
                name: "followup_max_distance",
                reason: format!("must be positive, got {}", self.followup_max_distance),
            });
        }
        Ok(())
    }

    pub fn with_followup_max_distance(mut self, distance: f32) -> Self {
        self.followup_max_distance = distance;
        self
    }

    pub fn with_any_score_slop(mut self, slop: f32) -> Self {
        self.any_score_slop = slop;
        self
    }

    pub fn with_any_reservoir_capacity(mut self, capacity: usize) -> Self {
        self.any_reservoir_capacity = capacity;
        self
    }

    pub fn with_legacy_followups(mut self, legacy: bool) -> Self {
        self.legacy_followups = legacy;
        self
    }

    pub fn with_print_duration(mut self, seconds: f32) -> Self {
        self.print_duration = seconds;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}
