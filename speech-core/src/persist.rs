//! Concept history persistence.
//!
//! Histories are saved as versioned JSON. Records are decoded one at a
//! time on load, so a corrupt or partial record costs only itself.

use crate::history::{ConceptHistory, HistoryEntry};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current history file version.
const HISTORY_VERSION: u32 = 1;

/// A saved concept history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedHistory {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// Name of the character the history belongs to.
    #[serde(default)]
    pub owner: String,

    /// One record per concept, decoded individually on load.
    pub entries: Vec<serde_json::Value>,
}

/// Outcome of restoring a saved history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestoreReport {
    pub restored: usize,
    pub discarded: usize,
}

impl SavedHistory {
    pub fn new(owner: impl Into<String>, history: &ConceptHistory) -> Result<Self, PersistError> {
        let mut records: Vec<&HistoryEntry> = history.entries().collect();
        records.sort_by(|a, b| a.concept.cmp(&b.concept));
        let entries = records
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            version: HISTORY_VERSION,
            owner: owner.into(),
            entries,
        })
    }

    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PersistError> {
        let saved: Self = serde_json::from_str(json)?;
        if saved.version != HISTORY_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: HISTORY_VERSION,
                found: saved.version,
            });
        }
        Ok(saved)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Add every valid record to `history`, replacing entries for the same concept.
    pub fn restore_into(&self, history: &mut ConceptHistory) -> RestoreReport {
        let mut report = RestoreReport::default();
        for (index, record) in self.entries.iter().enumerate() {
            match decode_record(record) {
                Some(entry) => {
                    history.insert(entry);
                    report.restored += 1;
                }
                None => {
                    tracing::warn!(owner = %self.owner, index, "discarding corrupt history record");
                    report.discarded += 1;
                }
            }
        }
        report
    }
}

fn decode_record(record: &serde_json::Value) -> Option<HistoryEntry> {
    let entry: HistoryEntry = serde_json::from_value(record.clone()).ok()?;
    if entry.concept.trim().is_empty() {
        return None;
    }
    if entry.time_spoken.is_some_and(|time| !time.is_finite()) {
        return None;
    }
    Some(entry)
}
