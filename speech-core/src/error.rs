//! Why a character did not speak.

use crate::entity::{Allegiance, EntityHandle};
use thiserror::Error;

/// Broad classes of speech failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Expected: a gate said no.
    PolicyDenied,
    /// Expected: nothing to say.
    ResolutionFailed,
    /// A handle no longer resolves.
    DanglingReference,
    /// A bug upstream of the core.
    InvariantViolation,
    /// The response queue changed under a dispatch sweep.
    StructuralHazard,
}

/// Error from the speak pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpeakError {
    #[error("speech is globally suppressed")]
    Suppressed,

    #[error("concept '{0}' may not be spoken again yet")]
    ConceptOnCooldown(String),

    #[error("the {0} speech floor is held by someone else")]
    FloorTaken(Allegiance),

    #[error("a locked scripted scene is playing")]
    SceneLocked,

    #[error("no response for concept '{0}'")]
    NoResponse(String),

    #[error("empty response for concept '{0}'")]
    EmptyResponse(String),

    #[error("failed to play '{0}'")]
    PlaybackFailed(String),

    #[error("entity {0} no longer exists")]
    Dangling(EntityHandle),

    #[error("entity {0} is dead")]
    Dead(EntityHandle),

    #[error("entity {0} has no expresser")]
    NoExpresser(EntityHandle),

    #[error("invariant violated: {0}")]
    InvariantViolation(&'static str),
}

impl SpeakError {
    pub fn class(&self) -> FailureClass {
        match self {
            SpeakError::Suppressed
            | SpeakError::ConceptOnCooldown(_)
            | SpeakError::FloorTaken(_)
            | SpeakError::SceneLocked => FailureClass::PolicyDenied,
            SpeakError::NoResponse(_)
            | SpeakError::EmptyResponse(_)
            | SpeakError::PlaybackFailed(_) => FailureClass::ResolutionFailed,
            SpeakError::Dangling(_) | SpeakError::Dead(_) | SpeakError::NoExpresser(_) => {
                FailureClass::DanglingReference
            }
            SpeakError::InvariantViolation(_) => FailureClass::InvariantViolation,
        }
    }
}
