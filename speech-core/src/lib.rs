//! Speech and response dispatch for simulated characters.
//!
//! This crate provides:
//! - Concept-driven speech: characters ask to speak an abstract concept and
//!   an external resolver picks the concrete line from weighted criteria
//! - Turn-taking between characters of the same allegiance
//! - Per-character concept history (speak-once, respeak delays)
//! - Follow-ups and a time-ordered response queue for deferred replies
//! - Concept history persistence
//!
//! The host game supplies the characters ([`EntityDirectory`] /
//! [`SpeechHost`]), the rule matcher ([`Resolver`]) and playback
//! ([`SpeechExecutor`]).
//!
//! # Quick Start
//!
//! ```ignore
//! use speech_core::{Concept, SpeechConfig, SpeechSystem};
//!
//! let mut speech = SpeechSystem::new(SpeechConfig::default(), Box::new(resolver), Box::new(executor));
//! speech.register_respondent(&world, barney);
//!
//! speech.speak(&mut world, barney, &Concept::new("TLK_HELLO"), None);
//!
//! // every frame
//! speech.tick(&mut world, frame_seconds);
//! ```

pub mod concept;
pub mod config;
pub mod criteria;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod executor;
pub mod expresser;
pub mod followup;
pub mod history;
pub mod persist;
pub mod queue;
pub mod resolver;
pub mod response;
pub mod semaphore;
pub mod system;
pub mod target;
pub mod testing;

// Primary public API
pub use concept::{compare_concepts, Concept};
pub use config::{ConfigError, SpeechConfig};
pub use criteria::{CriteriaSet, Criterion};
pub use entity::{Allegiance, EntityDirectory, EntityHandle, Position, SceneState, SpeechHost};
pub use error::{FailureClass, SpeakError};
pub use executor::{EntityIoCommand, SpeechExecutor};
pub use expresser::{Expresser, PostponedFollowup};
pub use followup::resolve_followup_target;
pub use history::{ConceptHistory, HistoryEntry};
pub use persist::{PersistError, RestoreReport, SavedHistory};
pub use queue::{DeferredResponse, ResponseQueue, ResponseQueueManager};
pub use resolver::Resolver;
pub use response::{ContextScope, EntityIoFollowup, Followup, FollowupTiming, Response, ResponseKind, SoundLevel};
pub use semaphore::{SpeechSemaphore, SpeechSemaphores};
pub use system::{FoundResponse, SpeechSystem, Utterance};
pub use target::TargetSpec;
pub use testing::{RecordingExecutor, ScriptedResolver, TestHarness, TestStage};
