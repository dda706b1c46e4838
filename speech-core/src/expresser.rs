//! Per-character speech state.
//!
//! An [`Expresser`] lives inside its host entity and holds everything the
//! speech pipeline remembers about that character between calls: the
//! concept history, how long the current utterance runs, and a follow-up
//! waiting for the current utterance to finish. The pipeline itself lives
//! on [`crate::SpeechSystem`], which can see the other characters too.

use crate::entity::EntityHandle;
use crate::history::ConceptHistory;
use crate::response::Followup;
use crate::target::TargetSpec;

/// A follow-up waiting for the "speech finished" notification.
#[derive(Debug, Clone, PartialEq)]
pub struct PostponedFollowup {
    pub followup: Followup,
    pub target: TargetSpec,
}

/// Speech state for one character.
#[derive(Debug, Clone)]
pub struct Expresser {
    owner: EntityHandle,
    history: ConceptHistory,
    /// End of the current utterance, including its pre-delay.
    stop_talk_time: f32,
    /// End of the current utterance, excluding its pre-delay.
    stop_talk_time_without_delay: f32,
    blocked_talk_time: f32,
    last_accepted_speak: Option<f32>,
    uses_semaphore: bool,
    postponed: Option<PostponedFollowup>,
}

impl Expresser {
    pub fn new(owner: EntityHandle) -> Self {
        Self {
            owner,
            history: ConceptHistory::new(),
            stop_talk_time: 0.0,
            stop_talk_time_without_delay: 0.0,
            blocked_talk_time: 0.0,
            last_accepted_speak: None,
            uses_semaphore: true,
            postponed: None,
        }
    }

    /// Opt this character out of the speech floors.
    pub fn without_semaphore(mut self) -> Self {
        self.uses_semaphore = false;
        self
    }

    pub fn owner(&self) -> EntityHandle {
        self.owner
    }

    pub fn uses_semaphore(&self) -> bool {
        self.uses_semaphore
    }

    pub fn history(&self) -> &ConceptHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut ConceptHistory {
        &mut self.history
    }

    pub fn can_speak_concept(&self, concept: &str, now: f32) -> bool {
        self.history.can_speak_concept(concept, now)
    }

    /// Free to start a new utterance: not talking, not blocked, and nothing accepted this tick.
    pub fn can_speak(&self, now: f32) -> bool {
        if self.last_accepted_speak == Some(now) {
            return false;
        }
        self.stop_talk_time.max(self.blocked_talk_time) <= now
    }

    /// Like [`Expresser::can_speak`] but ignores the pre-delay of the current line.
    pub fn can_speak_after_myself(&self, now: f32) -> bool {
        self.stop_talk_time_without_delay.max(self.blocked_talk_time) <= now
    }

    pub fn is_speaking(&self, now: f32) -> bool {
        self.stop_talk_time > now
    }

    /// End the current utterance at `now`. Returns whether anything was cut off.
    pub fn force_not_speaking(&mut self, now: f32) -> bool {
        if !self.is_speaking(now) {
            return false;
        }
        self.stop_talk_time = now;
        self.stop_talk_time_without_delay = now;
        true
    }

    pub fn block_speech_until(&mut self, time: f32) {
        self.blocked_talk_time = time;
    }

    pub fn blocked_until(&self) -> f32 {
        self.blocked_talk_time
    }

    /// Extend the speaking-until timestamps for an utterance starting now.
    pub fn note_speaking(&mut self, now: f32, duration: f32, delay: f32) {
        let total = duration + delay;
        self.stop_talk_time = now + total;
        self.stop_talk_time_without_delay = now + duration;
    }

    pub fn stop_talk_time(&self) -> f32 {
        self.stop_talk_time
    }

    pub(crate) fn note_accepted(&mut self, now: f32) {
        self.last_accepted_speak = Some(now);
    }

    pub fn postponed_followup(&self) -> Option<&PostponedFollowup> {
        self.postponed.as_ref()
    }

    pub fn set_postponed_followup(&mut self, postponed: PostponedFollowup) {
        self.postponed = Some(postponed);
    }

    pub fn take_postponed_followup(&mut self) -> Option<PostponedFollowup> {
        self.postponed.take()
    }

    /// Forget everything; called when the owner is torn down.
    pub fn reset(&mut self) {
        self.history.purge();
        self.postponed = None;
        self.stop_talk_time = 0.0;
        self.stop_talk_time_without_delay = 0.0;
        self.blocked_talk_time = 0.0;
        self.last_accepted_speak = None;
    }
}
