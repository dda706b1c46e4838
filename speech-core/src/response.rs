//! Resolved responses and their follow-ups.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of speech act a response asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    #[default]
    None,
    /// A sound played through an auto-generated scene.
    Speak,
    /// A raw sentence by name or group.
    Sentence,
    /// A full scripted scene.
    Scene,
    /// A nested response group. Resolvers must expand these before returning.
    Response,
    /// Debug or subtitle text, no audio.
    Print,
    /// `target input [param]` fired at another entity.
    EntityIo,
    /// A script snippet run by the host.
    Script,
}

impl ResponseKind {
    /// Kinds that finish in the same tick they start.
    pub fn is_zero_duration(&self) -> bool {
        matches!(
            self,
            ResponseKind::Print | ResponseKind::EntityIo | ResponseKind::Script
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResponseKind::None => "none",
            ResponseKind::Speak => "speak",
            ResponseKind::Sentence => "sentence",
            ResponseKind::Scene => "scene",
            ResponseKind::Response => "response",
            ResponseKind::Print => "print",
            ResponseKind::EntityIo => "entityio",
            ResponseKind::Script => "script",
        }
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a response's context string is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    #[default]
    Speaker,
    Squad,
    Enemy,
    World,
}

/// Attenuation level for audible responses, in decibels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundLevel(pub u8);

impl Default for SoundLevel {
    fn default() -> Self {
        // normal conversation
        SoundLevel(80)
    }
}

/// When a follow-up fires relative to the utterance that scheduled it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FollowupTiming {
    /// Seconds after the current utterance started. Lets characters talk over each other.
    AfterStart(f32),
    /// Seconds after the current utterance finished.
    AfterEnd(f32),
}

impl FollowupTiming {
    /// Map the signed data form: `-n` means `n` seconds after the start.
    pub fn from_signed(delay: f32) -> Self {
        if delay < 0.0 {
            FollowupTiming::AfterStart(-delay)
        } else {
            FollowupTiming::AfterEnd(delay)
        }
    }

    pub fn seconds(&self) -> f32 {
        match *self {
            FollowupTiming::AfterStart(seconds) | FollowupTiming::AfterEnd(seconds) => seconds,
        }
    }
}

impl Default for FollowupTiming {
    fn default() -> Self {
        FollowupTiming::AfterEnd(0.0)
    }
}

/// An entity input fired alongside a follow-up, independent of speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityIoFollowup {
    pub target: String,
    pub input: String,
    #[serde(default)]
    pub delay: f32,
}

/// A secondary concept to speak after the current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Followup {
    pub concept: String,
    /// Extra `key:value,...` criteria for the follow-up.
    #[serde(default)]
    pub contexts: String,
    /// Symbolic target: self, subject, from, any, all, or an entity name.
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub timing: FollowupTiming,
    #[serde(default)]
    pub entity_io: Option<EntityIoFollowup>,
}

impl Followup {
    pub fn new(concept: impl Into<String>, target: impl Into<String>, timing: FollowupTiming) -> Self {
        Self {
            concept: concept.into(),
            target: target.into(),
            timing,
            ..Default::default()
        }
    }

    pub fn with_contexts(mut self, contexts: impl Into<String>) -> Self {
        self.contexts = contexts.into();
        self
    }

    pub fn with_entity_io(mut self, target: impl Into<String>, input: impl Into<String>, delay: f32) -> Self {
        self.entity_io = Some(EntityIoFollowup {
            target: target.into(),
            input: input.into(),
            delay,
        });
        self
    }

    /// True if there is a concept to speak.
    pub fn has_concept(&self) -> bool {
        !self.concept.is_empty()
    }
}

/// The resolver's answer for a criteria set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Response {
    pub kind: ResponseKind,
    /// Sound, sentence, scene, text, command or script, depending on `kind`.
    pub text: String,
    /// Name of the rule that matched, for diagnostics.
    #[serde(default)]
    pub rule: String,
    /// Seconds to wait before the act starts.
    #[serde(default)]
    pub delay: f32,
    #[serde(default)]
    pub sound_level: SoundLevel,
    #[serde(default)]
    pub speak_once: bool,
    /// Minimum seconds before the same concept may be spoken again.
    #[serde(default)]
    pub respeak_delay: f32,
    #[serde(default)]
    pub followup: Option<Followup>,
    /// `key:value,...` context applied after speaking.
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub context_scope: ContextScope,
    /// Match score, used when choosing among several respondents.
    #[serde(default)]
    pub score: f32,
}

impl Response {
    pub fn new(kind: ResponseKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn speak(text: impl Into<String>) -> Self {
        Self::new(ResponseKind::Speak, text)
    }

    pub fn scene(text: impl Into<String>) -> Self {
        Self::new(ResponseKind::Scene, text)
    }

    pub fn print(text: impl Into<String>) -> Self {
        Self::new(ResponseKind::Print, text)
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = rule.into();
        self
    }

    pub fn with_delay(mut self, delay: f32) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn speak_once(mut self) -> Self {
        self.speak_once = true;
        self
    }

    pub fn with_respeak_delay(mut self, seconds: f32) -> Self {
        self.respeak_delay = seconds;
        self
    }

    pub fn with_followup(mut self, followup: Followup) -> Self {
        self.followup = Some(followup);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>, scope: ContextScope) -> Self {
        self.context = Some(context.into());
        self.context_scope = scope;
        self
    }

    /// Nothing to perform.
    pub fn is_empty(&self) -> bool {
        self.kind == ResponseKind::None || self.text.is_empty()
    }
}
