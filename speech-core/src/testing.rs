//! Testing utilities for the speech core.
//!
//! This module provides in-memory stand-ins for everything the host game
//! normally supplies:
//! - `TestStage` / `TestActor` as the entity directory and its characters
//! - `ScriptedResolver` for deterministic responses per concept and speaker
//! - `RecordingExecutor` that logs every speech act instead of playing it
//! - `TestHarness` that wires them to a `SpeechSystem`

use crate::concept::Concept;
use crate::config::SpeechConfig;
use crate::criteria::CriteriaSet;
use crate::entity::{Allegiance, EntityDirectory, EntityHandle, Position, SceneState, SpeechHost};
use crate::executor::SpeechExecutor;
use crate::expresser::Expresser;
use crate::resolver::Resolver;
use crate::response::{ContextScope, Response, SoundLevel};
use crate::system::SpeechSystem;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

// =============================================================================
// Stage and actors
// =============================================================================

/// An in-memory character.
#[derive(Debug, Clone)]
pub struct TestActor {
    pub handle: EntityHandle,
    pub name: String,
    pub allegiance: Allegiance,
    pub position: Position,
    pub alive: bool,
    pub player: bool,
    pub scene: SceneState,
    /// Extra criteria this actor contributes to its own speech.
    pub criteria: CriteriaSet,
    /// Criteria contributed to others' speech while this actor is the primary observer.
    pub observer_criteria: CriteriaSet,
    pub expresser: Option<Expresser>,
    /// Contexts applied by responses, in order.
    pub contexts: Vec<(ContextScope, CriteriaSet)>,
    /// Concepts spoken, in order.
    pub spoken: Vec<String>,
    pub started_speaking: u32,
    pub stopped: u32,
}

impl TestActor {
    pub fn new(handle: EntityHandle, name: impl Into<String>, allegiance: Allegiance) -> Self {
        Self {
            handle,
            name: name.into(),
            allegiance,
            position: Position::default(),
            alive: true,
            player: false,
            scene: SceneState::Idle,
            criteria: CriteriaSet::new(),
            observer_criteria: CriteriaSet::new(),
            expresser: Some(Expresser::new(handle)),
            contexts: Vec::new(),
            spoken: Vec::new(),
            started_speaking: 0,
            stopped: 0,
        }
    }
}

impl SpeechHost for TestActor {
    fn handle(&self) -> EntityHandle {
        self.handle
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn allegiance(&self) -> Allegiance {
        self.allegiance
    }

    fn position(&self) -> Position {
        self.position
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    fn is_player(&self) -> bool {
        self.player
    }

    fn scene_state(&self) -> SceneState {
        self.scene
    }

    fn expresser(&self) -> Option<&Expresser> {
        self.expresser.as_ref()
    }

    fn expresser_mut(&mut self) -> Option<&mut Expresser> {
        self.expresser.as_mut()
    }

    fn modify_or_append_criteria(&self, criteria: &mut CriteriaSet) {
        criteria.set("name", self.name.clone());
        criteria.set("allegiance", self.allegiance.to_string());
        criteria.merge(&self.criteria);
    }

    fn modify_or_append_observer_criteria(&self, criteria: &mut CriteriaSet) {
        criteria.merge(&self.observer_criteria);
    }

    fn stop_speaking(&mut self) {
        self.stopped += 1;
    }

    fn on_start_speaking(&mut self) {
        self.started_speaking += 1;
    }

    fn on_spoke_concept(&mut self, concept: &Concept, _response: &Response) {
        self.spoken.push(concept.name().to_string());
    }

    fn add_context(&mut self, scope: ContextScope, context: &CriteriaSet) {
        self.contexts.push((scope, context.clone()));
    }
}

#[derive(Debug, Clone, Default)]
struct Slot {
    serial: u32,
    actor: Option<TestActor>,
}

/// An entity directory backed by a slot vector.
///
/// Despawned slots are reused with a bumped serial, so stale handles stop resolving.
#[derive(Debug, Clone, Default)]
pub struct TestStage {
    slots: Vec<Slot>,
    observer: Option<EntityHandle>,
}

impl TestStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an actor with an expresser, reusing a free slot if there is one.
    pub fn spawn(&mut self, name: &str, allegiance: Allegiance) -> EntityHandle {
        let index = match self.slots.iter().position(|slot| slot.actor.is_none()) {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.serial += 1;
        let handle = EntityHandle::new(index as u32, slot.serial);
        slot.actor = Some(TestActor::new(handle, name, allegiance));
        handle
    }

    pub fn spawn_at(&mut self, name: &str, allegiance: Allegiance, position: Position) -> EntityHandle {
        let handle = self.spawn(name, allegiance);
        if let Some(actor) = self.actor_mut(handle) {
            actor.position = position;
        }
        handle
    }

    pub fn despawn(&mut self, handle: EntityHandle) -> Option<TestActor> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.serial != handle.serial() {
            return None;
        }
        slot.actor.take()
    }

    pub fn actor(&self, handle: EntityHandle) -> Option<&TestActor> {
        self.slots
            .get(handle.index() as usize)
            .filter(|slot| slot.serial == handle.serial())
            .and_then(|slot| slot.actor.as_ref())
    }

    pub fn actor_mut(&mut self, handle: EntityHandle) -> Option<&mut TestActor> {
        self.slots
            .get_mut(handle.index() as usize)
            .filter(|slot| slot.serial == handle.serial())
            .and_then(|slot| slot.actor.as_mut())
    }

    pub fn set_observer(&mut self, handle: EntityHandle) {
        self.observer = Some(handle);
    }

    pub fn actors(&self) -> impl Iterator<Item = &TestActor> {
        self.slots.iter().filter_map(|slot| slot.actor.as_ref())
    }
}

impl EntityDirectory for TestStage {
    fn find_by_name(&self, name: &str) -> Option<EntityHandle> {
        self.actors()
            .find(|actor| actor.name.eq_ignore_ascii_case(name))
            .map(|actor| actor.handle)
    }

    fn from_index(&self, index: u32) -> Option<EntityHandle> {
        self.slots
            .get(index as usize)
            .and_then(|slot| slot.actor.as_ref())
            .map(|actor| actor.handle)
    }

    fn host(&self, handle: EntityHandle) -> Option<&dyn SpeechHost> {
        self.actor(handle).map(|actor| actor as &dyn SpeechHost)
    }

    fn host_mut(&mut self, handle: EntityHandle) -> Option<&mut dyn SpeechHost> {
        self.actor_mut(handle).map(|actor| actor as &mut dyn SpeechHost)
    }

    fn primary_observer(&self) -> Option<EntityHandle> {
        self.observer
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Every criteria set a [`ScriptedResolver`] was asked about.
pub type CriteriaLog = Rc<RefCell<Vec<CriteriaSet>>>;

#[derive(Debug, Clone)]
struct ScriptedRule {
    concept: String,
    speaker: Option<String>,
    response: Response,
}

/// A resolver that answers from a fixed concept table.
///
/// Matches the `concept` criterion and, for speaker-specific rules, the
/// `name` criterion. Speaker-specific rules win over general ones.
#[derive(Debug, Default)]
pub struct ScriptedResolver {
    rules: Vec<ScriptedRule>,
    log: CriteriaLog,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `concept` for anyone.
    pub fn on(mut self, concept: &str, response: Response) -> Self {
        self.rules.push(ScriptedRule {
            concept: concept.to_string(),
            speaker: None,
            response,
        });
        self
    }

    /// Answer `concept` only for the speaker named `speaker`.
    pub fn on_for(mut self, concept: &str, speaker: &str, response: Response) -> Self {
        self.rules.push(ScriptedRule {
            concept: concept.to_string(),
            speaker: Some(speaker.to_string()),
            response,
        });
        self
    }

    /// Shared handle to the criteria log.
    pub fn criteria_log(&self) -> CriteriaLog {
        Rc::clone(&self.log)
    }
}

impl Resolver for ScriptedResolver {
    fn find_best_response(&mut self, criteria: &CriteriaSet) -> Option<Response> {
        self.log.borrow_mut().push(criteria.clone());
        let concept = criteria.value("concept")?;
        let speaker = criteria.value("name");

        let matches_concept = |rule: &&ScriptedRule| rule.concept.eq_ignore_ascii_case(concept);
        let specific = self.rules.iter().filter(matches_concept).find(|rule| {
            matches!((&rule.speaker, speaker), (Some(wanted), Some(actual)) if wanted.eq_ignore_ascii_case(actual))
        });
        let general = || {
            self.rules
                .iter()
                .filter(matches_concept)
                .find(|rule| rule.speaker.is_none())
        };
        specific.or_else(general).map(|rule| rule.response.clone())
    }

    fn all_responses(&self) -> Vec<Response> {
        self.rules.iter().map(|rule| rule.response.clone()).collect()
    }
}

// =============================================================================
// Executor
// =============================================================================

/// A speech act the [`RecordingExecutor`] was asked to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayedAct {
    Line {
        speaker: EntityHandle,
        sound: String,
        delay: f32,
    },
    Sentence {
        speaker: EntityHandle,
        sentence: String,
        delay: f32,
    },
    Scene {
        speaker: EntityHandle,
        scene: String,
        delay: f32,
    },
    Print {
        speaker: EntityHandle,
        text: String,
    },
    Script {
        speaker: EntityHandle,
        source: String,
    },
    Input {
        target: EntityHandle,
        input: String,
        param: Option<String>,
        delay: f32,
        activator: Option<EntityHandle>,
    },
}

pub type ExecutorLog = Rc<RefCell<Vec<PlayedAct>>>;

/// Playback durations, shared so tests can adjust them after handing the executor over.
#[derive(Debug)]
pub struct ExecutorTuning {
    /// Duration of sounds, sentences and scenes not listed in `durations`.
    pub default_duration: f32,
    pub durations: HashMap<String, f32>,
    pub scene_tails: HashMap<String, f32>,
    pub scripts_run: bool,
}

impl Default for ExecutorTuning {
    fn default() -> Self {
        Self {
            default_duration: 2.0,
            durations: HashMap::new(),
            scene_tails: HashMap::new(),
            scripts_run: true,
        }
    }
}

/// An executor that records acts and reports configured durations.
///
/// A configured duration of zero makes that act fail.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    log: ExecutorLog,
    tuning: Rc<RefCell<ExecutorTuning>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> ExecutorLog {
        Rc::clone(&self.log)
    }

    pub fn tuning(&self) -> Rc<RefCell<ExecutorTuning>> {
        Rc::clone(&self.tuning)
    }

    fn duration_of(&self, text: &str) -> f32 {
        let tuning = self.tuning.borrow();
        tuning
            .durations
            .get(text)
            .copied()
            .unwrap_or(tuning.default_duration)
    }

    fn record(&self, act: PlayedAct) {
        self.log.borrow_mut().push(act);
    }
}

impl SpeechExecutor for RecordingExecutor {
    fn speak_line(&mut self, speaker: EntityHandle, sound: &str, _level: SoundLevel, delay: f32) -> f32 {
        let duration = self.duration_of(sound);
        if duration > 0.0 {
            self.record(PlayedAct::Line {
                speaker,
                sound: sound.to_string(),
                delay,
            });
        }
        duration
    }

    fn play_sentence(&mut self, speaker: EntityHandle, sentence: &str, _level: SoundLevel, delay: f32) -> f32 {
        let duration = self.duration_of(sentence);
        if duration > 0.0 {
            self.record(PlayedAct::Sentence {
                speaker,
                sentence: sentence.to_string(),
                delay,
            });
        }
        duration
    }

    fn play_scene(&mut self, speaker: EntityHandle, scene: &str, delay: f32) -> f32 {
        let duration = self.duration_of(scene);
        if duration > 0.0 {
            self.record(PlayedAct::Scene {
                speaker,
                scene: scene.to_string(),
                delay,
            });
        }
        duration
    }

    fn print(&mut self, speaker: EntityHandle, text: &str) -> Option<f32> {
        self.record(PlayedAct::Print {
            speaker,
            text: text.to_string(),
        });
        None
    }

    fn run_script(&mut self, speaker: EntityHandle, source: &str) -> bool {
        let runs = self.tuning.borrow().scripts_run;
        if runs {
            self.record(PlayedAct::Script {
                speaker,
                source: source.to_string(),
            });
        }
        runs
    }

    fn fire_input(
        &mut self,
        target: EntityHandle,
        input: &str,
        param: Option<&str>,
        delay: f32,
        activator: Option<EntityHandle>,
    ) {
        self.record(PlayedAct::Input {
            target,
            input: input.to_string(),
            param: param.map(str::to_string),
            delay,
            activator,
        });
    }

    fn scene_speech_tail(&self, scene: &str) -> Option<f32> {
        self.tuning.borrow().scene_tails.get(scene).copied()
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A speech system wired to an in-memory stage, for scripted scenarios.
pub struct TestHarness {
    pub system: SpeechSystem,
    pub stage: TestStage,
    log: ExecutorLog,
    tuning: Rc<RefCell<ExecutorTuning>>,
}

impl TestHarness {
    /// Harness with a seeded default configuration.
    pub fn new(resolver: ScriptedResolver) -> Self {
        Self::with_config(SpeechConfig::default().with_seed(0), resolver)
    }

    pub fn with_config(config: SpeechConfig, resolver: ScriptedResolver) -> Self {
        let executor = RecordingExecutor::new();
        let log = executor.log();
        let tuning = executor.tuning();
        Self {
            system: SpeechSystem::new(config, Box::new(resolver), Box::new(executor)),
            stage: TestStage::new(),
            log,
            tuning,
        }
    }

    /// Spawn an actor and register it as a respondent.
    pub fn spawn(&mut self, name: &str, allegiance: Allegiance) -> EntityHandle {
        let handle = self.stage.spawn(name, allegiance);
        self.system.register_respondent(&self.stage, handle);
        handle
    }

    /// How long `text` plays for. Zero makes it fail.
    pub fn executor_duration(&mut self, text: &str, seconds: f32) {
        self.tuning
            .borrow_mut()
            .durations
            .insert(text.to_string(), seconds);
    }

    pub fn scene_tail(&mut self, scene: &str, seconds: f32) {
        self.tuning
            .borrow_mut()
            .scene_tails
            .insert(scene.to_string(), seconds);
    }

    pub fn speak(&mut self, who: EntityHandle, concept: &str) -> bool {
        self.system
            .speak(&mut self.stage, who, &Concept::new(concept), None)
    }

    pub fn tick(&mut self, seconds: f32) -> usize {
        self.system.tick(&mut self.stage, seconds)
    }

    /// Report that `who` finished talking and release its postponed follow-up.
    pub fn finish_speaking(&mut self, who: EntityHandle) -> bool {
        self.system.on_speech_finished(&mut self.stage, who)
    }

    pub fn acts(&self) -> Vec<PlayedAct> {
        self.log.borrow().clone()
    }

    /// Concepts `who` has spoken, in order.
    pub fn spoken_by(&self, who: EntityHandle) -> Vec<String> {
        self.stage
            .actor(who)
            .map(|actor| actor.spoken.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_reuses_slots_with_new_serial() {
        let mut stage = TestStage::new();
        let alice = stage.spawn("alice", Allegiance::Friend);
        stage.despawn(alice);
        let bob = stage.spawn("bob", Allegiance::Foe);

        assert_eq!(bob.index(), alice.index());
        assert_ne!(bob, alice);
        assert!(stage.host(alice).is_none());
        assert_eq!(stage.find_by_name("BOB"), Some(bob));
        assert_eq!(stage.from_index(bob.index()), Some(bob));
    }

    #[test]
    fn test_scripted_resolver_prefers_speaker_rules() {
        let mut resolver = ScriptedResolver::new()
            .on("greet", Response::speak("generic.wav"))
            .on_for("greet", "bob", Response::speak("bob.wav"));

        let bob = CriteriaSet::parse("concept:greet,name:bob");
        let alice = CriteriaSet::parse("concept:greet,name:alice");
        assert_eq!(resolver.find_best_response(&bob).unwrap().text, "bob.wav");
        assert_eq!(resolver.find_best_response(&alice).unwrap().text, "generic.wav");
        assert!(resolver
            .find_best_response(&CriteriaSet::parse("concept:farewell"))
            .is_none());
        assert_eq!(resolver.criteria_log().borrow().len(), 3);
    }
}
