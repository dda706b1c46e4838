//! The simulated cast.

use serde::Deserialize;
use speech_core::{
    Allegiance, Concept, ContextScope, CriteriaSet, EntityDirectory, EntityHandle, Expresser, Position, Response,
    SpeechHost,
};

/// An actor as written in a scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct ActorSpec {
    pub name: String,
    #[serde(default)]
    pub allegiance: Allegiance,
    #[serde(default)]
    pub position: [f32; 3],
    #[serde(default)]
    pub player: bool,
    /// Criteria the actor always contributes, `key:value,...`.
    #[serde(default)]
    pub criteria: String,
    /// Actors that talk over everyone else opt out of turn-taking.
    #[serde(default = "default_true")]
    pub takes_turns: bool,
}

fn default_true() -> bool {
    true
}

/// A context a response asked to apply beyond its own speaker.
#[derive(Debug, Clone)]
struct SharedContext {
    source: EntityHandle,
    scope: ContextScope,
    context: CriteriaSet,
}

#[derive(Debug, Clone)]
pub struct SimActor {
    pub handle: EntityHandle,
    pub name: String,
    pub allegiance: Allegiance,
    pub position: Position,
    pub alive: bool,
    pub player: bool,
    pub criteria: CriteriaSet,
    pub expresser: Expresser,
    /// Whether the actor was talking when last checked.
    pub was_speaking: bool,
    outbox: Vec<SharedContext>,
}

impl SimActor {
    fn from_spec(handle: EntityHandle, spec: &ActorSpec) -> Self {
        let [x, y, z] = spec.position;
        let expresser = if spec.takes_turns {
            Expresser::new(handle)
        } else {
            Expresser::new(handle).without_semaphore()
        };
        Self {
            handle,
            name: spec.name.clone(),
            allegiance: spec.allegiance,
            position: Position::new(x, y, z),
            alive: true,
            player: spec.player,
            criteria: CriteriaSet::parse(&spec.criteria),
            expresser,
            was_speaking: false,
            outbox: Vec::new(),
        }
    }
}

impl SpeechHost for SimActor {
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

    fn expresser(&self) -> Option<&Expresser> {
        Some(&self.expresser)
    }

    fn expresser_mut(&mut self) -> Option<&mut Expresser> {
        Some(&mut self.expresser)
    }

    fn modify_or_append_criteria(&self, criteria: &mut CriteriaSet) {
        criteria.set("name", self.name.clone());
        criteria.set("allegiance", self.allegiance.to_string());
        criteria.merge(&self.criteria);
    }

    fn modify_or_append_derived_criteria(&self, criteria: &mut CriteriaSet) {
        let speaking = if self.was_speaking { "1" } else { "0" };
        criteria.set("speaking", speaking);
    }

    fn modify_or_append_observer_criteria(&self, criteria: &mut CriteriaSet) {
        criteria.set("player", self.name.clone());
    }

    fn stop_speaking(&mut self) {
        tracing::debug!(actor = %self.name, "cut off");
        self.was_speaking = false;
    }

    fn on_start_speaking(&mut self) {
        self.was_speaking = true;
    }

    fn on_spoke_concept(&mut self, concept: &Concept, response: &Response) {
        tracing::debug!(actor = %self.name, concept = concept.name(), rule = %response.rule, "spoke concept");
    }

    fn add_context(&mut self, scope: ContextScope, context: &CriteriaSet) {
        match scope {
            ContextScope::Speaker => self.criteria.merge(context),
            scope => self.outbox.push(SharedContext {
                source: self.handle,
                scope,
                context: context.clone(),
            }),
        }
    }
}

/// Every actor in the scenario. Actors are never removed, only killed.
#[derive(Debug, Clone, Default)]
pub struct SimWorld {
    actors: Vec<SimActor>,
    observer: Option<EntityHandle>,
}

impl SimWorld {
    pub fn new(specs: &[ActorSpec]) -> Self {
        let actors: Vec<SimActor> = specs
            .iter()
            .enumerate()
            .map(|(index, spec)| SimActor::from_spec(EntityHandle::new(index as u32, 1), spec))
            .collect();
        let observer = actors.iter().find(|actor| actor.player).map(|actor| actor.handle);
        Self { actors, observer }
    }

    pub fn actors(&self) -> &[SimActor] {
        &self.actors
    }

    pub fn actor(&self, handle: EntityHandle) -> Option<&SimActor> {
        self.actors
            .get(handle.index() as usize)
            .filter(|actor| actor.handle == handle)
    }

    pub fn actor_mut(&mut self, handle: EntityHandle) -> Option<&mut SimActor> {
        self.actors
            .get_mut(handle.index() as usize)
            .filter(|actor| actor.handle == handle)
    }

    pub fn handles(&self) -> Vec<EntityHandle> {
        self.actors.iter().map(|actor| actor.handle).collect()
    }

    /// Deliver squad and enemy contexts written since the last call.
    pub fn propagate_contexts(&mut self) {
        let pending: Vec<SharedContext> = self
            .actors
            .iter_mut()
            .flat_map(|actor| actor.outbox.drain(..))
            .collect();
        for shared in pending {
            let Some(source) = self.actor(shared.source).map(|actor| actor.allegiance) else {
                continue;
            };
            for actor in &mut self.actors {
                let receives = match shared.scope {
                    ContextScope::Squad => actor.allegiance == source,
                    ContextScope::Enemy => actor.allegiance != source,
                    ContextScope::Speaker | ContextScope::World => false,
                };
                if receives {
                    actor.criteria.merge(&shared.context);
                }
            }
        }
    }

    /// Actors whose line ended by `now`, marking them silent.
    ///
    /// Actors holding a postponed follow-up count as finished once quiet,
    /// even if their last act took no time.
    pub fn take_finished_speakers(&mut self, now: f32) -> Vec<EntityHandle> {
        let mut finished = Vec::new();
        for actor in &mut self.actors {
            let pending = actor.was_speaking || actor.expresser.postponed_followup().is_some();
            if pending && actor.alive && !actor.expresser.is_speaking(now) {
                actor.was_speaking = false;
                finished.push(actor.handle);
            }
        }
        finished
    }
}

impl EntityDirectory for SimWorld {
    fn find_by_name(&self, name: &str) -> Option<EntityHandle> {
        self.actors
            .iter()
            .find(|actor| actor.alive && actor.name.eq_ignore_ascii_case(name))
            .map(|actor| actor.handle)
    }

    fn from_index(&self, index: u32) -> Option<EntityHandle> {
        self.actors
            .get(index as usize)
            .filter(|actor| actor.alive)
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
