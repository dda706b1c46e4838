//! The speech system: session state plus the speak pipeline.
//!
//! One [`SpeechSystem`] exists per simulation session. It owns the two
//! speech floors, the response queue, the resolver and the executor, and
//! runs every character's speak requests against an [`EntityDirectory`]
//! supplied by the host on each call.
//!
//! A speak request runs to completion inside the call:
//! 1. gather criteria from the concept, the caller, the session and the characters
//! 2. ask the resolver for the best response
//! 3. check the speech policies (history, floor, interruption)
//! 4. hand the response to the executor and record what happened
//! 5. schedule any follow-up

use crate::concept::Concept;
use crate::config::SpeechConfig;
use crate::criteria::CriteriaSet;
use crate::entity::{EntityDirectory, EntityHandle, SceneState};
use crate::error::SpeakError;
use crate::executor::{EntityIoCommand, SpeechExecutor};
use crate::queue::{ResponseQueue, ResponseQueueManager};
use crate::resolver::Resolver;
use crate::response::{ContextScope, Response, ResponseKind};
use crate::semaphore::{SpeechSemaphore, SpeechSemaphores};
use crate::Allegiance;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Criteria keys with this prefix are written to the world context instead of being scored.
pub const WORLD_CONTEXT_PREFIX: &str = "world";

pub const CONCEPT_KEY: &str = "concept";
pub const SUBJECT_KEY: &str = "Subject";
pub const FROM_KEY: &str = "From";
pub const FROM_INDEX_KEY: &str = "From_idx";
pub const DIST_FROM_ISSUER_KEY: &str = "dist_from_issuer";

/// Whether a speak request has to win the speech floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Floor {
    /// Unsolicited speech; the allegiance floor must be free.
    Contested,
    /// A reply the issuer handed over; the floor is not consulted.
    Granted,
}

/// A resolved response and the criteria it was resolved against.
#[derive(Debug, Clone)]
pub struct FoundResponse {
    pub response: Response,
    /// The criteria that were scored, world writes already stripped.
    pub criteria: CriteriaSet,
    /// `world`-prefixed criteria, prefix removed, owed to the world context.
    pub world_writes: CriteriaSet,
}

/// A speech act that was performed.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub speaker: EntityHandle,
    pub concept: Concept,
    pub response: Response,
    /// Seconds the act runs, excluding its pre-delay.
    pub duration: f32,
}

/// Session-wide speech state and the speak pipeline.
pub struct SpeechSystem {
    pub(crate) config: SpeechConfig,
    pub(crate) now: f32,
    pub(crate) semaphores: SpeechSemaphores,
    pub(crate) queues: ResponseQueueManager,
    pub(crate) resolver: Box<dyn Resolver>,
    pub(crate) executor: Box<dyn SpeechExecutor>,
    pub(crate) global_criteria: CriteriaSet,
    pub(crate) world_context: CriteriaSet,
    pub(crate) suppressed: bool,
    pub(crate) rng: StdRng,
    /// Called with the queue after every queued dispatch.
    #[cfg(test)]
    pub(crate) sweep_hook: Option<Box<dyn FnMut(&mut ResponseQueue)>>,
}

impl SpeechSystem {
    /// Start a session. The response queue is created immediately.
    pub fn new(
        config: SpeechConfig,
        resolver: Box<dyn Resolver>,
        executor: Box<dyn SpeechExecutor>,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut system = Self {
            config,
            now: 0.0,
            semaphores: SpeechSemaphores::new(),
            queues: ResponseQueueManager::new(),
            resolver,
            executor,
            global_criteria: CriteriaSet::new(),
            world_context: CriteriaSet::new(),
            suppressed: false,
            rng,
            #[cfg(test)]
            sweep_hook: None,
        };
        system.level_init();
        system
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Level start: free both floors and make sure a queue exists.
    pub fn level_init(&mut self) {
        self.semaphores.reset();
        self.queues.level_init();
    }

    /// Level end: drop pending responses and free both floors.
    pub fn level_shutdown(&mut self) {
        self.queues.level_shutdown();
        self.semaphores.reset();
        self.world_context = CriteriaSet::new();
    }

    /// Session end: destroy the queue.
    pub fn shutdown(&mut self) {
        self.queues.shutdown();
    }

    /// Tuning this session was started with.
    pub fn config(&self) -> &SpeechConfig {
        &self.config
    }

    /// Current session time in seconds.
    pub fn now(&self) -> f32 {
        self.now
    }

    /// Jump the session clock, e.g. after restoring a save.
    pub fn set_time(&mut self, now: f32) {
        self.now = now;
    }

    /// Move the clock forward without dispatching anything.
    pub fn advance(&mut self, seconds: f32) {
        self.now += seconds;
    }

    /// Run one simulation frame: advance the clock, then dispatch due responses.
    pub fn tick(&mut self, world: &mut dyn EntityDirectory, seconds: f32) -> usize {
        self.advance(seconds);
        self.per_frame_dispatch(world)
    }

    /// Silence (or un-silence) every speak request in the session.
    pub fn set_speech_suppressed(&mut self, suppressed: bool) {
        self.suppressed = suppressed;
    }

    pub fn is_speech_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Criteria added to every speak request in this session.
    pub fn global_criteria(&self) -> &CriteriaSet {
        &self.global_criteria
    }

    /// Mutable access to the session criteria, e.g. for the map name.
    pub fn global_criteria_mut(&mut self) -> &mut CriteriaSet {
        &mut self.global_criteria
    }

    /// Contexts written by world-scoped responses and `world`-prefixed criteria.
    pub fn world_context(&self) -> &CriteriaSet {
        &self.world_context
    }

    /// The speech floor shared by everyone of `allegiance`.
    pub fn semaphore(&self, allegiance: Allegiance) -> &SpeechSemaphore {
        self.semaphores.get(allegiance)
    }

    /// The response queue, absent after [`SpeechSystem::shutdown`].
    pub fn queue(&self) -> Option<&ResponseQueue> {
        self.queues.queue()
    }

    pub fn queue_mut(&mut self) -> Option<&mut ResponseQueue> {
        self.queues.queue_mut()
    }

    /// Every response the resolver knows.
    pub fn list_responses(&self) -> Vec<Response> {
        self.resolver.all_responses()
    }

    // =========================================================================
    // Respondent roster
    // =========================================================================

    /// Let `host` answer `any` and `all` follow-ups.
    ///
    /// Returns false if it is already registered or there is no queue.
    pub fn register_respondent(&mut self, world: &dyn EntityDirectory, host: EntityHandle) -> bool {
        match self.queues.queue_mut() {
            Some(queue) => queue.add_expresser_host(host, world),
            None => {
                tracing::warn!(%host, "no response queue to register with");
                false
            }
        }
    }

    /// Take `host` out of the respondent roster.
    pub fn unregister_respondent(&mut self, host: EntityHandle) {
        if let Some(queue) = self.queues.queue_mut() {
            queue.remove_expresser_host(host);
        }
    }

    /// Quash every queued entry addressed to `speaker`. Returns how many.
    pub fn remove_speech_queued_for(&mut self, speaker: EntityHandle) -> usize {
        self.queues
            .queue_mut()
            .map_or(0, |queue| queue.remove_speech_queued_for(speaker))
    }

    /// Forget an entity that is being destroyed.
    pub fn forget_entity(&mut self, handle: EntityHandle) {
        self.unregister_respondent(handle);
        self.remove_speech_queued_for(handle);
        for allegiance in [Allegiance::Friend, Allegiance::Foe] {
            let semaphore = self.semaphores.get_mut(allegiance);
            if semaphore.holder() == Some(handle) {
                semaphore.release();
            }
        }
    }

    // =========================================================================
    // Per-character queries
    // =========================================================================

    /// Free to start talking: idle, not blocked, and the floor is available.
    pub fn can_speak(&self, world: &dyn EntityDirectory, who: EntityHandle) -> bool {
        let Some(host) = world.host(who) else {
            return false;
        };
        let Some(expresser) = host.expresser() else {
            return false;
        };
        if !expresser.can_speak(self.now) {
            return false;
        }
        !expresser.uses_semaphore()
            || self
                .semaphores
                .get(host.allegiance())
                .is_available(self.now, who)
    }

    /// Done with its own line (pre-delay not counted) and not blocked. Ignores the floor.
    pub fn can_speak_after_myself(&self, world: &dyn EntityDirectory, who: EntityHandle) -> bool {
        world
            .host(who)
            .and_then(|host| host.expresser())
            .is_some_and(|expresser| expresser.can_speak_after_myself(self.now))
    }

    /// Whether `who` is mid-utterance, pre-delay included.
    pub fn is_speaking(&self, world: &dyn EntityDirectory, who: EntityHandle) -> bool {
        world
            .host(who)
            .and_then(|host| host.expresser())
            .is_some_and(|expresser| expresser.is_speaking(self.now))
    }

    /// Whether `who`'s history allows `concept` right now (speak-once, respeak delay).
    pub fn can_speak_concept(&self, world: &dyn EntityDirectory, who: EntityHandle, concept: &Concept) -> bool {
        world
            .host(who)
            .and_then(|host| host.expresser())
            .is_some_and(|expresser| expresser.can_speak_concept(concept.name(), self.now))
    }

    /// End the character's current utterance and give up its floor.
    pub fn force_not_speaking(&mut self, world: &mut dyn EntityDirectory, who: EntityHandle) {
        let now = self.now;
        let Some(host) = world.host_mut(who) else {
            return;
        };
        let allegiance = host.allegiance();
        if let Some(expresser) = host.expresser_mut() {
            expresser.force_not_speaking(now);
        }
        let semaphore = self.semaphores.get_mut(allegiance);
        if semaphore.holder() == Some(who) {
            semaphore.release();
        }
    }

    /// Keep `who` quiet until `time`.
    pub fn block_speech_until(&mut self, world: &mut dyn EntityDirectory, who: EntityHandle, time: f32) {
        if let Some(expresser) = world.host_mut(who).and_then(|host| host.expresser_mut()) {
            expresser.block_speech_until(time);
        }
    }

    // =========================================================================
    // Speak pipeline
    // =========================================================================

    /// Build the criteria set for `who` speaking `concept`.
    pub fn gather_criteria(
        &self,
        world: &dyn EntityDirectory,
        who: EntityHandle,
        concept: &Concept,
        modifiers: Option<&CriteriaSet>,
    ) -> CriteriaSet {
        let mut criteria = CriteriaSet::new();
        criteria.append(CONCEPT_KEY, concept.name(), self.config.concept_weight);
        if let Some(modifiers) = modifiers {
            criteria.merge(modifiers);
        }
        criteria.merge(&self.global_criteria);
        criteria.merge(&self.world_context);

        let Some(host) = world.host(who) else {
            return criteria;
        };
        host.modify_or_append_criteria(&mut criteria);
        if !host.is_player() {
            let observer = world
                .primary_observer()
                .filter(|observer| *observer != who)
                .and_then(|observer| world.host(observer));
            if let Some(observer) = observer {
                observer.modify_or_append_observer_criteria(&mut criteria);
            }
        }
        host.modify_or_append_derived_criteria(&mut criteria);
        criteria
    }

    /// Resolve and perform `concept` for `who`. Returns whether anything was said.
    pub fn speak(
        &mut self,
        world: &mut dyn EntityDirectory,
        who: EntityHandle,
        concept: &Concept,
        modifiers: Option<&CriteriaSet>,
    ) -> bool {
        self.try_speak(world, who, concept, modifiers).is_ok()
    }

    /// Like [`SpeechSystem::speak`], reporting why nothing was said.
    pub fn try_speak(
        &mut self,
        world: &mut dyn EntityDirectory,
        who: EntityHandle,
        concept: &Concept,
        modifiers: Option<&CriteriaSet>,
    ) -> Result<Utterance, SpeakError> {
        self.speak_with(world, who, concept, modifiers, Floor::Contested)
    }

    pub(crate) fn speak_with(
        &mut self,
        world: &mut dyn EntityDirectory,
        who: EntityHandle,
        concept: &Concept,
        modifiers: Option<&CriteriaSet>,
        floor: Floor,
    ) -> Result<Utterance, SpeakError> {
        let result = self.speak_inner(world, who, concept, modifiers, floor);
        if let Err(err) = &result {
            tracing::debug!(%who, concept = concept.name(), error = %err, "did not speak");
        }
        result
    }

    fn speak_inner(
        &mut self,
        world: &mut dyn EntityDirectory,
        who: EntityHandle,
        concept: &Concept,
        modifiers: Option<&CriteriaSet>,
        floor: Floor,
    ) -> Result<Utterance, SpeakError> {
        if self.suppressed {
            return Err(SpeakError::Suppressed);
        }
        let concept = concept.clone().with_speaker(who);
        let found = self.find_response(&*world, who, &concept, modifiers)?;
        self.apply_world_writes(&found.world_writes);
        self.dispatch_response(world, who, &concept, found.response, found.criteria, floor)
    }

    /// First half of a two-phase speak: resolve without performing.
    ///
    /// World writes in the criteria are applied here, once a response is found.
    pub fn speak_find_response(
        &mut self,
        world: &dyn EntityDirectory,
        who: EntityHandle,
        concept: &Concept,
        modifiers: Option<&CriteriaSet>,
    ) -> Option<FoundResponse> {
        let concept = concept.clone().with_speaker(who);
        let found = self.find_response(world, who, &concept, modifiers).ok()?;
        self.apply_world_writes(&found.world_writes);
        Some(found)
    }

    /// Second half of a two-phase speak: perform an already resolved response.
    ///
    /// Without `criteria`, the speaker's criteria are gathered fresh for
    /// follow-up target resolution.
    pub fn speak_dispatch_response(
        &mut self,
        world: &mut dyn EntityDirectory,
        who: EntityHandle,
        concept: &Concept,
        response: Response,
        criteria: Option<&CriteriaSet>,
    ) -> bool {
        if self.suppressed {
            return false;
        }
        let concept = concept.clone().with_speaker(who);
        let criteria = match criteria {
            Some(criteria) => criteria.clone(),
            None => self.gather_criteria(&*world, who, &concept, None),
        };
        match self.dispatch_response(world, who, &concept, response, criteria, Floor::Contested) {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(%who, concept = concept.name(), error = %err, "did not speak");
                false
            }
        }
    }

    /// Resolve without side effects. The caller applies `world_writes`.
    pub(crate) fn find_response(
        &mut self,
        world: &dyn EntityDirectory,
        who: EntityHandle,
        concept: &Concept,
        modifiers: Option<&CriteriaSet>,
    ) -> Result<FoundResponse, SpeakError> {
        let host = world.host(who).ok_or(SpeakError::Dangling(who))?;
        if !host.is_alive() {
            return Err(SpeakError::Dead(who));
        }
        if host.expresser().is_none() {
            return Err(SpeakError::NoExpresser(who));
        }

        let mut criteria = self.gather_criteria(world, who, concept, modifiers);
        let world_writes = criteria.intercept_prefixed(WORLD_CONTEXT_PREFIX);

        let response = self
            .resolver
            .find_best_response(&criteria)
            .ok_or_else(|| SpeakError::NoResponse(concept.name().to_string()))?;
        if response.is_empty() {
            return Err(SpeakError::EmptyResponse(concept.name().to_string()));
        }
        Ok(FoundResponse {
            response,
            criteria,
            world_writes,
        })
    }

    pub(crate) fn apply_world_writes(&mut self, writes: &CriteriaSet) {
        if !writes.is_empty() {
            self.world_context.merge(writes);
        }
    }

    pub(crate) fn dispatch_response(
        &mut self,
        world: &mut dyn EntityDirectory,
        who: EntityHandle,
        concept: &Concept,
        response: Response,
        criteria: CriteriaSet,
        floor: Floor,
    ) -> Result<Utterance, SpeakError> {
        let now = self.now;
        let concept = concept.clone().with_speaker(who);

        if response.is_empty() {
            return Err(SpeakError::EmptyResponse(concept.name().to_string()));
        }
        if response.kind == ResponseKind::Response {
            debug_assert!(false, "nested response group reached dispatch");
            tracing::error!(rule = %response.rule, "nested response group reached dispatch");
            return Err(SpeakError::InvariantViolation(
                "nested response group reached dispatch",
            ));
        }

        // Policy gates. Nothing is mutated until all of them pass.
        let interrupt = {
            let host = world.host(who).ok_or(SpeakError::Dangling(who))?;
            if !host.is_alive() {
                return Err(SpeakError::Dead(who));
            }
            let expresser = host.expresser().ok_or(SpeakError::NoExpresser(who))?;
            if !expresser.can_speak_concept(concept.name(), now) {
                return Err(SpeakError::ConceptOnCooldown(concept.name().to_string()));
            }
            if floor == Floor::Contested && expresser.uses_semaphore() {
                let allegiance = host.allegiance();
                if !self.semaphores.get(allegiance).is_available(now, who) {
                    return Err(SpeakError::FloorTaken(allegiance));
                }
            }
            let interrupt = expresser.is_speaking(now)
                && !concept.is_empty()
                && response.kind != ResponseKind::Print;
            if interrupt && host.scene_state() == SceneState::Locked {
                return Err(SpeakError::SceneLocked);
            }
            interrupt
        };

        let duration = self.perform(&*world, who, &response)?;

        let host = world.host_mut(who).ok_or(SpeakError::Dangling(who))?;
        // The current line is only cut off once the new act is playing.
        if interrupt {
            tracing::debug!(%who, concept = concept.name(), "already speaking, cutting off current line");
            host.stop_speaking();
        }
        let allegiance = host.allegiance();
        let expresser = host.expresser_mut().ok_or(SpeakError::NoExpresser(who))?;
        if duration > 0.0 {
            expresser.note_speaking(now, duration, response.delay);
        }
        expresser.note_accepted(now);
        expresser
            .history_mut()
            .set_spoke_concept(concept.name(), now, Some(&response));
        let uses_semaphore = expresser.uses_semaphore();

        if duration > 0.0 {
            if uses_semaphore {
                self.semaphores
                    .get_mut(allegiance)
                    .acquire(now, duration + response.delay, who);
            }
            host.on_start_speaking();
        }

        if let Some(context) = response.context.as_deref().filter(|c| !c.trim().is_empty()) {
            let context = CriteriaSet::parse(context);
            match response.context_scope {
                ContextScope::World => self.world_context.merge(&context),
                scope => host.add_context(scope, &context),
            }
        }
        host.on_spoke_concept(&concept, &response);

        // Anything still queued for this character was meant for before it started this line.
        self.remove_speech_queued_for(who);

        tracing::debug!(
            %who,
            concept = concept.name(),
            kind = %response.kind,
            text = %response.text,
            duration,
            "spoke"
        );

        if let Some(followup) = response.followup.clone() {
            self.schedule_followup(world, &concept, &criteria, &response, followup);
        }

        Ok(Utterance {
            speaker: who,
            concept,
            response,
            duration,
        })
    }

    /// Hand a response to the executor. Returns how long the act runs.
    fn perform(
        &mut self,
        world: &dyn EntityDirectory,
        who: EntityHandle,
        response: &Response,
    ) -> Result<f32, SpeakError> {
        let failed = || SpeakError::PlaybackFailed(response.text.clone());
        let played = |duration: f32| if duration > 0.0 { Ok(duration) } else { Err(failed()) };

        match response.kind {
            ResponseKind::Speak => played(self.executor.speak_line(
                who,
                &response.text,
                response.sound_level,
                response.delay,
            )),
            ResponseKind::Sentence => played(self.executor.play_sentence(
                who,
                &response.text,
                response.sound_level,
                response.delay,
            )),
            ResponseKind::Scene => {
                played(self.executor.play_scene(who, &response.text, response.delay))
            }
            ResponseKind::Print => Ok(self
                .executor
                .print(who, &response.text)
                .filter(|duration| *duration > 0.0)
                .unwrap_or(self.config.print_duration)),
            ResponseKind::EntityIo => {
                let command = EntityIoCommand::parse(&response.text).ok_or_else(|| {
                    tracing::warn!(text = %response.text, "malformed entity I/O response");
                    failed()
                })?;
                let target = world.resolve_name_or_index(command.target).ok_or_else(|| {
                    tracing::warn!(entity = command.target, "entity I/O target not found");
                    failed()
                })?;
                self.executor
                    .fire_input(target, command.input, command.param, 0.0, Some(who));
                Ok(0.0)
            }
            ResponseKind::Script => {
                if self.executor.run_script(who, &response.text) {
                    Ok(0.0)
                } else {
                    Err(failed())
                }
            }
            ResponseKind::None => Err(SpeakError::EmptyResponse(response.text.clone())),
            ResponseKind::Response => Err(SpeakError::InvariantViolation(
                "nested response group reached the executor",
            )),
        }
    }
}
