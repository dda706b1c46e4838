//! Per-frame dispatch of the response queue.
//!
//! Dispatching an entry runs the speak pipeline, which can quash and add
//! queue entries while the sweep is still walking the queue. Entries added
//! during a sweep wait for the next one. When anything other than an
//! append happened, the sweep restarts from the head of the queue.
//!
//! The pipeline itself only appends and quashes in place, so a restart
//! means the queue was edited from outside the speak path.

use crate::concept::Concept;
use crate::criteria::CriteriaSet;
use crate::entity::{EntityDirectory, EntityHandle, Position};
use crate::error::FailureClass;
use crate::followup::resolve_followup_target;
use crate::queue::DeferredResponse;
use crate::system::{Floor, FoundResponse, SpeechSystem, DIST_FROM_ISSUER_KEY};
use crate::target::TargetSpec;
use rand::Rng;
use std::cmp::Ordering;

/// A respondent being considered for an any-dispatch.
struct Prospect {
    respondent: EntityHandle,
    found: FoundResponse,
}

impl SpeechSystem {
    /// Dispatch every queued entry whose time has come. Returns how many spoke.
    pub fn per_frame_dispatch(&mut self, world: &mut dyn EntityDirectory) -> usize {
        let now = self.now;
        let Some(queue) = self.queues.queue() else {
            return 0;
        };
        if queue.is_empty() {
            return 0;
        }
        if queue.len() >= self.config.queue_warn_size {
            tracing::warn!(len = queue.len(), "response queue has grown suspiciously large");
        }

        let horizon = queue.next_id();
        let mut dispatched = 0;
        let mut restarts = 0;
        let mut cursor = 0;

        loop {
            let Some(queue) = self.queues.queue_mut() else {
                return dispatched;
            };
            let Some(entry) = queue.entry_at(cursor) else {
                break;
            };
            if entry.is_quashed() {
                queue.remove_at(cursor);
                continue;
            }
            if entry.id() >= horizon || entry.dispatch_time > now {
                cursor += 1;
                continue;
            }

            let entry = queue.remove_at(cursor);
            let remaining: Vec<u64> = queue.entries().iter().map(DeferredResponse::id).collect();

            if self.dispatch_deferred(world, &entry) {
                dispatched += 1;
            }
            self.run_sweep_hook();

            let Some(queue) = self.queues.queue() else {
                return dispatched;
            };
            let only_appended = queue.len() >= remaining.len()
                && queue
                    .entries()
                    .iter()
                    .zip(&remaining)
                    .all(|(entry, id)| entry.id() == *id);
            if !only_appended {
                restarts += 1;
                if restarts > self.config.max_sweep_restarts {
                    tracing::warn!(
                        restarts,
                        class = ?FailureClass::StructuralHazard,
                        "response queue keeps changing under dispatch; giving up this frame"
                    );
                    break;
                }
                tracing::warn!(
                    restarts,
                    class = ?FailureClass::StructuralHazard,
                    "response queue changed during dispatch; restarting sweep"
                );
                cursor = 0;
            }
        }

        if let Some(queue) = self.queues.queue_mut() {
            queue.sweep_quashed();
        }
        dispatched
    }

    #[cfg(test)]
    fn run_sweep_hook(&mut self) {
        if let (Some(hook), Some(queue)) = (self.sweep_hook.as_mut(), self.queues.queue_mut()) {
            hook(queue);
        }
    }

    #[cfg(not(test))]
    fn run_sweep_hook(&mut self) {}

    fn dispatch_deferred(&mut self, world: &mut dyn EntityDirectory, entry: &DeferredResponse) -> bool {
        tracing::debug!(
            concept = entry.concept.name(),
            recipient = %entry.target,
            "dispatching queued response"
        );
        match entry.target {
            TargetSpec::Invalid => false,
            TargetSpec::Specific(respondent) => self.dispatch_to_specific(world, entry, respondent),
            TargetSpec::All { exclude } => self.dispatch_to_all(world, entry, exclude),
            TargetSpec::Any { exclude } => self.dispatch_to_any(world, entry, exclude),
        }
    }

    fn dispatch_to_specific(
        &mut self,
        world: &mut dyn EntityDirectory,
        entry: &DeferredResponse,
        respondent: EntityHandle,
    ) -> bool {
        let Some(position) = world
            .host(respondent)
            .filter(|host| host.is_alive())
            .map(|host| host.position())
        else {
            tracing::debug!(%respondent, concept = entry.concept.name(), "queued respondent is gone");
            return false;
        };
        let origin = issuer_position(&*world, entry);
        let criteria = respondent_criteria(entry, origin, position);
        self.speak_with(world, respondent, &entry.concept, Some(&criteria), Floor::Granted)
            .is_ok()
    }

    fn dispatch_to_all(
        &mut self,
        world: &mut dyn EntityDirectory,
        entry: &DeferredResponse,
        exclude: Option<EntityHandle>,
    ) -> bool {
        let mut anyone_spoke = false;
        for (respondent, criteria) in self.eligible_respondents(&*world, entry, exclude) {
            if self
                .speak_with(world, respondent, &entry.concept, Some(&criteria), Floor::Granted)
                .is_ok()
            {
                anyone_spoke = true;
            }
        }
        anyone_spoke
    }

    /// Pick one respondent at random among those whose response scores
    /// within the slop of the best, then dispatch its response.
    fn dispatch_to_any(
        &mut self,
        world: &mut dyn EntityDirectory,
        entry: &DeferredResponse,
        exclude: Option<EntityHandle>,
    ) -> bool {
        let capacity = self.config.any_reservoir_capacity.max(1);
        let slop = self.config.any_score_slop;
        let mut reservoir: Vec<(f32, Prospect)> = Vec::with_capacity(capacity);
        let mut best = 0.0;

        for (respondent, criteria) in self.eligible_respondents(&*world, entry, exclude) {
            let alive = world.host(respondent).is_some_and(|host| host.is_alive());
            if !alive || !self.can_speak_concept(&*world, respondent, &entry.concept) {
                continue;
            }
            let concept = entry.concept.clone().with_speaker(respondent);
            let Ok(found) = self.find_response(&*world, respondent, &concept, Some(&criteria)) else {
                continue;
            };
            let score = found.response.score;
            if score <= 0.0 {
                continue;
            }
            admit_prospect(
                &mut reservoir,
                &mut best,
                capacity,
                slop,
                score,
                Prospect { respondent, found },
            );
        }

        if reservoir.is_empty() {
            tracing::debug!(concept = entry.concept.name(), "nobody had anything to say");
            return false;
        }
        let pick = self.rng.gen_range(0..reservoir.len());
        let (score, chosen) = reservoir.swap_remove(pick);
        tracing::debug!(
            respondent = %chosen.respondent,
            score,
            candidates = reservoir.len() + 1,
            "picked respondent"
        );
        // Only the chosen respondent's world writes take effect.
        self.apply_world_writes(&chosen.found.world_writes);
        self.dispatch_response(
            world,
            chosen.respondent,
            &entry.concept,
            chosen.found.response,
            chosen.found.criteria,
            Floor::Granted,
        )
        .is_ok()
    }

    /// Roster members that may answer `entry`, with their per-respondent criteria.
    fn eligible_respondents(
        &self,
        world: &dyn EntityDirectory,
        entry: &DeferredResponse,
        exclude: Option<EntityHandle>,
    ) -> Vec<(EntityHandle, CriteriaSet)> {
        let Some(queue) = self.queues.queue() else {
            return Vec::new();
        };
        let origin = issuer_position(world, entry);
        let max_distance = self.config.followup_max_distance;

        queue
            .respondents()
            .into_iter()
            .filter(|respondent| Some(*respondent) != entry.issuer && Some(*respondent) != exclude)
            .filter_map(|respondent| {
                let host = world.host(respondent)?;
                host.expresser()?;
                let position = host.position();
                if let Some(origin) = origin {
                    if origin.distance(&position) > max_distance {
                        return None;
                    }
                }
                Some((respondent, respondent_criteria(entry, origin, position)))
            })
            .collect()
    }

    /// Queue `concept` for a console target token, dispatching on the next frame.
    ///
    /// `target` accepts the follow-up symbols (`any`, `all`, an entity name).
    /// `criteria` uses the `key:value,key:value` form.
    pub fn force_concept(
        &mut self,
        world: &dyn EntityDirectory,
        target: &str,
        concept: &str,
        criteria: Option<&str>,
    ) -> bool {
        let concept = concept.trim();
        if concept.is_empty() {
            tracing::warn!("no concept given");
            return false;
        }
        let concept = Concept::new(concept);
        let criteria = criteria.map(CriteriaSet::parse).unwrap_or_default();
        let recipient = resolve_followup_target(world, &concept, &criteria, target, None);
        if !recipient.is_valid(world) {
            tracing::warn!(target_token = target, concept = concept.name(), "cannot force concept on that target");
            return false;
        }

        let now = self.now;
        match self.queues.queue_mut() {
            Some(queue) => {
                queue.add(concept, criteria, now, recipient, None);
                true
            }
            None => {
                tracing::warn!("no response queue");
                false
            }
        }
    }
}

fn issuer_position(world: &dyn EntityDirectory, entry: &DeferredResponse) -> Option<Position> {
    entry
        .issuer
        .and_then(|issuer| world.host(issuer))
        .map(|host| host.position())
}

fn respondent_criteria(entry: &DeferredResponse, origin: Option<Position>, position: Position) -> CriteriaSet {
    let mut criteria = entry.criteria.clone();
    if let Some(origin) = origin {
        criteria.set(DIST_FROM_ISSUER_KEY, format!("{:.0}", origin.distance(&position)));
    }
    criteria
}

/// Offer a scored candidate to the any-dispatch reservoir.
///
/// The reservoir holds candidates within `slop` of the best score seen.
/// A new best always gets in, evicting the weakest member if full; other
/// candidates only take free room. Returns whether the candidate was kept.
fn admit_prospect<T>(
    reservoir: &mut Vec<(f32, T)>,
    best: &mut f32,
    capacity: usize,
    slop: f32,
    score: f32,
    candidate: T,
) -> bool {
    if score > *best {
        *best = score;
        let floor = score - slop;
        reservoir.retain(|(kept, _)| *kept >= floor);
        if reservoir.len() >= capacity {
            let weakest = reservoir
                .iter()
                .enumerate()
                .min_by(|a, b| a.1 .0.partial_cmp(&b.1 .0).unwrap_or(Ordering::Equal))
                .map(|(index, _)| index);
            if let Some(index) = weakest {
                reservoir.swap_remove(index);
            }
        }
        reservoir.push((score, candidate));
        true
    } else if score >= *best - slop {
        if reservoir.len() < capacity {
            reservoir.push((score, candidate));
            true
        } else {
            tracing::debug!(score, capacity, "respondent reservoir full");
            false
        }
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{Followup, FollowupTiming, Response};
    use crate::testing::{ScriptedResolver, TestHarness};
    use crate::{Allegiance, Position, SpeechConfig};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_reservoir_keeps_only_the_best_without_slop() {
        let mut reservoir = Vec::new();
        let mut best = 0.0;
        assert!(admit_prospect(&mut reservoir, &mut best, 4, 0.0, 3.0, "a"));
        assert!(admit_prospect(&mut reservoir, &mut best, 4, 0.0, 3.0, "b"));
        assert!(!admit_prospect(&mut reservoir, &mut best, 4, 0.0, 2.0, "c"));
        assert!(admit_prospect(&mut reservoir, &mut best, 4, 0.0, 5.0, "d"));
        assert_eq!(reservoir, vec![(5.0, "d")]);
        assert_eq!(best, 5.0);
    }

    #[test]
    fn test_reservoir_slop_and_capacity() {
        let mut reservoir = Vec::new();
        let mut best = 0.0;
        admit_prospect(&mut reservoir, &mut best, 2, 1.0, 4.0, "a");
        admit_prospect(&mut reservoir, &mut best, 2, 1.0, 3.5, "b");
        // full: a non-improving candidate is dropped
        assert!(!admit_prospect(&mut reservoir, &mut best, 2, 1.0, 3.9, "c"));
        // a new best always gets in, evicting the weakest
        assert!(admit_prospect(&mut reservoir, &mut best, 2, 1.0, 4.2, "d"));
        let mut kept: Vec<_> = reservoir.iter().map(|(_, name)| *name).collect();
        kept.sort();
        assert_eq!(kept, vec!["a", "d"]);
    }

    fn reply_rules() -> ScriptedResolver {
        ScriptedResolver::new()
            .on_for("report", "bob", Response::speak("bob.wav").with_score(2.0))
            .on_for("report", "carol", Response::speak("carol.wav").with_score(2.0))
            .on_for("report", "dave", Response::speak("dave.wav").with_score(1.0))
    }

    #[test]
    fn test_specific_entry_waits_for_its_time() {
        let mut harness = TestHarness::new(reply_rules());
        let bob = harness.spawn("bob", Allegiance::Friend);
        harness.system.queue_mut().unwrap().add(
            Concept::new("report"),
            CriteriaSet::new(),
            1.0,
            TargetSpec::Specific(bob),
            None,
        );

        assert_eq!(harness.tick(0.5), 0);
        assert_eq!(harness.system.queue().unwrap().len(), 1);
        assert_eq!(harness.tick(0.5), 1);
        assert!(harness.system.queue().unwrap().is_empty());
        assert_eq!(harness.spoken_by(bob), vec!["report"]);
    }

    #[test]
    fn test_dead_specific_target_is_dropped() {
        let mut harness = TestHarness::new(reply_rules());
        let bob = harness.spawn("bob", Allegiance::Friend);
        harness.system.queue_mut().unwrap().add(
            Concept::new("report"),
            CriteriaSet::new(),
            0.0,
            TargetSpec::Specific(bob),
            None,
        );
        harness.stage.despawn(bob);

        assert_eq!(harness.tick(0.1), 0);
        assert!(harness.system.queue().unwrap().is_empty());
    }

    #[test]
    fn test_all_skips_issuer_excluded_and_distant() {
        let mut harness = TestHarness::new(reply_rules());
        let alice = harness.spawn("alice", Allegiance::Friend);
        let bob = harness.spawn("bob", Allegiance::Friend);
        let carol = harness.spawn("carol", Allegiance::Friend);
        let dave = harness.spawn("dave", Allegiance::Friend);
        harness.stage.actor_mut(dave).unwrap().position = Position::new(5000.0, 0.0, 0.0);
        harness.stage.actor_mut(bob).unwrap().position = Position::new(30.0, 40.0, 0.0);

        harness.system.queue_mut().unwrap().add(
            Concept::new("report"),
            CriteriaSet::new(),
            0.0,
            TargetSpec::All { exclude: Some(carol) },
            Some(alice),
        );
        assert_eq!(harness.tick(0.1), 1);
        assert_eq!(harness.spoken_by(bob), vec!["report"]);
        assert!(harness.spoken_by(carol).is_empty());
        assert!(harness.spoken_by(dave).is_empty());
        assert!(harness.spoken_by(alice).is_empty());
    }

    #[test]
    fn test_respondents_see_distance_from_issuer() {
        let resolver = reply_rules();
        let log = resolver.criteria_log();
        let mut harness = TestHarness::new(resolver);
        let alice = harness.spawn("alice", Allegiance::Friend);
        let bob = harness.spawn("bob", Allegiance::Friend);
        harness.stage.actor_mut(bob).unwrap().position = Position::new(30.0, 40.0, 0.0);

        harness.system.queue_mut().unwrap().add(
            Concept::new("report"),
            CriteriaSet::new(),
            0.0,
            TargetSpec::Specific(bob),
            Some(alice),
        );
        harness.tick(0.1);
        assert_eq!(log.borrow().last().unwrap().value("dist_from_issuer"), Some("50"));
    }

    #[test]
    fn test_any_picks_among_the_best() {
        let config = SpeechConfig::default().with_seed(11);
        let mut harness = TestHarness::with_config(config, reply_rules());
        let alice = harness.spawn("alice", Allegiance::Friend);
        let bob = harness.spawn("bob", Allegiance::Friend);
        let carol = harness.spawn("carol", Allegiance::Friend);
        let dave = harness.spawn("dave", Allegiance::Friend);

        harness.system.queue_mut().unwrap().add(
            Concept::new("report"),
            CriteriaSet::new(),
            0.0,
            TargetSpec::Any { exclude: Some(alice) },
            Some(alice),
        );
        assert_eq!(harness.tick(0.1), 1);

        let bob_spoke = !harness.spoken_by(bob).is_empty();
        let carol_spoke = !harness.spoken_by(carol).is_empty();
        assert!(bob_spoke ^ carol_spoke);
        assert!(harness.spoken_by(dave).is_empty());
    }

    #[test]
    fn test_any_applies_only_the_chosen_world_writes() {
        let config = SpeechConfig::default().with_seed(3);
        let mut harness = TestHarness::with_config(config, reply_rules());
        let alice = harness.spawn("alice", Allegiance::Friend);
        let bob = harness.spawn("bob", Allegiance::Friend);
        let carol = harness.spawn("carol", Allegiance::Friend);
        let dave = harness.spawn("dave", Allegiance::Friend);
        for (who, key) in [(bob, "worldBobReplied"), (carol, "worldCarolReplied"), (dave, "worldDaveReplied")] {
            harness.stage.actor_mut(who).unwrap().criteria.set(key, "1");
        }

        harness.system.queue_mut().unwrap().add(
            Concept::new("report"),
            CriteriaSet::new(),
            0.0,
            TargetSpec::Any { exclude: None },
            Some(alice),
        );
        assert_eq!(harness.tick(0.1), 1);

        let replied = if harness.spoken_by(bob).is_empty() { "CarolReplied" } else { "BobReplied" };
        let context = harness.system.world_context();
        assert_eq!(context.len(), 1);
        assert_eq!(context.value(replied), Some("1"));
    }

    #[test]
    fn test_any_with_no_scores_says_nothing() {
        let resolver = ScriptedResolver::new().on("report", Response::speak("zero.wav"));
        let mut harness = TestHarness::new(resolver);
        let alice = harness.spawn("alice", Allegiance::Friend);
        harness.spawn("bob", Allegiance::Friend);

        harness.system.queue_mut().unwrap().add(
            Concept::new("report"),
            CriteriaSet::new(),
            0.0,
            TargetSpec::Any { exclude: None },
            Some(alice),
        );
        assert_eq!(harness.tick(0.1), 0);
        assert!(harness.acts().is_empty());
    }

    #[test]
    fn test_entries_added_during_sweep_wait_for_next_frame() {
        let resolver = ScriptedResolver::new()
            .on_for(
                "ping",
                "alice",
                Response::print("ping").with_followup(Followup::new(
                    "pong",
                    "bob",
                    FollowupTiming::AfterEnd(0.0),
                )),
            )
            .on_for("pong", "bob", Response::print("pong"));
        let mut harness = TestHarness::new(resolver);
        let alice = harness.spawn("alice", Allegiance::Friend);
        let bob = harness.spawn("bob", Allegiance::Friend);

        harness.system.queue_mut().unwrap().add(
            Concept::new("ping"),
            CriteriaSet::new(),
            0.0,
            TargetSpec::Specific(alice),
            None,
        );
        assert_eq!(harness.tick(0.1), 1);
        assert_eq!(harness.system.queue().unwrap().len(), 1);
        assert!(harness.spoken_by(bob).is_empty());

        assert_eq!(harness.tick(0.1), 1);
        assert_eq!(harness.spoken_by(bob), vec!["pong"]);
    }

    #[test]
    fn test_speaking_quashes_entries_queued_for_the_speaker() {
        let resolver = ScriptedResolver::new()
            .on_for("first", "alice", Response::print("first"))
            .on_for("second", "alice", Response::print("second"))
            .on_for("third", "bob", Response::print("third"));
        let mut harness = TestHarness::new(resolver);
        let alice = harness.spawn("alice", Allegiance::Friend);
        let bob = harness.spawn("bob", Allegiance::Friend);

        let queue = harness.system.queue_mut().unwrap();
        queue.add(Concept::new("first"), CriteriaSet::new(), 0.0, TargetSpec::Specific(alice), None);
        queue.add(Concept::new("second"), CriteriaSet::new(), 0.0, TargetSpec::Specific(alice), None);
        queue.add(Concept::new("third"), CriteriaSet::new(), 0.0, TargetSpec::Specific(bob), None);

        assert_eq!(harness.tick(0.1), 2);
        assert_eq!(harness.spoken_by(alice), vec!["first"]);
        assert_eq!(harness.spoken_by(bob), vec!["third"]);
        assert!(harness.system.queue().unwrap().is_empty());
    }

    /// Queue `later` for alice (not yet due), then `first`, `second` and
    /// `fourth` for bob, carol and dave. The first dispatch drops `later`
    /// and quashes dave's entry behind the sweep's back.
    fn disturbed_sweep(config: SpeechConfig) -> (TestHarness, [EntityHandle; 4], Rc<Cell<u32>>) {
        let resolver = ScriptedResolver::new()
            .on("later", Response::print("later"))
            .on("first", Response::print("first"))
            .on("second", Response::print("second"))
            .on("fourth", Response::print("fourth"));
        let mut harness = TestHarness::with_config(config, resolver);
        let alice = harness.spawn("alice", Allegiance::Friend);
        let bob = harness.spawn("bob", Allegiance::Friend);
        let carol = harness.spawn("carol", Allegiance::Friend);
        let dave = harness.spawn("dave", Allegiance::Foe);

        let queue = harness.system.queue_mut().unwrap();
        queue.add(Concept::new("later"), CriteriaSet::new(), 5.0, TargetSpec::Specific(alice), None);
        queue.add(Concept::new("first"), CriteriaSet::new(), 0.0, TargetSpec::Specific(bob), None);
        queue.add(Concept::new("second"), CriteriaSet::new(), 0.0, TargetSpec::Specific(carol), None);
        queue.add(Concept::new("fourth"), CriteriaSet::new(), 0.0, TargetSpec::Specific(dave), None);

        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        harness.system.sweep_hook = Some(Box::new(move |queue| {
            seen.set(seen.get() + 1);
            if seen.get() == 1 {
                queue.remove(&Concept::new("later"), None);
                queue.remove_speech_queued_for(dave);
            }
        }));
        (harness, [alice, bob, carol, dave], calls)
    }

    #[test]
    fn test_sweep_restarts_when_queue_changes_under_it() {
        let (mut harness, [alice, bob, carol, dave], calls) = disturbed_sweep(SpeechConfig::default());

        // without a restart the cursor would have passed carol's entry
        assert_eq!(harness.tick(0.1), 2);
        assert_eq!(calls.get(), 2);
        assert_eq!(harness.spoken_by(bob), vec!["first"]);
        assert_eq!(harness.spoken_by(carol), vec!["second"]);
        assert!(harness.spoken_by(alice).is_empty());
        assert!(harness.spoken_by(dave).is_empty());
        assert!(harness.system.queue().unwrap().is_empty());
    }

    #[test]
    fn test_sweep_gives_up_after_too_many_restarts() {
        let config = SpeechConfig {
            max_sweep_restarts: 0,
            ..SpeechConfig::default()
        };
        let (mut harness, [_, bob, carol, dave], _) = disturbed_sweep(config);

        assert_eq!(harness.tick(0.1), 1);
        assert_eq!(harness.spoken_by(bob), vec!["first"]);
        assert!(harness.spoken_by(carol).is_empty());
        let queue = harness.system.queue().unwrap();
        assert_eq!(queue.len(), 1);
        assert!(queue.entries().iter().all(|entry| !entry.is_quashed()));

        // the next frame picks up where this one gave up
        assert_eq!(harness.tick(0.1), 1);
        assert_eq!(harness.spoken_by(carol), vec!["second"]);
        assert_eq!(harness.spoken_by(bob), vec!["first"]);
        assert!(harness.spoken_by(dave).is_empty());
    }

    #[test]
    fn test_force_concept() {
        let mut harness = TestHarness::new(reply_rules());
        let bob = harness.spawn("bob", Allegiance::Friend);

        assert!(harness.system.force_concept(&harness.stage, "bob", "report", Some("urgent:1")));
        assert!(!harness.system.force_concept(&harness.stage, "nobody", "report", None));
        assert!(!harness.system.force_concept(&harness.stage, "self", "report", None));
        assert!(!harness.system.force_concept(&harness.stage, "bob", "  ", None));

        let queue = harness.system.queue().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.entries()[0].criteria.value("urgent"), Some("1"));
        assert!(queue.entries()[0].issuer.is_none());

        harness.tick(0.0);
        assert_eq!(harness.spoken_by(bob), vec!["report"]);
    }
}
