//! Follow-up scheduling.
//!
//! A response may name a follow-up concept for another character (or the
//! same one). Depending on its timing the follow-up is queued right away,
//! or parked on the speaker's expresser until the host reports that the
//! current utterance has finished.

use crate::concept::Concept;
use crate::criteria::CriteriaSet;
use crate::entity::{EntityDirectory, EntityHandle};
use crate::expresser::PostponedFollowup;
use crate::response::{EntityIoFollowup, Followup, FollowupTiming, Response, ResponseKind};
use crate::system::{Floor, SpeechSystem, FROM_INDEX_KEY, FROM_KEY, SUBJECT_KEY};
use crate::target::TargetSpec;

/// Resolve a follow-up target symbol against the speaker's criteria.
///
/// Recognized symbols, case-insensitive: `self`, `subject`, `from`, `any`
/// and `all`. Anything else is looked up as an entity name. Unresolvable
/// symbols produce [`TargetSpec::Invalid`] and a warning.
pub fn resolve_followup_target(
    directory: &dyn EntityDirectory,
    concept: &Concept,
    criteria: &CriteriaSet,
    symbol: &str,
    response: Option<&Response>,
) -> TargetSpec {
    let speaker = concept.speaker();
    let symbol = symbol.trim();

    let resolved = if symbol.eq_ignore_ascii_case("self") {
        speaker
    } else if symbol.eq_ignore_ascii_case("subject") {
        criteria
            .value(SUBJECT_KEY)
            .and_then(|name| directory.find_by_name(name))
    } else if symbol.eq_ignore_ascii_case("from") {
        criteria
            .value(FROM_INDEX_KEY)
            .and_then(|index| index.trim().parse::<u32>().ok())
            .and_then(|index| directory.from_index(index))
            .or_else(|| {
                criteria
                    .value(FROM_KEY)
                    .and_then(|name| directory.find_by_name(name))
            })
    } else if symbol.eq_ignore_ascii_case("any") {
        return TargetSpec::Any { exclude: speaker };
    } else if symbol.eq_ignore_ascii_case("all") {
        return TargetSpec::All { exclude: speaker };
    } else {
        directory.find_by_name(symbol)
    };

    match resolved {
        Some(handle) => TargetSpec::Specific(handle),
        None => {
            let rule = response.map(|r| r.rule.as_str()).unwrap_or_default();
            tracing::warn!(
                target_symbol = symbol,
                concept = concept.name(),
                rule,
                "could not resolve follow-up target"
            );
            TargetSpec::Invalid
        }
    }
}

impl SpeechSystem {
    /// Schedule the follow-up of a response `concept.speaker()` just performed.
    pub(crate) fn schedule_followup(
        &mut self,
        world: &mut dyn EntityDirectory,
        concept: &Concept,
        criteria: &CriteriaSet,
        response: &Response,
        followup: Followup,
    ) {
        let Some(speaker) = concept.speaker() else {
            return;
        };
        if let Some(io) = &followup.entity_io {
            self.fire_followup_entity_io(&*world, speaker, io);
        }
        if !followup.has_concept() {
            return;
        }

        let target = resolve_followup_target(&*world, concept, criteria, &followup.target, Some(response));

        match followup.timing {
            FollowupTiming::AfterStart(lead) => {
                if target.specific() == Some(speaker) {
                    tracing::warn!(
                        %speaker,
                        followup = %followup.concept,
                        "follow-up would talk over its own speaker; waiting for the line to finish"
                    );
                    let followup = Followup {
                        timing: FollowupTiming::AfterEnd(0.0),
                        ..followup
                    };
                    self.postpone_followup(world, speaker, followup, target);
                } else {
                    self.dispatch_followup_through_queue(&*world, speaker, &followup, target, lead);
                }
            }
            FollowupTiming::AfterEnd(pause) if response.kind == ResponseKind::Scene => {
                match self.executor.scene_speech_tail(&response.text) {
                    Some(tail) if tail >= 0.0 => {
                        self.dispatch_followup_through_queue(&*world, speaker, &followup, target, tail + pause);
                    }
                    _ => {
                        tracing::warn!(
                            scene = %response.text,
                            "could not measure the speech in scene; waiting for it to finish"
                        );
                        self.postpone_followup(world, speaker, followup, target);
                    }
                }
            }
            FollowupTiming::AfterEnd(pause)
                if response.kind.is_zero_duration() && !self.config.legacy_followups =>
            {
                self.dispatch_followup_through_queue(&*world, speaker, &followup, target, pause);
            }
            FollowupTiming::AfterEnd(_) => {
                self.postpone_followup(world, speaker, followup, target);
            }
        }
    }

    /// The host reports that `who` finished its current utterance.
    ///
    /// Dispatches the postponed follow-up, if any. Returns whether one was dispatched.
    pub fn on_speech_finished(&mut self, world: &mut dyn EntityDirectory, who: EntityHandle) -> bool {
        let postponed = world
            .host_mut(who)
            .and_then(|host| host.expresser_mut())
            .and_then(|expresser| expresser.take_postponed_followup());
        let Some(PostponedFollowup { followup, target }) = postponed else {
            return false;
        };
        tracing::debug!(%who, followup = %followup.concept, recipient = %target, "releasing postponed follow-up");

        match target {
            TargetSpec::Invalid => {
                tracing::warn!(%who, followup = %followup.concept, "postponed follow-up has no target");
                false
            }
            TargetSpec::Specific(respondent) if followup.timing.seconds() == 0.0 => {
                let mut criteria = CriteriaSet::new();
                criteria.merge_str(&followup.contexts);
                self.append_speaker_attribution(&*world, who, &mut criteria);
                self.speak_with(
                    world,
                    respondent,
                    &Concept::new(&followup.concept),
                    Some(&criteria),
                    Floor::Granted,
                )
                .is_ok()
            }
            target => {
                let pause = followup.timing.seconds();
                self.dispatch_followup_through_queue(&*world, who, &followup, target, pause)
            }
        }
    }

    fn postpone_followup(
        &mut self,
        world: &mut dyn EntityDirectory,
        speaker: EntityHandle,
        followup: Followup,
        target: TargetSpec,
    ) {
        let Some(expresser) = world.host_mut(speaker).and_then(|host| host.expresser_mut()) else {
            return;
        };
        if let Some(previous) = expresser.postponed_followup() {
            tracing::debug!(%speaker, replaced = %previous.followup.concept, "replacing postponed follow-up");
        }
        expresser.set_postponed_followup(PostponedFollowup { followup, target });
    }

    fn dispatch_followup_through_queue(
        &mut self,
        world: &dyn EntityDirectory,
        speaker: EntityHandle,
        followup: &Followup,
        target: TargetSpec,
        delay: f32,
    ) -> bool {
        let mut criteria = CriteriaSet::new();
        self.append_speaker_attribution(world, speaker, &mut criteria);
        criteria.merge_str(&followup.contexts);

        let dispatch_time = self.now + delay;
        match self.queues.queue_mut() {
            Some(queue) => {
                queue.add(
                    Concept::new(&followup.concept),
                    criteria,
                    dispatch_time,
                    target,
                    Some(speaker),
                );
                true
            }
            None => {
                tracing::warn!(followup = %followup.concept, "no response queue; dropping follow-up");
                false
            }
        }
    }

    /// `From` and `From_idx` let the respondent answer whoever spoke.
    fn append_speaker_attribution(
        &self,
        world: &dyn EntityDirectory,
        speaker: EntityHandle,
        criteria: &mut CriteriaSet,
    ) {
        if let Some(host) = world.host(speaker) {
            criteria.set(FROM_KEY, host.name());
        }
        criteria.set(FROM_INDEX_KEY, speaker.index().to_string());
    }

    fn fire_followup_entity_io(&mut self, world: &dyn EntityDirectory, speaker: EntityHandle, io: &EntityIoFollowup) {
        match world.resolve_name_or_index(&io.target) {
            Some(target) => self
                .executor
                .fire_input(target, &io.input, None, io.delay, Some(speaker)),
            None => tracing::warn!(target_name = %io.target, "follow-up entity I/O target not found"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{PlayedAct, ScriptedResolver, TestHarness, TestStage};
    use crate::Allegiance;

    #[test]
    fn test_resolve_symbols() {
        let mut stage = TestStage::new();
        let alice = stage.spawn("alice", Allegiance::Friend);
        let bob = stage.spawn("bob", Allegiance::Friend);
        let concept = Concept::new("greet").with_speaker(alice);
        let criteria = CriteriaSet::parse("Subject:bob,From:alice");

        let resolve = |symbol: &str| resolve_followup_target(&stage, &concept, &criteria, symbol, None);
        assert_eq!(resolve("SELF"), TargetSpec::Specific(alice));
        assert_eq!(resolve("subject"), TargetSpec::Specific(bob));
        assert_eq!(resolve("from"), TargetSpec::Specific(alice));
        assert_eq!(resolve("Any"), TargetSpec::Any { exclude: Some(alice) });
        assert_eq!(resolve("all"), TargetSpec::All { exclude: Some(alice) });
        assert_eq!(resolve("bob"), TargetSpec::Specific(bob));
        assert_eq!(resolve("nobody"), TargetSpec::Invalid);
    }

    #[test]
    fn test_from_prefers_index() {
        let mut stage = TestStage::new();
        let alice = stage.spawn("alice", Allegiance::Friend);
        let bob = stage.spawn("bob", Allegiance::Friend);
        let concept = Concept::new("reply").with_speaker(alice);
        let criteria = CriteriaSet::parse(&format!("From:alice,From_idx:{}", bob.index()));
        assert_eq!(
            resolve_followup_target(&stage, &concept, &criteria, "from", None),
            TargetSpec::Specific(bob)
        );
    }

    #[test]
    fn test_missing_subject_is_invalid() {
        let mut stage = TestStage::new();
        let alice = stage.spawn("alice", Allegiance::Friend);
        let concept = Concept::new("greet").with_speaker(alice);
        assert_eq!(
            resolve_followup_target(&stage, &concept, &CriteriaSet::new(), "subject", None),
            TargetSpec::Invalid
        );
    }

    #[test]
    fn test_after_end_followup_waits_for_finish() {
        let resolver = ScriptedResolver::new()
            .on_for(
                "greet",
                "alice",
                Response::speak("hello.wav").with_followup(Followup::new(
                    "reply",
                    "bob",
                    FollowupTiming::AfterEnd(0.0),
                )),
            )
            .on_for("reply", "bob", Response::speak("hi.wav"));
        let mut harness = TestHarness::new(resolver);
        let alice = harness.spawn("alice", Allegiance::Friend);
        let bob = harness.spawn("bob", Allegiance::Friend);

        assert!(harness.speak(alice, "greet"));
        assert!(harness.system.queue().unwrap().is_empty());
        assert!(harness.stage.actor(alice).unwrap().expresser.as_ref().unwrap().postponed_followup().is_some());

        harness.system.advance(2.0);
        assert!(harness.finish_speaking(alice));
        assert_eq!(harness.spoken_by(bob), vec!["reply"]);
        assert!(!harness.finish_speaking(alice));
    }

    #[test]
    fn test_postponed_reply_to_dead_character_never_plays() {
        let followup = |pause| {
            let reply = Followup::new("reply", "bob", FollowupTiming::AfterEnd(pause));
            Response::speak("hello.wav").with_followup(reply)
        };
        let resolver = ScriptedResolver::new()
            .on_for("greet", "alice", followup(0.0))
            .on_for("call", "alice", followup(1.0))
            .on_for("reply", "bob", Response::speak("hi.wav"));
        let mut harness = TestHarness::new(resolver);
        let alice = harness.spawn("alice", Allegiance::Friend);
        let bob = harness.spawn("bob", Allegiance::Friend);

        // released directly
        assert!(harness.speak(alice, "greet"));
        harness.stage.actor_mut(bob).unwrap().alive = false;
        harness.system.advance(2.0);
        assert!(!harness.finish_speaking(alice));

        // released through the queue
        assert!(harness.speak(alice, "call"));
        harness.system.advance(2.0);
        assert!(harness.finish_speaking(alice));
        assert_eq!(harness.tick(1.0), 0);

        assert!(harness.spoken_by(bob).is_empty());
        assert_eq!(harness.acts().len(), 2);
    }

    #[test]
    fn test_direct_followup_carries_attribution() {
        let resolver = ScriptedResolver::new()
            .on_for(
                "greet",
                "alice",
                Response::speak("hello.wav").with_followup(
                    Followup::new("reply", "bob", FollowupTiming::AfterEnd(0.0)).with_contexts("mood:warm"),
                ),
            )
            .on_for("reply", "bob", Response::speak("hi.wav"));
        let log = resolver.criteria_log();
        let mut harness = TestHarness::new(resolver);
        let alice = harness.spawn("alice", Allegiance::Friend);
        let bob = harness.spawn("bob", Allegiance::Friend);

        harness.speak(alice, "greet");
        harness.system.advance(2.0);
        harness.finish_speaking(alice);

        let seen = log.borrow();
        let reply = seen.last().unwrap();
        assert_eq!(reply.value("From"), Some("alice"));
        assert_eq!(reply.value("From_idx"), Some(alice.index().to_string().as_str()));
        assert_eq!(reply.value("mood"), Some("warm"));
        assert_eq!(reply.value("name"), Some("bob"));
        drop(seen);
        assert_eq!(harness.spoken_by(bob), vec!["reply"]);
    }

    #[test]
    fn test_postponed_followup_with_delay_goes_through_queue() {
        let resolver = ScriptedResolver::new()
            .on_for(
                "greet",
                "alice",
                Response::speak("hello.wav").with_followup(Followup::new(
                    "reply",
                    "bob",
                    FollowupTiming::AfterEnd(1.5),
                )),
            )
            .on_for("reply", "bob", Response::speak("hi.wav"));
        let mut harness = TestHarness::new(resolver);
        let alice = harness.spawn("alice", Allegiance::Friend);
        let bob = harness.spawn("bob", Allegiance::Friend);

        harness.speak(alice, "greet");
        harness.system.advance(2.0);
        assert!(harness.finish_speaking(alice));
        let queue = harness.system.queue().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.entries()[0].dispatch_time, 3.5);
        assert!(harness.spoken_by(bob).is_empty());

        harness.tick(1.5);
        assert_eq!(harness.spoken_by(bob), vec!["reply"]);
    }

    #[test]
    fn test_after_start_to_self_is_coerced() {
        let resolver = ScriptedResolver::new().on(
            "greet",
            Response::speak("hello.wav").with_followup(Followup::new(
                "more",
                "self",
                FollowupTiming::from_signed(-1.0),
            )),
        );
        let mut harness = TestHarness::new(resolver);
        let alice = harness.spawn("alice", Allegiance::Friend);

        harness.speak(alice, "greet");
        assert!(harness.system.queue().unwrap().is_empty());
        let expresser = harness.stage.actor(alice).unwrap().expresser.as_ref().unwrap();
        let postponed = expresser.postponed_followup().unwrap();
        assert_eq!(postponed.followup.timing, FollowupTiming::AfterEnd(0.0));
        assert_eq!(postponed.target, TargetSpec::Specific(alice));
    }

    #[test]
    fn test_scene_followup_uses_speech_tail() {
        let resolver = ScriptedResolver::new().on(
            "briefing",
            Response::scene("briefing.vcd").with_followup(Followup::new(
                "salute",
                "any",
                FollowupTiming::AfterEnd(0.5),
            )),
        );
        let mut harness = TestHarness::new(resolver);
        harness.scene_tail("briefing.vcd", 4.0);
        let alice = harness.spawn("alice", Allegiance::Friend);
        harness.system.set_time(10.0);

        assert!(harness.speak(alice, "briefing"));
        let queue = harness.system.queue().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.entries()[0].dispatch_time, 14.5);
    }

    #[test]
    fn test_unmeasurable_scene_postpones() {
        let resolver = ScriptedResolver::new().on(
            "briefing",
            Response::scene("briefing.vcd").with_followup(Followup::new(
                "salute",
                "any",
                FollowupTiming::AfterEnd(0.5),
            )),
        );
        let mut harness = TestHarness::new(resolver);
        let alice = harness.spawn("alice", Allegiance::Friend);

        assert!(harness.speak(alice, "briefing"));
        assert!(harness.system.queue().unwrap().is_empty());
        assert!(harness.stage.actor(alice).unwrap().expresser.as_ref().unwrap().postponed_followup().is_some());
    }

    #[test]
    fn test_zero_duration_followup_is_queued_unless_legacy() {
        let response = Response::print("(nods)").with_followup(Followup::new(
            "reply",
            "any",
            FollowupTiming::AfterEnd(0.25),
        ));

        let mut harness = TestHarness::new(ScriptedResolver::new().on("nod", response.clone()));
        let alice = harness.spawn("alice", Allegiance::Friend);
        assert!(harness.speak(alice, "nod"));
        assert_eq!(harness.system.queue().unwrap().len(), 1);

        let config = crate::SpeechConfig::default().with_legacy_followups(true);
        let mut harness = TestHarness::with_config(config, ScriptedResolver::new().on("nod", response));
        let alice = harness.spawn("alice", Allegiance::Friend);
        assert!(harness.speak(alice, "nod"));
        assert!(harness.system.queue().unwrap().is_empty());
    }

    #[test]
    fn test_followup_entity_io_fires_immediately() {
        let resolver = ScriptedResolver::new().on(
            "alarm",
            Response::speak("alarm.wav").with_followup(
                Followup::new("", "", FollowupTiming::AfterEnd(0.0)).with_entity_io("siren", "Start", 0.5),
            ),
        );
        let mut harness = TestHarness::new(resolver);
        let alice = harness.spawn("alice", Allegiance::Friend);
        let siren = harness.spawn("siren", Allegiance::Friend);

        assert!(harness.speak(alice, "alarm"));
        assert!(harness.acts().contains(&PlayedAct::Input {
            target: siren,
            input: "Start".to_string(),
            param: None,
            delay: 0.5,
            activator: Some(alice),
        }));
        assert!(harness.stage.actor(alice).unwrap().expresser.as_ref().unwrap().postponed_followup().is_none());
    }
}
