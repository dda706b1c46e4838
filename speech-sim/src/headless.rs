//! Headless console for driving a scenario.
//!
//! A simple line-oriented protocol:
//! - `<actor> <concept> [key:value,...]` asks an actor to speak
//! - Lines starting with `#` are commands (tick, force, queue, save, ...)
//! - Output lines are tagged (`[SAY]`, `[QUEUE]`, `[ERROR]`, ...)

use crate::console::Transcript;
use crate::scenario::Build;
use crate::world::SimWorld;
use speech_core::{Allegiance, Concept, CriteriaSet, EntityDirectory, EntityHandle, SavedHistory, SpeechSystem};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

/// Simulation step used by `#tick`.
pub const FRAME_SECONDS: f32 = 0.1;

const HELP: &[&str] = &[
    "  <actor> <concept> [k:v,...]      - Ask an actor to speak",
    "  #speak <actor> <concept> [k:v]   - Same as above",
    "  #force <target> <concept> [k:v]  - Queue a concept for a name, any or all",
    "  #tick [seconds]                  - Advance time (default one frame)",
    "  #finish <actor>                  - Cut an actor off and release its follow-up",
    "  #kill <actor>                    - Remove an actor from the conversation",
    "  #mute / #unmute                  - Suppress or allow all speech",
    "  #queue                           - Show pending responses",
    "  #history <actor>                 - Show an actor's concept history",
    "  #responses                       - List every response the rules can give",
    "  #status                          - Show the clock and speech floors",
    "  #save <actor> <path>             - Save an actor's concept history",
    "  #load <actor> <path>             - Restore an actor's concept history",
    "  #quit                            - Exit",
];

/// Whether the session should keep reading input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// A running scenario and its command interpreter.
pub struct Console {
    world: SimWorld,
    system: SpeechSystem,
    transcript: Transcript,
}

impl Console {
    pub fn new(build: Build) -> Self {
        Self {
            world: build.world,
            system: build.system,
            transcript: build.transcript,
        }
    }

    pub fn world(&self) -> &SimWorld {
        &self.world
    }

    pub fn system(&self) -> &SpeechSystem {
        &self.system
    }

    /// Run one input line, appending output lines to `out`.
    pub fn execute(&mut self, line: &str, out: &mut Vec<String>) -> Flow {
        let line = line.trim();
        if line.is_empty() {
            return Flow::Continue;
        }
        let Some(command) = line.strip_prefix('#') else {
            self.speak(line, out);
            return Flow::Continue;
        };

        let (name, rest) = match command.trim().split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (command.trim(), ""),
        };
        let args: Vec<&str> = rest.split_whitespace().collect();
        match name {
            "quit" | "exit" => {
                out.push("Goodbye!".to_string());
                return Flow::Quit;
            }
            "help" => {
                out.push("[HELP]".to_string());
                out.extend(HELP.iter().map(|line| line.to_string()));
            }
            "speak" => self.speak(rest, out),
            "force" => self.force(rest, out),
            "tick" => match args.first().map(|secs| secs.parse::<f32>()) {
                None => self.tick(FRAME_SECONDS, out),
                Some(Ok(secs)) if secs.is_finite() && secs >= 0.0 => self.tick(secs, out),
                Some(_) => out.push("[ERROR] Usage: #tick [seconds]".to_string()),
            },
            "finish" => self.finish(&args, out),
            "kill" => self.kill(&args, out),
            "mute" => {
                self.system.set_speech_suppressed(true);
                out.push("[MUTED]".to_string());
            }
            "unmute" => {
                self.system.set_speech_suppressed(false);
                out.push("[UNMUTED]".to_string());
            }
            "queue" => self.show_queue(out),
            "history" => self.show_history(&args, out),
            "responses" => self.show_responses(out),
            "status" => self.show_status(out),
            "save" => self.save(&args, out),
            "load" => self.load(&args, out),
            _ => out.push("[ERROR] Unknown command. Type #help for help.".to_string()),
        }
        Flow::Continue
    }

    // =========================================================================
    // Speech
    // =========================================================================

    fn speak(&mut self, text: &str, out: &mut Vec<String>) {
        let mut parts = text.splitn(3, char::is_whitespace);
        let (Some(actor), Some(concept)) = (parts.next(), parts.next()) else {
            out.push("[ERROR] Usage: <actor> <concept> [key:value,...]".to_string());
            return;
        };
        let Some(who) = self.actor_handle(actor, out) else {
            return;
        };
        let modifiers = parts.next().map(CriteriaSet::parse);
        let concept = Concept::new(concept);

        let result = self.system.try_speak(&mut self.world, who, &concept, modifiers.as_ref());
        self.settle(out);
        let name = self.actor_name(who);
        match result {
            Ok(utterance) => out.push(format!(
                "[SPOKE] {name}: {concept} -> {} ({:.1}s)",
                utterance.response.rule, utterance.duration
            )),
            Err(e) => out.push(format!("[SILENT] {name}: {concept}: {e}")),
        }
    }

    fn force(&mut self, text: &str, out: &mut Vec<String>) {
        let mut parts = text.splitn(3, char::is_whitespace);
        let (Some(target), Some(concept)) = (parts.next(), parts.next()) else {
            out.push("[ERROR] Usage: #force <target> <concept> [key:value,...]".to_string());
            return;
        };
        if self.system.force_concept(&self.world, target, concept, parts.next()) {
            out.push(format!("[QUEUED] {concept} for {target}"));
        } else {
            out.push(format!("[ERROR] Cannot force {concept} on {target}"));
        }
    }

    /// Advance the clock in frames, releasing follow-ups as actors fall silent.
    fn tick(&mut self, seconds: f32, out: &mut Vec<String>) {
        let mut remaining = seconds;
        let mut dispatched = 0;
        loop {
            let step = remaining.min(FRAME_SECONDS);
            dispatched += self.system.tick(&mut self.world, step);
            self.settle(out);

            let now = self.system.now();
            for who in self.world.take_finished_speakers(now) {
                self.system.on_speech_finished(&mut self.world, who);
            }
            self.settle(out);

            remaining -= step;
            if remaining <= f32::EPSILON {
                break;
            }
        }
        out.push(format!(
            "[TIME] {:.2}s ({dispatched} queued response(s) dispatched)",
            self.system.now()
        ));
    }

    fn finish(&mut self, args: &[&str], out: &mut Vec<String>) {
        let Some(actor) = args.first() else {
            out.push("[ERROR] Usage: #finish <actor>".to_string());
            return;
        };
        let Some(who) = self.actor_handle(actor, out) else {
            return;
        };
        self.system.force_not_speaking(&mut self.world, who);
        if let Some(actor) = self.world.actor_mut(who) {
            actor.was_speaking = false;
        }
        let released = self.system.on_speech_finished(&mut self.world, who);
        self.settle(out);
        let note = if released { "follow-up released" } else { "nothing pending" };
        out.push(format!("[FINISHED] {} ({note})", self.actor_name(who)));
    }

    fn kill(&mut self, args: &[&str], out: &mut Vec<String>) {
        let Some(actor) = args.first() else {
            out.push("[ERROR] Usage: #kill <actor>".to_string());
            return;
        };
        let Some(who) = self.actor_handle(actor, out) else {
            return;
        };
        self.system.forget_entity(who);
        if let Some(actor) = self.world.actor_mut(who) {
            actor.alive = false;
            actor.was_speaking = false;
        }
        out.push(format!("[KILLED] {}", self.actor_name(who)));
    }

    /// Deliver shared contexts and show whatever the executor played.
    fn settle(&mut self, out: &mut Vec<String>) {
        self.world.propagate_contexts();
        let now = self.system.now();
        out.extend(
            self.transcript
                .borrow_mut()
                .drain(..)
                .map(|line| format!("{now:7.2}s {line}")),
        );
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    fn show_queue(&self, out: &mut Vec<String>) {
        let Some(queue) = self.system.queue() else {
            out.push("[ERROR] No response queue".to_string());
            return;
        };
        out.push(format!("[QUEUE] {} pending", queue.len()));
        for entry in queue.entries() {
            let issuer = entry
                .issuer
                .map(|who| self.actor_name(who))
                .unwrap_or_else(|| "console".to_string());
            let recipient = match entry.target.specific() {
                Some(who) => self.actor_name(who),
                None => entry.target.to_string(),
            };
            let state = if entry.is_quashed() { " (quashed)" } else { "" };
            out.push(format!(
                "  {:>3} at {:.2}s {} -> {recipient} from {issuer}{state}",
                entry.id(),
                entry.dispatch_time,
                entry.concept
            ));
        }
    }

    fn show_history(&self, args: &[&str], out: &mut Vec<String>) {
        let Some(actor) = args.first() else {
            out.push("[ERROR] Usage: #history <actor>".to_string());
            return;
        };
        let Some(actor) = self.world.actors().iter().find(|a| a.name.eq_ignore_ascii_case(actor)) else {
            out.push(format!("[ERROR] No actor named {actor}"));
            return;
        };
        let mut entries: Vec<_> = actor.expresser.history().entries().collect();
        entries.sort_by(|a, b| a.concept.cmp(&b.concept));
        out.push(format!("[HISTORY] {} ({} concept(s))", actor.name, entries.len()));
        for entry in entries {
            let when = entry
                .time_spoken
                .map(|t| format!("{t:.2}s"))
                .unwrap_or_else(|| "never".to_string());
            let rule = entry.response.as_ref().map(|r| r.rule.as_str()).unwrap_or("-");
            out.push(format!("  {} at {when} via {rule}", entry.concept));
        }
    }

    fn show_responses(&self, out: &mut Vec<String>) {
        let responses = self.system.list_responses();
        out.push(format!("[RESPONSES] {}", responses.len()));
        for response in responses {
            out.push(format!("  {:<20} {:<9} {}", response.rule, response.kind, response.text));
        }
    }

    fn show_status(&self, out: &mut Vec<String>) {
        out.push("[STATUS]".to_string());
        out.push(format!("  Time: {:.2}s", self.system.now()));
        for allegiance in [Allegiance::Friend, Allegiance::Foe] {
            let floor = self.system.semaphore(allegiance);
            let holder = match floor.holder() {
                Some(who) if floor.release_time() > self.system.now() => {
                    format!("{} until {:.2}s", self.actor_name(who), floor.release_time())
                }
                _ => "free".to_string(),
            };
            out.push(format!("  {allegiance} floor: {holder}"));
        }
        let pending = self.system.queue().map_or(0, |queue| queue.len());
        out.push(format!("  Queued: {pending}"));
        let speaking: Vec<&str> = self
            .world
            .actors()
            .iter()
            .filter(|actor| actor.expresser.is_speaking(self.system.now()))
            .map(|actor| actor.name.as_str())
            .collect();
        if !speaking.is_empty() {
            out.push(format!("  Speaking: {}", speaking.join(", ")));
        }
        if self.system.is_speech_suppressed() {
            out.push("  Speech is muted".to_string());
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    fn save(&mut self, args: &[&str], out: &mut Vec<String>) {
        let [actor, path] = args else {
            out.push("[ERROR] Usage: #save <actor> <path>".to_string());
            return;
        };
        let Some(who) = self.actor_handle(actor, out) else {
            return;
        };
        let Some(actor) = self.world.actor(who) else {
            return;
        };
        let saved = SavedHistory::new(actor.name.clone(), actor.expresser.history())
            .and_then(|saved| saved.save_json(path));
        match saved {
            Ok(()) => out.push(format!("[SAVED] {} history to {path}", actor.name)),
            Err(e) => out.push(format!("[ERROR] Save failed: {e}")),
        }
    }

    fn load(&mut self, args: &[&str], out: &mut Vec<String>) {
        let [actor, path] = args else {
            out.push("[ERROR] Usage: #load <actor> <path>".to_string());
            return;
        };
        let Some(who) = self.actor_handle(actor, out) else {
            return;
        };
        let saved = match SavedHistory::load_json(path) {
            Ok(saved) => saved,
            Err(e) => {
                out.push(format!("[ERROR] Load failed: {e}"));
                return;
            }
        };
        let Some(actor) = self.world.actor_mut(who) else {
            return;
        };
        let report = saved.restore_into(actor.expresser.history_mut());
        out.push(format!(
            "[LOADED] {} history from {path}: {} record(s), {} discarded",
            actor.name, report.restored, report.discarded
        ));
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn actor_handle(&self, token: &str, out: &mut Vec<String>) -> Option<EntityHandle> {
        let handle = self.world.resolve_name_or_index(token);
        if handle.is_none() {
            out.push(format!("[ERROR] No living actor named {token}"));
        }
        handle
    }

    fn actor_name(&self, who: EntityHandle) -> String {
        self.world
            .actor(who)
            .map(|actor| actor.name.clone())
            .unwrap_or_else(|| who.to_string())
    }
}

/// Run a scenario reading commands from stdin until `#quit` or end of input.
pub fn run_headless(build: Build) -> anyhow::Result<()> {
    let mut console = Console::new(build);

    println!("=== Speech Sim ===");
    let cast: Vec<String> = console
        .world()
        .actors()
        .iter()
        .map(|actor| format!("{} ({})", actor.name, actor.allegiance))
        .collect();
    println!("Cast: {}", cast.join(", "));
    println!();
    println!("Commands:");
    for line in HELP {
        println!("{line}");
    }
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut out = Vec::new();
    for line in stdin.lock().lines() {
        let line = line?;
        let flow = console.execute(&line, &mut out);
        for printed in out.drain(..) {
            println!("{printed}");
        }
        stdout.flush().ok();
        if flow == Flow::Quit {
            break;
        }
    }

    println!("Session ended at {:.2}s.", console.system().now());
    console.system.shutdown();
    Ok(())
}

/// Command line options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimArgs {
    pub scenario: Option<PathBuf>,
    /// Speech settings that replace the scenario's own.
    pub config: Option<PathBuf>,
    pub seed: Option<u64>,
    pub help: bool,
}

/// Parse command line arguments. Unknown flags are ignored.
pub fn parse_args(args: &[String]) -> SimArgs {
    let mut parsed = SimArgs::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--scenario" => {
                if let Some(path) = args.get(i + 1) {
                    parsed.scenario = Some(PathBuf::from(path));
                    i += 1;
                }
            }
            "--config" => {
                if let Some(path) = args.get(i + 1) {
                    parsed.config = Some(PathBuf::from(path));
                    i += 1;
                }
            }
            "--seed" => {
                if let Some(seed) = args.get(i + 1) {
                    parsed.seed = seed.parse().ok();
                    i += 1;
                }
            }
            "--help" | "-h" => parsed.help = true,
            _ => {}
        }
        i += 1;
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Scenario;

    const LOBBY: &str = include_str!("../scenarios/lobby.json");

    fn console() -> Console {
        let scenario = Scenario::from_json_str(LOBBY).unwrap();
        Console::new(scenario.build(Some(7)))
    }

    fn run(console: &mut Console, line: &str) -> Vec<String> {
        let mut out = Vec::new();
        console.execute(line, &mut out);
        out
    }

    fn has(lines: &[String], needle: &str) -> bool {
        lines.iter().any(|line| line.contains(needle))
    }

    #[test]
    fn test_conversation_chain() {
        let mut console = console();
        let out = run(&mut console, "Barney hello");
        assert!(has(&out, "[SAY] Barney: barney_hello.wav"));
        assert!(has(&out, "[SPOKE] Barney: hello -> barney_hello"));

        let out = run(&mut console, "#tick 5");
        assert!(has(&out, "[SAY] Alyx: alyx_hey.wav"));
        assert!(has(&out, "[PRINT] Barney: (nods)"));
        let reply = out.iter().position(|l| l.contains("alyx_hey")).unwrap();
        let thanks = out.iter().position(|l| l.contains("(nods)")).unwrap();
        assert!(reply < thanks);
    }

    #[test]
    fn test_answer_overlaps_question() {
        let mut console = console();
        run(&mut console, "Barney question");
        let out = run(&mut console, "#tick 1.5");
        assert!(has(&out, "[SAY] Alyx: alyx_answer.wav"));
        assert!(console.system().is_speaking(console.world(), console.world().handles()[1]));
    }

    #[test]
    fn test_floor_is_shared_by_allegiance() {
        let mut console = console();
        run(&mut console, "Barney hello");
        let out = run(&mut console, "Alyx answer");
        assert!(has(&out, "[SILENT] Alyx: answer"));

        // foes have their own floor
        let out = run(&mut console, "Grunt contact");
        assert!(has(&out, "[SAY] Grunt: grunt_contact.wav"));
    }

    #[test]
    fn test_enemy_context_reaches_the_other_side() {
        let mut console = console();
        run(&mut console, "Barney idle");
        let out = run(&mut console, "Grunt contact");
        assert!(has(&out, "[SPOKE] Grunt"));
        run(&mut console, "#tick 3");
        let out = run(&mut console, "Alyx idle");
        assert!(has(&out, "(scans the room)"));
    }

    #[test]
    fn test_speak_once_and_world_context() {
        let mut console = console();
        let out = run(&mut console, "Intercom announce");
        assert!(has(&out, "[SENTENCE] Intercom: ANNOUNCE_01"));
        assert!(has(&out, "[INPUT] Intercom -> Intercom: Chime (delay 0.5s)"));
        assert_eq!(console.system().world_context().value("lockdown"), Some("1"));

        run(&mut console, "#tick 5");
        let out = run(&mut console, "Intercom announce");
        assert!(has(&out, "[SILENT] Intercom: announce"));

        let out = run(&mut console, "Barney remark");
        assert!(has(&out, "locked in"));
    }

    #[test]
    fn test_scene_followup_uses_tail() {
        let mut console = console();
        run(&mut console, "Alyx tour");
        let out = run(&mut console, "#queue");
        assert!(has(&out, "[QUEUE] 1 pending"));
        assert!(has(&out, "tour_done -> Alyx from Alyx"));

        let out = run(&mut console, "#tick 7");
        assert!(!has(&out, "lobby."));
        let out = run(&mut console, "#tick 1");
        assert!(has(&out, "[PRINT] Alyx: And that's the lobby."));
    }

    #[test]
    fn test_force_and_errors() {
        let mut console = console();
        let out = run(&mut console, "#force alyx hello_reply From:Barney,From_idx:1");
        assert!(has(&out, "[QUEUED] hello_reply for alyx"));
        let out = run(&mut console, "#tick");
        assert!(has(&out, "alyx_hey.wav"));

        assert!(has(&run(&mut console, "#force nobody hello"), "[ERROR]"));
        assert!(has(&run(&mut console, "Nobody hello"), "[ERROR] No living actor"));
        assert!(has(&run(&mut console, "#tick soon"), "[ERROR] Usage"));
        assert!(has(&run(&mut console, "#dance"), "Unknown command"));
    }

    #[test]
    fn test_finish_releases_followup() {
        let mut console = console();
        run(&mut console, "Barney hello");
        let out = run(&mut console, "#finish barney");
        assert!(has(&out, "[FINISHED] Barney (follow-up released)"));
        let out = run(&mut console, "#queue");
        assert!(has(&out, "hello_reply -> any from Barney"));
    }

    #[test]
    fn test_kill_quashes_pending_speech() {
        let mut console = console();
        run(&mut console, "Barney question");
        let out = run(&mut console, "#kill alyx");
        assert!(has(&out, "[KILLED] Alyx"));
        let out = run(&mut console, "#tick 2");
        assert!(!has(&out, "alyx_answer"));
        assert!(has(&run(&mut console, "Alyx idle"), "[ERROR]"));
    }

    #[test]
    fn test_killed_actor_never_gets_its_reply() {
        const CALL: &str = r#"{
            "actors": [{ "name": "Barney" }, { "name": "Alyx" }],
            "rules": [
                {
                    "name": "barney_call",
                    "criteria": "concept:call,name:barney",
                    "responses": [
                        {
                            "kind": "speak",
                            "text": "barney_call.wav",
                            "followup": { "concept": "answer", "target": "alyx" }
                        }
                    ]
                },
                {
                    "name": "alyx_answer",
                    "criteria": "concept:answer,name:alyx",
                    "responses": [{ "kind": "speak", "text": "alyx_answer.wav" }]
                }
            ]
        }"#;
        let call = || Console::new(Scenario::from_json_str(CALL).unwrap().build(Some(7)));

        let mut console = call();
        run(&mut console, "Barney call");
        assert!(has(&run(&mut console, "#tick 3"), "[SAY] Alyx: alyx_answer.wav"));

        let mut console = call();
        run(&mut console, "Barney call");
        assert!(has(&run(&mut console, "#kill alyx"), "[KILLED] Alyx"));
        let out = run(&mut console, "#tick 3");
        assert!(!has(&out, "alyx_answer"));
    }

    #[test]
    fn test_mute() {
        let mut console = console();
        run(&mut console, "#mute");
        assert!(has(&run(&mut console, "Barney hello"), "[SILENT] Barney: hello: speech is globally suppressed"));
        run(&mut console, "#unmute");
        assert!(has(&run(&mut console, "Barney hello"), "[SPOKE]"));
    }

    #[test]
    fn test_save_and_load_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("barney.json");
        let path = path.to_str().unwrap();

        let mut console = console();
        run(&mut console, "Intercom announce");
        let out = run(&mut console, &format!("#save intercom {path}"));
        assert!(has(&out, "[SAVED] Intercom"));

        let mut fresh = self::console();
        let out = run(&mut fresh, &format!("#load intercom {path}"));
        assert!(has(&out, "1 record(s), 0 discarded"));
        assert!(has(&run(&mut fresh, "Intercom announce"), "[SILENT]"));

        let out = run(&mut fresh, "#history intercom");
        assert!(has(&out, "announce at 0.00s via announcements"));
    }

    #[test]
    fn test_inspection_commands() {
        let mut console = console();
        assert!(has(&run(&mut console, "#responses"), "[RESPONSES] 13"));
        run(&mut console, "Barney hello");
        let out = run(&mut console, "#status");
        assert!(has(&out, "friend floor: Barney until 2.00s"));
        assert!(has(&out, "foe floor: free"));
        assert!(has(&out, "Speaking: Barney"));
    }

    #[test]
    fn test_quit() {
        let mut console = console();
        let mut out = Vec::new();
        assert_eq!(console.execute("#quit", &mut out), Flow::Quit);
        assert_eq!(console.execute("", &mut out), Flow::Continue);
    }

    #[test]
    fn test_parse_args() {
        let args: Vec<String> = ["speech-sim", "--scenario", "lobby.json", "--seed", "42", "--bogus"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let parsed = parse_args(&args);
        assert_eq!(parsed.scenario, Some(PathBuf::from("lobby.json")));
        assert_eq!(parsed.seed, Some(42));
        assert!(!parsed.help);
        assert!(parse_args(&["-h".to_string()]).help);
    }
}
