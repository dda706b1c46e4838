//! A [`SpeechExecutor`] that narrates speech acts as tagged text lines.

use speech_core::{EntityHandle, SoundLevel, SpeechExecutor};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Lines written by the executor and not yet shown.
pub type Transcript = Rc<RefCell<Vec<String>>>;

pub struct ConsoleExecutor {
    names: HashMap<EntityHandle, String>,
    durations: HashMap<String, f32>,
    default_duration: f32,
    scene_tails: HashMap<String, f32>,
    transcript: Transcript,
}

impl ConsoleExecutor {
    pub fn new(names: HashMap<EntityHandle, String>, default_duration: f32) -> Self {
        Self {
            names,
            durations: HashMap::new(),
            default_duration,
            scene_tails: HashMap::new(),
            transcript: Rc::default(),
        }
    }

    /// Playback time of particular sounds, sentences or scenes.
    pub fn with_durations(mut self, durations: HashMap<String, f32>) -> Self {
        self.durations = durations;
        self
    }

    pub fn with_scene_tails(mut self, tails: HashMap<String, f32>) -> Self {
        self.scene_tails = tails;
        self
    }

    /// A handle on the lines this executor writes.
    pub fn transcript(&self) -> Transcript {
        Rc::clone(&self.transcript)
    }

    fn name(&self, handle: EntityHandle) -> String {
        self.names
            .get(&handle)
            .cloned()
            .unwrap_or_else(|| handle.to_string())
    }

    fn duration(&self, item: &str) -> f32 {
        self.durations.get(item).copied().unwrap_or(self.default_duration)
    }

    fn write(&self, line: String) {
        self.transcript.borrow_mut().push(line);
    }
}

impl SpeechExecutor for ConsoleExecutor {
    fn speak_line(&mut self, speaker: EntityHandle, sound: &str, level: SoundLevel, delay: f32) -> f32 {
        let duration = self.duration(sound);
        self.write(format!(
            "[SAY] {}: {sound} ({duration:.1}s, {}dB, delay {delay:.1}s)",
            self.name(speaker),
            level.0
        ));
        duration
    }

    fn play_sentence(&mut self, speaker: EntityHandle, sentence: &str, level: SoundLevel, delay: f32) -> f32 {
        let duration = self.duration(sentence);
        self.write(format!(
            "[SENTENCE] {}: {sentence} ({duration:.1}s, {}dB, delay {delay:.1}s)",
            self.name(speaker),
            level.0
        ));
        duration
    }

    fn play_scene(&mut self, speaker: EntityHandle, scene: &str, delay: f32) -> f32 {
        let duration = self.duration(scene);
        self.write(format!(
            "[SCENE] {}: {scene} ({duration:.1}s, delay {delay:.1}s)",
            self.name(speaker)
        ));
        duration
    }

    fn print(&mut self, speaker: EntityHandle, text: &str) -> Option<f32> {
        self.write(format!("[PRINT] {}: {text}", self.name(speaker)));
        None
    }

    fn run_script(&mut self, speaker: EntityHandle, source: &str) -> bool {
        self.write(format!("[SCRIPT] {}: {source}", self.name(speaker)));
        true
    }

    fn fire_input(
        &mut self,
        target: EntityHandle,
        input: &str,
        param: Option<&str>,
        delay: f32,
        activator: Option<EntityHandle>,
    ) {
        let from = activator.map(|who| self.name(who)).unwrap_or_else(|| "world".to_string());
        let param = param.map(|p| format!(" {p}")).unwrap_or_default();
        self.write(format!(
            "[INPUT] {from} -> {}: {input}{param} (delay {delay:.1}s)",
            self.name(target)
        ));
    }

    fn scene_speech_tail(&self, scene: &str) -> Option<f32> {
        self.scene_tails.get(scene).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> ConsoleExecutor {
        let barney = EntityHandle::new(0, 1);
        let names = HashMap::from([(barney, "Barney".to_string())]);
        ConsoleExecutor::new(names, 2.0).with_durations(HashMap::from([("long.wav".to_string(), 6.5)]))
    }

    #[test]
    fn test_durations_fall_back_to_default() {
        let mut exec = executor();
        let barney = EntityHandle::new(0, 1);
        assert_eq!(exec.speak_line(barney, "long.wav", SoundLevel::default(), 0.0), 6.5);
        assert_eq!(exec.speak_line(barney, "short.wav", SoundLevel::default(), 0.0), 2.0);
    }

    #[test]
    fn test_transcript_names_speakers() {
        let mut exec = executor();
        let transcript = exec.transcript();
        exec.print(EntityHandle::new(0, 1), "hello");
        exec.fire_input(EntityHandle::new(7, 1), "Open", None, 0.5, None);

        let lines = transcript.borrow();
        assert_eq!(lines[0], "[PRINT] Barney: hello");
        assert_eq!(lines[1], "[INPUT] world -> #7:1: Open (delay 0.5s)");
    }
}
