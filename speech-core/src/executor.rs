//! Speech act executors: whatever actually plays sound, scenes and text.

use crate::entity::EntityHandle;
use crate::response::SoundLevel;

/// Plays resolved responses on behalf of the core.
///
/// Durations are in seconds; a duration `<= 0` means the act failed to play.
pub trait SpeechExecutor {
    /// Play a sound wrapped in an auto-generated scene.
    fn speak_line(&mut self, speaker: EntityHandle, sound: &str, level: SoundLevel, delay: f32) -> f32;

    fn play_sentence(&mut self, speaker: EntityHandle, sentence: &str, level: SoundLevel, delay: f32) -> f32;

    fn play_scene(&mut self, speaker: EntityHandle, scene: &str, delay: f32) -> f32;

    /// Show debug or subtitle text. Returns a duration override for on-screen captions.
    fn print(&mut self, speaker: EntityHandle, text: &str) -> Option<f32>;

    /// Run a script response. Returns whether it ran.
    fn run_script(&mut self, _speaker: EntityHandle, _source: &str) -> bool {
        false
    }

    /// Fire `input` on `target` after `delay` seconds.
    fn fire_input(
        &mut self,
        target: EntityHandle,
        input: &str,
        param: Option<&str>,
        delay: f32,
        activator: Option<EntityHandle>,
    );

    /// Time from the start of `scene` to the end of its last spoken line.
    ///
    /// `None` when the scene cannot be inspected.
    fn scene_speech_tail(&self, _scene: &str) -> Option<f32> {
        None
    }
}

/// An entity I/O response, `target input [param]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityIoCommand<'a> {
    pub target: &'a str,
    pub input: &'a str,
    pub param: Option<&'a str>,
}

impl<'a> EntityIoCommand<'a> {
    /// Parse `target input [param...]`. Everything after the input is the parameter.
    pub fn parse(text: &'a str) -> Option<Self> {
        let text = text.trim();
        let (target, rest) = text.split_once(char::is_whitespace)?;
        let rest = rest.trim_start();
        let (input, param) = match rest.split_once(char::is_whitespace) {
            Some((input, param)) => (input, Some(param.trim()).filter(|p| !p.is_empty())),
            None => (rest, None),
        };
        if input.is_empty() {
            return None;
        }
        Some(Self {
            target,
            input,
            param,
        })
    }
}
