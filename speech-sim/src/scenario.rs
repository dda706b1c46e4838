//! Scenario files: the cast, their rules and how long things take to play.

use crate::console::ConsoleExecutor;
use crate::rulebook::{RuleBook, RuleSpec};
use crate::world::{ActorSpec, SimWorld};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use speech_core::{CriteriaSet, SpeechConfig, SpeechSystem};
use std::collections::HashMap;
use std::path::Path;

fn default_duration() -> f32 {
    2.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub config: SpeechConfig,
    pub actors: Vec<ActorSpec>,
    /// Criteria added to every speak, `key:value,...`.
    #[serde(default)]
    pub global_criteria: String,
    /// Playback time of anything not listed in `durations`.
    #[serde(default = "default_duration")]
    pub default_duration: f32,
    #[serde(default)]
    pub durations: HashMap<String, f32>,
    /// Time from the start of a scene to the end of its last line.
    #[serde(default)]
    pub scene_tails: HashMap<String, f32>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

impl Scenario {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let scenario: Scenario = serde_json::from_str(json).context("parse scenario")?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("load scenario {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        self.config.validate()?;
        if self.actors.is_empty() {
            bail!("scenario has no actors");
        }
        if !(self.default_duration > 0.0) {
            bail!("default_duration must be positive");
        }
        for (i, actor) in self.actors.iter().enumerate() {
            if actor.name.trim().is_empty() {
                bail!("actor {i} has no name");
            }
            let clash = self.actors[..i]
                .iter()
                .any(|other| other.name.eq_ignore_ascii_case(&actor.name));
            if clash {
                bail!("actor name {} is used twice", actor.name);
            }
        }
        Ok(())
    }

    /// Build the world and a speech system over it, every actor registered as a respondent.
    pub fn build(&self, seed: Option<u64>) -> Build {
        let world = SimWorld::new(&self.actors);
        let names = world
            .actors()
            .iter()
            .map(|actor| (actor.handle, actor.name.clone()))
            .collect();
        let executor = ConsoleExecutor::new(names, self.default_duration)
            .with_durations(self.durations.clone())
            .with_scene_tails(self.scene_tails.clone());
        let transcript = executor.transcript();

        let mut config = self.config.clone();
        if let Some(seed) = seed {
            config = config.with_seed(seed);
        }
        let rulebook = RuleBook::new(self.rules.clone(), config.rng_seed);
        tracing::info!(scenario = %self.name, actors = world.actors().len(), rules = rulebook.len(), "scenario loaded");

        let mut system = SpeechSystem::new(config, Box::new(rulebook), Box::new(executor));
        system
            .global_criteria_mut()
            .merge(&CriteriaSet::parse(&self.global_criteria));
        for handle in world.handles() {
            system.register_respondent(&world, handle);
        }

        Build {
            world,
            system,
            transcript,
        }
    }
}

/// A ready-to-run scenario.
pub struct Build {
    pub world: SimWorld,
    pub system: SpeechSystem,
    pub transcript: crate::console::Transcript,
}
