//! A data-driven response rule book.
//!
//! Rules list the criteria they require and the responses they can give.
//! A rule matches when every one of its criteria matches the query; its
//! score is the summed weight of the query criteria it matched. The best
//! scoring rule wins, ties are broken at random, and one of its responses
//! is picked at random.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use speech_core::{
    ContextScope, CriteriaSet, EntityIoFollowup, Followup, FollowupTiming, Resolver, Response, ResponseKind,
    SoundLevel,
};

/// How deep nested response groups may go before the rule book gives up.
const MAX_GROUP_DEPTH: usize = 4;

/// A follow-up as written in rule data. A negative `delay` counts from the start of the line.
#[derive(Debug, Clone, Deserialize)]
pub struct FollowupSpec {
    #[serde(default)]
    pub concept: String,
    #[serde(default = "default_followup_target")]
    pub target: String,
    #[serde(default)]
    pub delay: f32,
    #[serde(default)]
    pub contexts: String,
    #[serde(default)]
    pub entity_io: Option<EntityIoFollowup>,
}

fn default_followup_target() -> String {
    "self".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseSpec {
    pub kind: ResponseKind,
    pub text: String,
    #[serde(default)]
    pub delay: f32,
    #[serde(default)]
    pub sound_level: Option<u8>,
    #[serde(default)]
    pub speak_once: bool,
    #[serde(default)]
    pub respeak_delay: f32,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub context_scope: ContextScope,
    #[serde(default)]
    pub followup: Option<FollowupSpec>,
}

impl ResponseSpec {
    fn to_response(&self, rule: &str, score: f32) -> Response {
        let followup = self.followup.as_ref().map(|spec| Followup {
            concept: spec.concept.clone(),
            contexts: spec.contexts.clone(),
            target: spec.target.clone(),
            timing: FollowupTiming::from_signed(spec.delay),
            entity_io: spec.entity_io.clone(),
        });
        Response {
            kind: self.kind,
            text: self.text.clone(),
            rule: rule.to_string(),
            delay: self.delay,
            sound_level: self.sound_level.map(SoundLevel).unwrap_or_default(),
            speak_once: self.speak_once,
            respeak_delay: self.respeak_delay,
            followup,
            context: self.context.clone(),
            context_scope: self.context_scope,
            score,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    /// `key:value,...`. A value of `*` only requires the key; `!value` negates.
    pub criteria: String,
    pub responses: Vec<ResponseSpec>,
}

/// A rule with its criteria parsed.
#[derive(Debug, Clone)]
struct Rule {
    spec: RuleSpec,
    criteria: CriteriaSet,
}

impl Rule {
    /// Summed weight of the matched query criteria, or `None` if any requirement fails.
    fn score(&self, query: &CriteriaSet) -> Option<f32> {
        if self.criteria.is_empty() {
            return None;
        }
        let mut score = 0.0;
        for wanted in self.criteria.iter() {
            let actual = query.find_index(&wanted.key).and_then(|index| query.get(index));
            let matched = match (wanted.value.as_str(), actual) {
                ("*", Some(_)) => true,
                (negated, actual) if negated.starts_with('!') => {
                    actual.map_or(true, |c| !c.value.eq_ignore_ascii_case(&negated[1..]))
                }
                (value, Some(actual)) => actual.value.eq_ignore_ascii_case(value),
                (_, None) => false,
            };
            if !matched {
                return None;
            }
            score += actual.map_or(0.0, |c| c.weight);
        }
        Some(score)
    }
}

/// A [`Resolver`] over rule data.
pub struct RuleBook {
    rules: Vec<Rule>,
    rng: StdRng,
}

impl RuleBook {
    pub fn new(rules: Vec<RuleSpec>, seed: Option<u64>) -> Self {
        let rules = rules
            .into_iter()
            .map(|spec| Rule {
                criteria: CriteriaSet::parse(&spec.criteria),
                spec,
            })
            .collect();
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rules, rng }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    fn rule_index(&self, name: &str) -> Option<usize> {
        self.rules
            .iter()
            .position(|rule| rule.spec.name.eq_ignore_ascii_case(name))
    }

    fn pick_response(&mut self, rule_index: usize, score: f32, depth: usize) -> Option<Response> {
        let rule = &self.rules[rule_index];
        let spec = rule.spec.responses.choose(&mut self.rng)?;
        let response = spec.to_response(&rule.spec.name, score);
        if response.kind != ResponseKind::Response {
            return Some(response);
        }
        if depth >= MAX_GROUP_DEPTH {
            tracing::warn!(rule = %rule.spec.name, "response groups nested too deeply");
            return None;
        }
        let Some(group) = self.rule_index(&response.text) else {
            tracing::warn!(rule = %rule.spec.name, group = %response.text, "unknown response group");
            return None;
        };
        self.pick_response(group, score, depth + 1)
    }
}

impl Resolver for RuleBook {
    fn find_best_response(&mut self, criteria: &CriteriaSet) -> Option<Response> {
        let scored: Vec<(usize, f32)> = self
            .rules
            .iter()
            .enumerate()
            .filter_map(|(index, rule)| rule.score(criteria).map(|score| (index, score)))
            .collect();
        let best = scored
            .iter()
            .map(|(_, score)| *score)
            .fold(f32::NEG_INFINITY, f32::max);
        let tied: Vec<usize> = scored
            .iter()
            .filter(|(_, score)| *score == best)
            .map(|(index, _)| *index)
            .collect();
        let winner = *tied.choose(&mut self.rng)?;
        tracing::trace!(rule = %self.rules[winner].spec.name, score = best, "rule matched");
        self.pick_response(winner, best, 0)
    }

    fn all_responses(&self) -> Vec<Response> {
        self.rules
            .iter()
            .flat_map(|rule| {
                rule.spec
                    .responses
                    .iter()
                    .map(|spec| spec.to_response(&rule.spec.name, 0.0))
            })
            .collect()
    }
}
