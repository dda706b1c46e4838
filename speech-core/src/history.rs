//! Per-character concept history.
//!
//! Tracks when each concept was last spoken and which response was used,
//! so speak-once and respeak-delay rules can be enforced.

use crate::response::Response;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a character last did with one concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Concept name as first recorded.
    pub concept: String,
    /// `None` if the entry exists but was never actually spoken.
    pub time_spoken: Option<f32>,
    pub response: Option<Response>,
}

/// Concept history for one expresser, keyed case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct ConceptHistory {
    entries: HashMap<String, HistoryEntry>,
}

fn history_key(concept: &str) -> String {
    concept.to_ascii_lowercase()
}

impl ConceptHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the last recorded response for `concept` allows speaking it at `now`.
    pub fn can_speak_concept(&self, concept: &str, now: f32) -> bool {
        let Some(entry) = self.entries.get(&history_key(concept)) else {
            return true;
        };
        let Some(response) = entry.response.as_ref().filter(|r| !r.is_empty()) else {
            return true;
        };
        if response.speak_once {
            return false;
        }
        if response.respeak_delay != 0.0 {
            if let Some(spoken) = entry.time_spoken {
                if now < spoken + response.respeak_delay {
                    return false;
                }
            }
        }
        true
    }

    pub fn spoke_concept(&self, concept: &str) -> bool {
        self.time_spoke_concept(concept).is_some()
    }

    pub fn time_spoke_concept(&self, concept: &str) -> Option<f32> {
        self.entries
            .get(&history_key(concept))
            .and_then(|entry| entry.time_spoken)
    }

    pub fn get(&self, concept: &str) -> Option<&HistoryEntry> {
        self.entries.get(&history_key(concept))
    }

    /// Record that `concept` was spoken at `now`, creating the entry if needed.
    pub fn set_spoke_concept(&mut self, concept: &str, now: f32, response: Option<&Response>) {
        let entry = self
            .entries
            .entry(history_key(concept))
            .or_insert_with(|| HistoryEntry {
                concept: concept.to_string(),
                time_spoken: None,
                response: None,
            });
        entry.time_spoken = Some(now);
        if let Some(response) = response {
            entry.response = Some(response.clone());
        }
    }

    pub fn clear_spoke_concept(&mut self, concept: &str) {
        self.entries.remove(&history_key(concept));
    }

    /// Insert a restored entry as-is.
    pub fn insert(&mut self, entry: HistoryEntry) {
        self.entries.insert(history_key(&entry.concept), entry);
    }

    pub fn purge(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_concept_can_be_spoken() {
        let history = ConceptHistory::new();
        assert!(history.can_speak_concept("greet", 0.0));
        assert!(!history.spoke_concept("greet"));
    }

    #[test]
    fn test_speak_once_blocks_forever() {
        let mut history = ConceptHistory::new();
        history.set_spoke_concept("greet", 1.0, Some(&Response::speak("hi.wav").speak_once()));

        assert!(!history.can_speak_concept("greet", 1.0));
        assert!(!history.can_speak_concept("GREET", 10_000.0));
    }

    #[test]
    fn test_respeak_delay_window() {
        let mut history = ConceptHistory::new();
        let response = Response::speak("hi.wav").with_respeak_delay(4.0);
        history.set_spoke_concept("greet", 10.0, Some(&response));

        assert!(!history.can_speak_concept("greet", 10.0));
        assert!(!history.can_speak_concept("greet", 13.9));
        assert!(history.can_speak_concept("greet", 14.0));
        assert!(history.can_speak_concept("greet", 20.0));
    }

    #[test]
    fn test_empty_response_never_blocks() {
        let mut history = ConceptHistory::new();
        history.set_spoke_concept("greet", 0.0, Some(&Response::default().speak_once()));
        assert!(history.can_speak_concept("greet", 0.0));
    }

    #[test]
    fn test_update_keeps_previous_response() {
        let mut history = ConceptHistory::new();
        history.set_spoke_concept("greet", 1.0, Some(&Response::speak("hi.wav")));
        history.set_spoke_concept("Greet", 5.0, None);

        let entry = history.get("greet").unwrap();
        assert_eq!(entry.concept, "greet");
        assert_eq!(entry.time_spoken, Some(5.0));
        assert_eq!(entry.response.as_ref().unwrap().text, "hi.wav");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_clear_and_purge() {
        let mut history = ConceptHistory::new();
        history.set_spoke_concept("greet", 1.0, None);
        history.set_spoke_concept("idle", 2.0, None);

        history.clear_spoke_concept("GREET");
        assert!(!history.spoke_concept("greet"));
        assert_eq!(history.time_spoke_concept("idle"), Some(2.0));

        history.purge();
        assert!(history.is_empty());
    }
}
