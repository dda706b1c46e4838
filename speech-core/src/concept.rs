//! Speech concepts.
//!
//! A concept is the abstract intent behind an utterance ("greet",
//! "under_attack"). Concept names are interned in a process-wide symbol
//! table so that two concepts built from the same text share one
//! allocation, and comparisons can short-circuit on pointer identity.

use crate::entity::EntityHandle;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

lazy_static::lazy_static! {
    /// Interned concept names, keyed by their exact text.
    static ref CONCEPT_SYMBOLS: Mutex<HashMap<String, Arc<str>>> = Mutex::new(HashMap::new());
}

fn intern(name: &str) -> Arc<str> {
    let mut symbols = CONCEPT_SYMBOLS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(symbol) = symbols.get(name) {
        return Arc::clone(symbol);
    }
    let symbol: Arc<str> = Arc::from(name);
    symbols.insert(name.to_string(), Arc::clone(&symbol));
    symbol
}

/// An utterance intent plus the character it is attributed to.
#[derive(Debug, Clone)]
pub struct Concept {
    name: Arc<str>,
    speaker: Option<EntityHandle>,
}

impl Concept {
    /// Create a concept from its name, interning the text.
    pub fn new(name: &str) -> Self {
        Self {
            name: intern(name),
            speaker: None,
        }
    }

    /// The concept's text.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Who the concept is attributed to, once dispatched.
    pub fn speaker(&self) -> Option<EntityHandle> {
        self.speaker
    }

    pub fn set_speaker(&mut self, speaker: EntityHandle) {
        self.speaker = Some(speaker);
    }

    pub fn with_speaker(mut self, speaker: EntityHandle) -> Self {
        self.speaker = Some(speaker);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// True if both concepts share the same interned symbol.
    pub fn same_symbol(&self, other: &Concept) -> bool {
        Arc::ptr_eq(&self.name, &other.name)
    }
}

/// Concept identity: the same interned symbol, or case-insensitively equal text.
///
/// Speaker attribution is not part of identity.
pub fn compare_concepts(a: &Concept, b: &Concept) -> bool {
    a.same_symbol(b) || a.name.eq_ignore_ascii_case(&b.name)
}

impl PartialEq for Concept {
    fn eq(&self, other: &Self) -> bool {
        compare_concepts(self, other)
    }
}

impl From<&str> for Concept {
    fn from(name: &str) -> Self {
        Concept::new(name)
    }
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
