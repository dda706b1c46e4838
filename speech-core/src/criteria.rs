//! Weighted criteria sets.
//!
//! A criteria set is the ordered key/value bag the resolver scores against.
//! Keys are case-insensitive; appending an existing key overwrites its value
//! and weight in place, so insertion order is the order keys first appeared.

use serde::{Deserialize, Serialize};

/// Weight given to criteria appended without an explicit weight.
pub const DEFAULT_WEIGHT: f32 = 1.0;

/// One key/value pair with its match weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub key: String,
    pub value: String,
    pub weight: f32,
}

/// Ordered bag of criteria.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CriteriaSet {
    criteria: Vec<Criterion>,
}

impl CriteriaSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the permissive `key:value,key:value` form.
    ///
    /// Pairs without a colon or with an empty key are skipped.
    pub fn parse(text: &str) -> Self {
        let mut set = Self::new();
        set.merge_str(text);
        set
    }

    /// Append a criterion, replacing the value and weight if the key exists.
    pub fn append(&mut self, key: &str, value: impl Into<String>, weight: f32) {
        let value = value.into();
        match self.find_index(key) {
            Some(index) => {
                let existing = &mut self.criteria[index];
                existing.value = value;
                existing.weight = weight;
            }
            None => self.criteria.push(Criterion {
                key: key.to_string(),
                value,
                weight,
            }),
        }
    }

    /// Append with [`DEFAULT_WEIGHT`].
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.append(key, value, DEFAULT_WEIGHT);
    }

    /// Append every criterion of `other`, in order.
    pub fn merge(&mut self, other: &CriteriaSet) {
        for criterion in &other.criteria {
            self.append(&criterion.key, criterion.value.clone(), criterion.weight);
        }
    }

    /// Merge the `key:value,key:value` form. Returns how many pairs were taken.
    pub fn merge_str(&mut self, text: &str) -> usize {
        let mut taken = 0;
        for pair in text.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let Some((key, value)) = pair.split_once(':') else {
                tracing::debug!(pair, "skipping criterion without a value");
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                tracing::debug!(pair, "skipping criterion without a key");
                continue;
            }
            self.set(key, value.trim());
            taken += 1;
        }
        taken
    }

    pub fn find_index(&self, key: &str) -> Option<usize> {
        self.criteria
            .iter()
            .position(|c| c.key.eq_ignore_ascii_case(key))
    }

    pub fn get(&self, index: usize) -> Option<&Criterion> {
        self.criteria.get(index)
    }

    pub fn get_value(&self, index: usize) -> Option<&str> {
        self.criteria.get(index).map(|c| c.value.as_str())
    }

    /// Value for `key`, if present.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.find_index(key).and_then(|index| self.get_value(index))
    }

    pub fn remove(&mut self, key: &str) -> Option<Criterion> {
        self.find_index(key).map(|index| self.criteria.remove(index))
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Criterion> {
        self.criteria.iter()
    }

    /// Strip every criterion whose key is `prefix` followed by a name.
    ///
    /// The prefix matches case-insensitively and must be followed by an
    /// uppercase letter (`worldAlarm`) or a `_`/`.` separator (`world_alarm`),
    /// so ordinary keys like `worldspawn` are left alone. Returns the stripped
    /// criteria keyed by the name alone.
    pub fn intercept_prefixed(&mut self, prefix: &str) -> CriteriaSet {
        let mut intercepted = CriteriaSet::new();
        self.criteria.retain(|criterion| match prefixed_name(&criterion.key, prefix) {
            Some(name) => {
                intercepted.append(name, criterion.value.clone(), criterion.weight);
                false
            }
            None => true,
        });
        intercepted
    }

    /// Render back to the `key:value,key:value` form.
    pub fn to_context_string(&self) -> String {
        self.criteria
            .iter()
            .map(|c| format!("{}:{}", c.key, c.value))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// The name after `prefix` in `key`, if `key` is a prefixed key.
fn prefixed_name<'k>(key: &'k str, prefix: &str) -> Option<&'k str> {
    let head = key.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = &key[prefix.len()..];
    if let Some(name) = rest.strip_prefix(|c: char| c == '_' || c == '.') {
        return (!name.is_empty()).then_some(name);
    }
    rest.starts_with(|c: char| c.is_ascii_uppercase()).then_some(rest)
}

impl<'a> IntoIterator for &'a CriteriaSet {
    type Item = &'a Criterion;
    type IntoIter = std::slice::Iter<'a, Criterion>;

    fn into_iter(self) -> Self::IntoIter {
        self.criteria.iter()
    }
}
