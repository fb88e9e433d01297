//! World state primitives.
//!
//! A [`WorldState`] is a value type: every update produces a new snapshot and
//! the previous one is left untouched. The planner explores successor states by
//! merging action effects, and the agent swaps its live state for the merged one
//! after each successful action.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

/// A scalar fact stored in the world state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    /// Explicit absence of a value
    Null,
    /// Boolean flag
    Bool(bool),
    /// Numeric value
    Number(f64),
    /// Free-form text
    Text(String),
}

impl StateValue {
    /// Truthiness in the loose sense used by goal predicates.
    pub fn is_truthy(&self) -> bool {
        match self {
            StateValue::Null => false,
            StateValue::Bool(b) => *b,
            StateValue::Number(n) => *n != 0.0 && !n.is_nan(),
            StateValue::Text(s) => !s.is_empty(),
        }
    }

    /// Get the value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the value as a number, if it is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the value as text, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Null => write!(f, "null"),
            StateValue::Bool(b) => write!(f, "{}", b),
            StateValue::Number(n) => write!(f, "{}", n),
            StateValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        StateValue::Number(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Number(value as f64)
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        StateValue::Number(value as f64)
    }
}

impl From<u32> for StateValue {
    fn from(value: u32) -> Self {
        StateValue::Number(value as f64)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Text(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Text(value)
    }
}

impl<T: Into<StateValue>> From<Option<T>> for StateValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(StateValue::Null)
    }
}

/// A partial set of key/value writes (effects, preconditions, returned state).
pub type StateFragment = BTreeMap<String, StateValue>;

/// Build a [`StateFragment`] from `(key, value)` pairs.
pub fn fragment<K, V, I>(pairs: I) -> StateFragment
where
    K: Into<String>,
    V: Into<StateValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Immutable snapshot of everything the planner reasons about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldState {
    facts: BTreeMap<String, StateValue>,
}

impl WorldState {
    /// Create an empty world state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a world state from `(key, value)` pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<StateValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            facts: fragment(pairs),
        }
    }

    /// Look up a fact.
    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.facts.get(key)
    }

    /// Check whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.facts.contains_key(key)
    }

    /// Number of facts.
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Whether the state holds no facts.
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Iterate facts in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &StateValue)> {
        self.facts.iter()
    }

    /// Check that every `(key, value)` in `required` is present with an equal value.
    pub fn satisfies(&self, required: &StateFragment) -> bool {
        required
            .iter()
            .all(|(key, expected)| self.facts.get(key) == Some(expected))
    }

    /// Produce a new state with `effects` written over this one (last write wins).
    pub fn merge(&self, effects: &StateFragment) -> WorldState {
        let mut facts = self.facts.clone();
        for (key, value) in effects {
            facts.insert(key.clone(), value.clone());
        }
        WorldState { facts }
    }

    /// Produce a new state with a single fact set.
    pub fn with(&self, key: impl Into<String>, value: impl Into<StateValue>) -> WorldState {
        let mut facts = self.facts.clone();
        facts.insert(key.into(), value.into());
        WorldState { facts }
    }

    /// Canonical rendering used for closed-set membership during planning.
    ///
    /// Keys are visited in sorted order, so two states with the same facts
    /// always produce the same key. Keys and text values are quoted and
    /// escaped, so distinct states never share a key.
    pub fn canonical_key(&self) -> String {
        let mut key = String::with_capacity(self.facts.len() * 16);
        for (i, (k, v)) in self.facts.iter().enumerate() {
            if i > 0 {
                key.push('|');
            }
            let _ = write!(key, "{:?}={}", k, v);
        }
        key
    }

    /// Changes needed to go from `self` to `next`.
    pub fn diff(&self, next: &WorldState) -> StateDiff {
        let changes = next
            .facts
            .iter()
            .filter(|(key, value)| self.facts.get(*key) != Some(*value))
            .map(|(key, value)| StateChange {
                key: key.clone(),
                before: self.facts.get(key).cloned(),
                after: value.clone(),
            })
            .collect();
        StateDiff { changes }
    }

    /// Convert into the underlying map.
    pub fn into_fragment(self) -> StateFragment {
        self.facts
    }
}

impl fmt::Display for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.facts.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        f.write_str("}")
    }
}

impl From<StateFragment> for WorldState {
    fn from(facts: StateFragment) -> Self {
        Self { facts }
    }
}

/// A single key change between two states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    /// Fact key
    pub key: String,
    /// Value before the update (`None` when the key was absent)
    pub before: Option<StateValue>,
    /// Value after the update
    pub after: StateValue,
}

/// Before/after diff emitted with state updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDiff {
    pub changes: Vec<StateChange>,
}

impl StateDiff {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Keys that changed.
    pub fn keys(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.key.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_does_not_mutate_original() {
        let original = WorldState::from_pairs([("draftComplete", false), ("outlineReady", false)]);
        let next = original.merge(&fragment([("outlineReady", true)]));

        assert_eq!(original.get("outlineReady"), Some(&StateValue::Bool(false)));
        assert_eq!(next.get("outlineReady"), Some(&StateValue::Bool(true)));
        assert_eq!(next.get("draftComplete"), Some(&StateValue::Bool(false)));
    }

    #[test]
    fn test_merge_last_write_wins() {
        let state = WorldState::from_pairs([("chapters", 1)]);
        let next = state.merge(&fragment([("chapters", 3), ("title", 0)]));
        assert_eq!(next.get("chapters"), Some(&StateValue::Number(3.0)));
        assert_eq!(next.len(), 2);
    }

    #[test]
    fn test_canonical_key_is_order_independent() {
        let a = WorldState::from_pairs([("b", true), ("a", false)]);
        let b = WorldState::new().with("a", false).with("b", true);
        assert_eq!(a.canonical_key(), b.canonical_key());
        assert_eq!(a.canonical_key(), r#""a"=false|"b"=true"#);
    }

    #[test]
    fn test_canonical_key_is_injective_across_separators() {
        let plain = WorldState::from_pairs([("a", true), ("b", false)]);
        let tricky = WorldState::from_pairs([("a=true|b", false)]);
        assert_ne!(plain.canonical_key(), tricky.canonical_key());

        let quoted = WorldState::from_pairs([("k", "x\"|\"j\"=\"y")]);
        let split = WorldState::from_pairs([("k", "x"), ("j", "y")]);
        assert_ne!(quoted.canonical_key(), split.canonical_key());
    }

    #[test]
    fn test_display_lists_facts() {
        let state = WorldState::from_pairs([("b", StateValue::from("x")), ("a", StateValue::from(true))]);
        assert_eq!(state.to_string(), r#"{a=true, b="x"}"#);
    }

    #[test]
    fn test_canonical_key_distinguishes_types() {
        let text = WorldState::from_pairs([("x", "1")]);
        let number = WorldState::from_pairs([("x", 1)]);
        assert_ne!(text.canonical_key(), number.canonical_key());
    }

    #[test]
    fn test_satisfies_uses_strict_equality() {
        let state = WorldState::from_pairs([("ready", StateValue::Number(1.0))]);
        assert!(!state.satisfies(&fragment([("ready", true)])));
        assert!(state.satisfies(&fragment([("ready", 1)])));
        assert!(!state.satisfies(&fragment([("missing", StateValue::Null)])));
    }

    #[test]
    fn test_diff_reports_before_and_after() {
        let before = WorldState::from_pairs([("outlineReady", false)]);
        let after = before.merge(&fragment([
            ("outlineReady", StateValue::from(true)),
            ("title", StateValue::from("Rust")),
        ]));
        let diff = before.diff(&after);

        assert_eq!(diff.keys(), vec!["outlineReady", "title"]);
        assert_eq!(diff.changes[0].before, Some(StateValue::Bool(false)));
        assert_eq!(diff.changes[1].before, None);
        assert!(after.diff(&after).is_empty());
    }

    #[test]
    fn test_truthiness() {
        assert!(!StateValue::Null.is_truthy());
        assert!(!StateValue::from(0).is_truthy());
        assert!(StateValue::from("x").is_truthy());
        assert!(!StateValue::from("").is_truthy());
    }

    #[test]
    fn test_json_round_trip_shape() {
        let state = WorldState::from_pairs([("done", StateValue::Bool(true)), ("note", StateValue::Null)]);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json, serde_json::json!({"done": true, "note": null}));
    }
}
