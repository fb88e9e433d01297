//! Goals and the conditions that satisfy them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bookwright_core::{StateValue, WorldState};

/// Pure test over the whole world state.
pub type Predicate = Arc<dyn Fn(&WorldState) -> bool + Send + Sync>;

/// Requirement placed on one state key.
#[derive(Clone)]
pub enum Condition {
    /// The key must hold exactly this value
    Equals(StateValue),
    /// The predicate must return true; it must not have side effects
    Predicate(Predicate),
}

impl Condition {
    pub fn equals(value: impl Into<StateValue>) -> Self {
        Condition::Equals(value.into())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&WorldState) -> bool + Send + Sync + 'static,
    {
        Condition::Predicate(Arc::new(f))
    }

    /// Whether the condition holds for `key` in `state`.
    ///
    /// A missing key never equals anything, not even `Null`.
    pub fn holds(&self, key: &str, state: &WorldState) -> bool {
        match self {
            Condition::Equals(expected) => state.get(key) == Some(expected),
            Condition::Predicate(f) => f(state),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Equals(value) => write!(f, "Equals({})", value),
            Condition::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

/// A named target the planner searches for.
#[derive(Debug, Clone)]
pub struct Goal {
    pub name: String,
    /// Higher is more important
    pub priority: i32,
    pub conditions: BTreeMap<String, Condition>,
}

impl Goal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            conditions: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Require `key` to equal `value`.
    pub fn require(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.conditions.insert(key.into(), Condition::equals(value));
        self
    }

    /// Require a predicate, filed under `key`.
    pub fn require_that<F>(mut self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&WorldState) -> bool + Send + Sync + 'static,
    {
        self.conditions.insert(key.into(), Condition::predicate(f));
        self
    }

    pub fn is_satisfied(&self, state: &WorldState) -> bool {
        self.unsatisfied(state) == 0
    }

    /// Number of conditions that do not hold. Used as the search heuristic.
    pub fn unsatisfied(&self, state: &WorldState) -> usize {
        self.conditions
            .iter()
            .filter(|(key, condition)| !condition.holds(key, state))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_conditions() {
        let goal = Goal::new("draft").require("draftComplete", true);
        assert!(!goal.is_satisfied(&WorldState::new()));
        assert!(!goal.is_satisfied(&WorldState::from_pairs([("draftComplete", false)])));
        assert!(goal.is_satisfied(&WorldState::from_pairs([("draftComplete", true)])));
    }

    #[test]
    fn test_predicate_counts_when_false() {
        let goal = Goal::new("long")
            .require("draftComplete", true)
            .require_that("words", |s| {
                s.get("words").and_then(|v| v.as_f64()).unwrap_or(0.0) >= 1000.0
            });

        let state = WorldState::from_pairs([("draftComplete", StateValue::from(true))]);
        assert_eq!(goal.unsatisfied(&state), 1);
        assert!(goal.is_satisfied(&state.with("words", 1200)));
    }

    #[test]
    fn test_empty_goal_is_always_satisfied() {
        assert!(Goal::new("noop").is_satisfied(&WorldState::new()));
    }
}
