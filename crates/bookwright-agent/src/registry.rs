//! Goal and action registry.

use std::collections::HashMap;

use bookwright_core::{Error, Result};
use tracing::debug;

use crate::action::Action;
use crate::goal::Goal;

/// Goals and actions known to an agent.
///
/// Built once by the host, then shared read-only behind an `Arc`. Actions
/// keep registration order, which is the order the planner expands them in.
#[derive(Debug, Default)]
pub struct Registry {
    goals: HashMap<String, Goal>,
    actions: Vec<Action>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a goal, replacing any goal with the same name.
    pub fn register_goal(&mut self, goal: Goal) {
        debug!(goal = %goal.name, conditions = goal.conditions.len(), "Registered goal");
        self.goals.insert(goal.name.clone(), goal);
    }

    /// Register an action. Costs must be finite and non-negative; names unique.
    pub fn register_action(&mut self, action: Action) -> Result<()> {
        if !action.cost.is_finite() || action.cost < 0.0 {
            return Err(Error::Validation(format!(
                "action '{}' has invalid cost {}",
                action.name, action.cost
            )));
        }
        if self.index.contains_key(&action.name) {
            return Err(Error::Validation(format!(
                "action '{}' is already registered",
                action.name
            )));
        }

        debug!(action = %action.name, cost = action.cost, "Registered action");
        self.index.insert(action.name.clone(), self.actions.len());
        self.actions.push(action);
        Ok(())
    }

    /// Builder-style [`register_goal`](Self::register_goal).
    pub fn with_goal(mut self, goal: Goal) -> Self {
        self.register_goal(goal);
        self
    }

    /// Builder-style [`register_action`](Self::register_action).
    pub fn with_action(mut self, action: Action) -> Result<Self> {
        self.register_action(action)?;
        Ok(self)
    }

    pub fn goal(&self, name: &str) -> Option<&Goal> {
        self.goals.get(name)
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.index.get(name).map(|&i| &self.actions[i])
    }

    /// Actions in registration order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Goals, most important first, then by name.
    pub fn goals(&self) -> Vec<&Goal> {
        let mut goals: Vec<&Goal> = self.goals.values().collect();
        goals.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        goals
    }
}
