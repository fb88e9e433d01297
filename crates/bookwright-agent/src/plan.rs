//! Immutable action plans.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::action::Action;

/// Ordered actions that take the world state to a goal.
#[derive(Debug, Clone)]
pub struct ActionPlan {
    pub id: Uuid,
    pub goal: String,
    pub actions: Vec<Action>,
    /// Sum of action costs
    pub estimated_cost: f64,
    /// Sum of action timeouts, using the default where unset
    pub estimated_duration: Duration,
    pub created_at: DateTime<Utc>,
}

impl ActionPlan {
    pub fn new(
        goal: impl Into<String>,
        actions: Vec<Action>,
        estimated_cost: f64,
        default_action_timeout: Duration,
    ) -> Self {
        let estimated_duration = actions
            .iter()
            .map(|a| a.timeout.unwrap_or(default_action_timeout))
            .sum();
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            actions,
            estimated_cost,
            estimated_duration,
            created_at: Utc::now(),
        }
    }

    pub fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True when the goal already holds and nothing needs to run.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Serializable view without the handlers.
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            id: self.id,
            goal: self.goal.clone(),
            actions: self.action_names().into_iter().map(String::from).collect(),
            estimated_cost: self.estimated_cost,
            estimated_duration_ms: self.estimated_duration.as_millis() as u64,
            created_at: self.created_at,
        }
    }
}

/// Handler-free description of a plan, for logs and output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    pub id: Uuid,
    pub goal: String,
    pub actions: Vec<String>,
    pub estimated_cost: f64,
    pub estimated_duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_uses_default_for_unset_timeouts() {
        let plan = ActionPlan::new(
            "draft",
            vec![
                Action::effects_only("a").with_timeout(Duration::from_secs(5)),
                Action::effects_only("b"),
            ],
            3.0,
            Duration::from_secs(30),
        );

        assert_eq!(plan.estimated_duration, Duration::from_secs(35));
        assert_eq!(plan.summary().actions, vec!["a", "b"]);
    }
}
