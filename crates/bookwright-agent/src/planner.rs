//! A* search over world states.
//!
//! Nodes are world states reached by applying action effects. The frontier is
//! ordered by `cost + h`, where `h` is the number of goal conditions that do
//! not yet hold. That heuristic is admissible as long as no action costs less
//! than 1 per condition it flips; goal authors with cheaper actions still get
//! valid plans, just not necessarily the cheapest.
//!
//! The search is synchronous. A wall-clock deadline is checked on every
//! iteration and a closed set keyed by [`WorldState::canonical_key`] stops
//! cycles from running forever. A closed state is only expanded again when
//! it is reached in fewer steps, so the length limit never hides a plan.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use bookwright_core::config::PlannerConfig;
use bookwright_core::{PlanningError, WorldState};
use tracing::debug;

use crate::action::Action;
use crate::goal::Goal;
use crate::plan::ActionPlan;

struct Node {
    state: WorldState,
    parent: Option<usize>,
    action: Option<usize>,
    cost: f64,
    depth: usize,
}

// Min-heap entry: lowest f first, then lowest sequence number.
struct Frontier {
    f: f64,
    seq: usize,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Goal-oriented action planner.
#[derive(Debug, Clone)]
pub struct Planner {
    max_plan_length: usize,
    timeout: Duration,
    default_action_timeout: Duration,
}

impl Default for Planner {
    fn default() -> Self {
        Self::from_config(&PlannerConfig::default())
    }
}

impl Planner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PlannerConfig) -> Self {
        Self {
            max_plan_length: config.max_plan_length,
            timeout: config.timeout(),
            default_action_timeout: config.default_action_timeout(),
        }
    }

    pub fn with_max_plan_length(mut self, max: usize) -> Self {
        self.max_plan_length = max;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_default_action_timeout(mut self, timeout: Duration) -> Self {
        self.default_action_timeout = timeout;
        self
    }

    pub fn max_plan_length(&self) -> usize {
        self.max_plan_length
    }

    pub fn default_action_timeout(&self) -> Duration {
        self.default_action_timeout
    }

    /// Find the cheapest action sequence from `initial` to `goal`.
    ///
    /// Actions are expanded in slice order, and among equally promising
    /// nodes the one pushed first is popped first, so results are
    /// deterministic for a given registration order.
    pub fn plan(
        &self,
        goal: &Goal,
        actions: &[Action],
        initial: &WorldState,
    ) -> Result<ActionPlan, PlanningError> {
        let started = Instant::now();
        let deadline = started + self.timeout;

        let mut nodes = vec![Node {
            state: initial.clone(),
            parent: None,
            action: None,
            cost: 0.0,
            depth: 0,
        }];
        let mut open = BinaryHeap::new();
        open.push(Frontier {
            f: goal.unsatisfied(initial) as f64,
            seq: 0,
        });
        // canonical state key -> shallowest depth it was expanded at
        let mut closed: HashMap<String, usize> = HashMap::new();
        let mut explored = 0usize;

        loop {
            if Instant::now() >= deadline {
                debug!(goal = %goal.name, explored, "Planning timed out");
                return Err(PlanningError::PlanningTimeout {
                    goal: goal.name.clone(),
                    elapsed: started.elapsed(),
                    explored,
                    state: initial.clone(),
                });
            }

            let Some(Frontier { seq: current, .. }) = open.pop() else {
                debug!(goal = %goal.name, explored, "Open set exhausted");
                return Err(PlanningError::NoPlanFound {
                    goal: goal.name.clone(),
                    explored,
                    state: initial.clone(),
                });
            };

            let node = &nodes[current];
            if goal.is_satisfied(&node.state) {
                let cost = node.cost;
                let path = Self::reconstruct(&nodes, current, actions);
                debug!(
                    goal = %goal.name,
                    explored,
                    steps = path.len(),
                    cost,
                    "Plan found"
                );
                return Ok(ActionPlan::new(
                    goal.name.clone(),
                    path,
                    cost,
                    self.default_action_timeout,
                ));
            }

            if node.depth >= self.max_plan_length {
                continue;
            }
            match closed.entry(node.state.canonical_key()) {
                Entry::Occupied(seen) if *seen.get() <= node.depth => continue,
                Entry::Occupied(mut seen) => {
                    seen.insert(node.depth);
                }
                Entry::Vacant(slot) => {
                    slot.insert(node.depth);
                }
            }
            explored += 1;

            let (state, cost, depth) = (node.state.clone(), node.cost, node.depth);
            for (index, action) in actions.iter().enumerate() {
                if !action.is_applicable(&state) {
                    continue;
                }
                let next = action.apply(&state);
                let next_cost = cost + action.cost;
                let seq = nodes.len();
                open.push(Frontier {
                    f: next_cost + goal.unsatisfied(&next) as f64,
                    seq,
                });
                nodes.push(Node {
                    state: next,
                    parent: Some(current),
                    action: Some(index),
                    cost: next_cost,
                    depth: depth + 1,
                });
            }
        }
    }

    fn reconstruct(nodes: &[Node], mut at: usize, actions: &[Action]) -> Vec<Action> {
        let mut path = Vec::with_capacity(nodes[at].depth);
        while let (Some(parent), Some(action)) = (nodes[at].parent, nodes[at].action) {
            path.push(actions[action].clone());
            at = parent;
        }
        path.reverse();
        path
    }
}
