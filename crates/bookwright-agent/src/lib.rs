//! # bookwright-agent
//!
//! Goal-oriented planning and execution for Bookwright.
//!
//! This crate provides:
//! - Goals, conditions and actions with async handlers
//! - An A* [`Planner`] over world states
//! - [`ActionExecutor`], which runs one action under its timeout
//! - [`Agent`], the task state machine, and its lifecycle events
//! - The eBook action pack in [`book`]

pub mod action;
pub mod agent;
pub mod book;
pub mod events;
pub mod executor;
pub mod goal;
pub mod plan;
pub mod planner;
pub mod registry;

pub use action::{
    handler_fn, Action, ActionContext, ActionHandler, ActionOutput, ActionResult, EffectsOnly,
};
pub use agent::{Agent, AgentBuilder, Task, TaskOutcome, TaskStatus};
pub use events::{
    AgentEvent, AgentEventHandler, ChannelEventHandler, LoggingEventHandler, NoOpEventHandler,
};
pub use executor::{ActionExecutor, DEFAULT_ACTION_TIMEOUT};
pub use goal::{Condition, Goal};
pub use plan::{ActionPlan, PlanSummary};
pub use planner::Planner;
pub use registry::Registry;
