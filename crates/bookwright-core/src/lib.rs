//! # bookwright-core
//!
//! Core types and abstractions for Bookwright, the goal-driven eBook generator.
//!
//! This crate provides:
//! - World state values and immutable state snapshots
//! - Chat message primitives sent to providers
//! - Configuration system
//! - The error taxonomy shared by the planner, executor and gateway

pub mod config;
pub mod error;
pub mod message;
pub mod state;

pub use config::Config;
pub use error::{
    Error, ExecutionError, GatewayError, PlanningError, ProviderAttempt, ProviderError, Result,
};
pub use message::{Message, Role};
pub use state::{fragment, StateChange, StateDiff, StateFragment, StateValue, WorldState};
