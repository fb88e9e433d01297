//! CLI command implementations.

use std::sync::Arc;

use bookwright_agent::book::{self, BookOptions};
use bookwright_agent::{Agent, LoggingEventHandler};

use crate::AppContext;

pub mod config;
pub mod doctor;
pub mod generate;
pub mod health;
pub mod plan;
pub mod provider;
pub mod run;

/// Agent loaded with the book actions, wired to the shared gateway and monitor.
pub(crate) fn book_agent(ctx: &AppContext, structured_outline: bool) -> anyhow::Result<Agent> {
    let options = BookOptions {
        structured_outline,
        generate: ctx.options.clone(),
    };
    let registry = book::registry(ctx.gateway.clone(), &options)?;

    let agent = Agent::builder()
        .registry(Arc::new(registry))
        .planner_config(&ctx.config.planner)
        .metrics(ctx.monitor.clone())
        .initial_state(book::initial_state())
        .event_handler(Arc::new(LoggingEventHandler))
        .build()?;
    Ok(agent)
}
