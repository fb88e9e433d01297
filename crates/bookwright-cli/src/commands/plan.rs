//! Show a plan without running it.

use std::sync::Arc;

use crate::AppContext;

pub fn run(goal: &str, ctx: &Arc<AppContext>) -> anyhow::Result<()> {
    let agent = super::book_agent(ctx, false)?;
    let plan = agent.plan(goal)?;

    if plan.is_empty() {
        println!("Goal '{}' is already satisfied.", goal);
        return Ok(());
    }

    println!("Plan for '{}':\n", goal);
    for (i, action) in plan.actions.iter().enumerate() {
        println!("  {}. {} (cost {})", i + 1, action.name, action.cost);
    }
    println!(
        "\nEstimated cost: {}  Estimated duration: {}s",
        plan.estimated_cost,
        plan.estimated_duration.as_secs()
    );
    Ok(())
}
