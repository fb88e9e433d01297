//! Plan and execute a book goal.

use std::sync::Arc;

use bookwright_agent::book::book_context;
use bookwright_agent::{Task, TaskOutcome};
use serde_json::Value;

use crate::AppContext;

pub struct BookArgs {
    pub goal: String,
    pub title: String,
    pub topic: String,
    pub tone: String,
    pub structured_outline: bool,
}

pub async fn run(args: BookArgs, json: bool, ctx: &Arc<AppContext>) -> anyhow::Result<()> {
    let mut agent = super::book_agent(ctx, args.structured_outline)?;
    let task = Task::new(
        args.goal,
        book_context(&args.title, &args.topic, &args.tone),
    );

    let outcome = agent.execute(task).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    print_outcome(&outcome, ctx);
    Ok(())
}

fn print_outcome(outcome: &TaskOutcome, ctx: &AppContext) {
    println!("Goal '{}' reached.\n", outcome.goal);

    println!("Steps:");
    for (i, result) in outcome.results.iter().enumerate() {
        println!(
            "  {}. {} ({} ms)",
            i + 1,
            result.action,
            result.elapsed.as_millis()
        );
    }

    match outcome.payload {
        Some(Value::String(ref text)) => println!("\n{}", text),
        Some(ref other) => println!("\n{}", other),
        None => {}
    }

    println!("\nFinal state: {}", outcome.state);

    let stats = ctx.gateway.cache_stats();
    println!(
        "Cache: {} hits, {} misses ({:.0}% hit rate)",
        stats.hits,
        stats.misses,
        stats.hit_rate * 100.0
    );

    let summaries = ctx.monitor.summaries();
    if !summaries.is_empty() {
        println!("\nTimings:");
        for s in summaries {
            println!(
                "  {:<32} n={:<3} mean={:>8.1} ms  p95={:>8.1} ms",
                s.name, s.count, s.mean_ms, s.p95_ms
            );
        }
    }
}
