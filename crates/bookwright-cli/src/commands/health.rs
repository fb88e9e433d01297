//! Provider health probes.

use std::sync::Arc;

use crate::AppContext;

pub async fn run(ctx: &Arc<AppContext>) -> anyhow::Result<()> {
    println!("Checking providers...\n");

    let report = ctx.gateway.health_check().await;
    for health in &report {
        let model = health.model.as_deref().unwrap_or("-");
        if health.healthy {
            println!(
                "  ✓ {} ({}) {} ms",
                health.provider, model, health.latency_ms
            );
        } else {
            println!(
                "  ✗ {} ({}) {}",
                health.provider,
                model,
                health.error.as_deref().unwrap_or("unhealthy")
            );
        }
    }

    let healthy = report.iter().filter(|h| h.healthy).count();
    println!("\n{}/{} providers healthy.", healthy, report.len());
    if healthy == 0 {
        anyhow::bail!("no healthy providers");
    }
    Ok(())
}
