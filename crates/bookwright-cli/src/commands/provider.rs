//! Provider management commands.

use std::sync::Arc;

use bookwright_core::Error;
use bookwright_providers::GenerateOptions;

use crate::{AppContext, ProviderAction};

pub async fn handle(action: ProviderAction, ctx: &Arc<AppContext>) -> anyhow::Result<()> {
    let registry = ctx.gateway.registry();

    match action {
        ProviderAction::List => {
            println!("Configured providers (fallback order first):\n");
            let order: Vec<String> = registry
                .fallback_order()
                .iter()
                .map(|p| p.id().to_string())
                .collect();

            for provider_id in registry.list() {
                let Some(provider) = registry.get(provider_id) else {
                    continue;
                };
                let position = order
                    .iter()
                    .position(|id| id == provider_id)
                    .map(|i| format!(" [#{}]", i + 1))
                    .unwrap_or_default();
                let status = if provider.is_configured() {
                    "configured"
                } else {
                    "not configured"
                };
                println!("  {} - {}{}", provider.name(), status, position);
                println!("    Default model: {}", provider.default_model());

                let models = provider.available_models();
                if !models.is_empty() {
                    println!("    Models:");
                    for model in models.iter().take(3) {
                        println!("      - {} ({})", model.name, model.id);
                    }
                    if models.len() > 3 {
                        println!("      ... and {} more", models.len() - 3);
                    }
                }
                println!();
            }
        }
        ProviderAction::Test { name } => {
            println!("Testing provider: {}\n", name);
            let Some(provider) = registry.get(&name) else {
                println!("  ✗ Provider '{}' not found", name);
                println!("\n  Available providers:");
                for p in registry.list() {
                    println!("    - {}", p);
                }
                return Ok(());
            };
            if !provider.is_configured() {
                println!("  ✗ Provider is not configured");
                return Ok(());
            }
            println!("  ✓ Provider is configured");

            let mut options = GenerateOptions::new()
                .with_provider(&name)
                .with_max_tokens(16)
                .bypass_cache();
            if let Some(ref model) = ctx.options.model {
                options = options.with_model(model);
            }
            let generation = ctx
                .gateway
                .generate_text("Reply with the single word: ok", &options)
                .await
                .map_err(Error::from)?;
            println!("  ✓ {} answered: {}", generation.model, generation.text.trim());
        }
    }
    Ok(())
}
