//! Diagnostic command to check installation.

use std::sync::Arc;

use bookwright_core::Config;
use bookwright_providers::LocalProvider;

use crate::AppContext;

pub async fn run(ctx: &Arc<AppContext>) -> anyhow::Result<()> {
    println!("Running diagnostics...\n");

    let config_dir = Config::config_dir();
    println!("Config directory: {:?}", config_dir);
    if config_dir.join("config.toml").exists() {
        println!("  ✓ config.toml found");
    } else {
        println!("  ✗ No config.toml (defaults in use)");
    }

    let validation = ctx.config.validate();
    for issue in validation.errors() {
        println!("  ✗ {}: {}", issue.field, issue.message);
    }
    for issue in validation.warnings() {
        println!("  ! {}: {}", issue.field, issue.message);
    }

    println!("\nProviders:");
    let registry = ctx.gateway.registry();
    if registry.is_empty() {
        println!("  ✗ No providers configured");
    } else {
        for provider in registry.fallback_order() {
            let status = if provider.is_configured() {
                "✓ configured"
            } else {
                "✗ not configured"
            };
            println!("  {} {} ({})", status, provider.name(), provider.id());
        }
    }

    println!("\nAPI Keys:");
    for var in ["ANTHROPIC_API_KEY", "OPENAI_API_KEY"] {
        if std::env::var(var).is_ok() {
            println!("  ✓ {} is set", var);
        } else {
            println!("  ✗ {} is not set", var);
        }
    }

    println!("\nLocal Models (Ollama):");
    let ollama = ctx
        .config
        .providers
        .local
        .as_ref()
        .and_then(|local| local.base_url.clone())
        .map(LocalProvider::with_url)
        .unwrap_or_default();
    if ollama.is_running().await {
        println!("  ✓ Ollama is running");
        match ollama.list_models().await {
            Ok(models) if models.is_empty() => println!("  ✗ No models installed"),
            Ok(models) => {
                println!("  Available models:");
                for model in models.iter().take(5) {
                    println!("    - {} ({} MB)", model.name, model.size / 1024 / 1024);
                }
                if models.len() > 5 {
                    println!("    ... and {} more", models.len() - 5);
                }
            }
            Err(e) => println!("  ✗ Failed to list models: {}", e),
        }
    } else {
        println!("  ✗ Ollama is not running");
        println!("    Install from: https://ollama.ai");
    }

    let stats = ctx.gateway.cache_stats();
    println!("\nResponse cache: capacity {}", stats.capacity);

    println!("\nDiagnostics complete.");
    Ok(())
}
