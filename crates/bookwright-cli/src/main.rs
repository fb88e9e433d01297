//! # bookwright-cli
//!
//! Command-line interface for Bookwright.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bookwright_core::error::format_error_with_suggestion;
use bookwright_core::{Config, Error};
use bookwright_metrics::PerformanceMonitor;
use bookwright_providers::{GenerateOptions, ProviderGateway, ProviderRegistry};

mod commands;
mod offline;

/// Application context containing shared state.
pub struct AppContext {
    pub config: Config,
    pub gateway: Arc<ProviderGateway>,
    pub monitor: Arc<PerformanceMonitor>,
    /// Overrides from the command line, applied to every gateway call
    pub options: GenerateOptions,
}

/// Bookwright - goal-driven eBook generator
#[derive(Parser)]
#[command(name = "bookwright")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Model to use (e.g., claude-sonnet-4-20250514, gpt-4o, llama3.2)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Provider to use (anthropic, openai, local); disables fallback
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Config file to load instead of the default locations
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Use a built-in scripted provider instead of real ones
    #[arg(long, global = true)]
    offline: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and run a goal
    Run {
        /// Goal to reach (draft, review)
        #[arg(default_value = "draft")]
        goal: String,
        /// Book title
        #[arg(short, long, default_value = "Untitled")]
        title: String,
        /// What the book is about
        #[arg(long, default_value = "a topic of your choice")]
        topic: String,
        /// Writing tone
        #[arg(long, default_value = "friendly")]
        tone: String,
        /// Generate the outline as typed JSON
        #[arg(long)]
        structured_outline: bool,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the plan for a goal without running it
    Plan {
        /// Goal to plan for
        #[arg(default_value = "draft")]
        goal: String,
    },
    /// Send a single prompt through the gateway
    Generate {
        /// Prompt text
        prompt: String,
        /// Print text as it arrives
        #[arg(long)]
        stream: bool,
        /// System prompt
        #[arg(long)]
        system: Option<String>,
    },
    /// Probe every provider once
    Health,
    /// Provider management
    Provider {
        #[command(subcommand)]
        action: ProviderAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
    /// Diagnose installation issues
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Print the config file location
    Path,
    /// Check the configuration for problems
    Validate,
}

#[derive(Subcommand)]
enum ProviderAction {
    /// List configured providers
    List,
    /// Test provider connection
    Test {
        /// Provider name
        name: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<Error>() {
            Some(error) => eprintln!("{}", format_error_with_suggestion(error)),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Version => {
            println!("bookwright {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Commands::Config { action } => {
            return commands::config::handle(action, &config, cli.config.as_deref());
        }
        _ => {}
    }
    let ctx = build_context(config, &cli)?;

    let result = match cli.command {
        Commands::Run {
            goal,
            title,
            topic,
            tone,
            structured_outline,
            json,
        } => {
            let book = commands::run::BookArgs {
                goal,
                title,
                topic,
                tone,
                structured_outline,
            };
            commands::run::run(book, json, &ctx).await
        }
        Commands::Plan { goal } => commands::plan::run(&goal, &ctx),
        Commands::Generate {
            prompt,
            stream,
            system,
        } => commands::generate::run(&prompt, stream, system, &ctx).await,
        Commands::Health => commands::health::run(&ctx).await,
        Commands::Provider { action } => commands::provider::handle(action, &ctx).await,
        Commands::Doctor => commands::doctor::run(&ctx).await,
        Commands::Version | Commands::Config { .. } => Ok(()),
    };

    ctx.monitor.shutdown();
    result
}

/// An explicit `--config` path must load; the default locations fall back
/// to built-in settings.
fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from(path).map_err(|e| {
            anyhow::Error::from(Error::Config(format!(
                "failed to load {}: {}",
                path.display(),
                e
            )))
        }),
        None => Ok(Config::load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        })),
    }
}

fn build_context(mut config: Config, cli: &Cli) -> anyhow::Result<Arc<AppContext>> {
    let registry = if cli.offline {
        config.gateway.fallback_order = vec![offline::PROVIDER_ID.to_string()];
        offline::registry()
    } else {
        let config = config.clone().ensure_valid()?;
        let mut registry = ProviderRegistry::from_config(&config);
        registry.set_fallback_order(preferred_order(&config).as_slice());
        registry
    };

    if registry.is_empty() {
        return Err(Error::Config(
            "no providers available; set ANTHROPIC_API_KEY or OPENAI_API_KEY, start Ollama, \
             or pass --offline"
                .to_string(),
        )
        .into());
    }

    let monitor = Arc::new(PerformanceMonitor::from_config(&config.metrics));
    let gateway = Arc::new(ProviderGateway::from_config(
        &config,
        Arc::new(registry),
        monitor.clone(),
    ));

    let mut options = GenerateOptions::new();
    if let Some(ref provider) = cli.provider {
        options = options.with_provider(provider);
    }
    match cli.model {
        Some(ref model) => options = options.with_model(model),
        None if !config.general.model.is_empty() => {
            options = options.with_model(&config.general.model)
        }
        None => {}
    }

    Ok(Arc::new(AppContext {
        config,
        gateway,
        monitor,
        options,
    }))
}

/// Fallback order with the configured default provider moved to the front.
fn preferred_order(config: &Config) -> Vec<String> {
    let preferred = &config.general.provider;
    let mut order = vec![preferred.clone()];
    order.extend(
        config
            .gateway
            .fallback_order
            .iter()
            .filter(|id| *id != preferred)
            .cloned(),
    );
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::parse_from([
            "bookwright",
            "--offline",
            "run",
            "review",
            "--title",
            "Ferris",
            "--structured-outline",
        ]);
        assert!(cli.offline);
        match cli.command {
            Commands::Run {
                goal,
                title,
                structured_outline,
                json,
                ..
            } => {
                assert_eq!(goal, "review");
                assert_eq!(title, "Ferris");
                assert!(structured_outline);
                assert!(!json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_preferred_order_moves_default_first() {
        let mut config = Config::default();
        config.general.provider = "local".to_string();
        assert_eq!(preferred_order(&config), vec!["local", "anthropic", "openai"]);
    }

    #[test]
    fn test_offline_context_uses_scripted_provider() {
        let cli = Cli::parse_from(["bookwright", "--offline", "-m", "tiny", "health"]);
        let ctx = build_context(Config::default(), &cli).unwrap();

        assert_eq!(ctx.gateway.registry().list(), vec![offline::PROVIDER_ID]);
        assert_eq!(ctx.options.model.as_deref(), Some("tiny"));
        assert!(ctx.options.provider.is_none());
    }

    #[test]
    fn test_load_config_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bookwright.toml");
        std::fs::write(&path, "[planner]\nmax_plan_length = 4\n").unwrap();

        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.planner.max_plan_length, 4);
    }

    #[test]
    fn test_load_config_rejects_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typo.toml");

        let err = load_config(Some(path.as_path())).unwrap_err();
        let error = err.downcast_ref::<Error>().unwrap();
        assert_eq!(error.code(), "CONFIG_ERROR");
        assert!(err.to_string().contains("typo.toml"));
    }
}
