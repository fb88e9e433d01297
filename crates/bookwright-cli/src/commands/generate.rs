//! One-off prompts through the gateway.

use std::io::Write;
use std::sync::Arc;

use bookwright_core::Error;
use bookwright_providers::StreamEvent;
use futures::StreamExt;
use tracing::{info, warn};

use crate::AppContext;

pub async fn run(
    prompt: &str,
    stream: bool,
    system: Option<String>,
    ctx: &Arc<AppContext>,
) -> anyhow::Result<()> {
    let mut options = ctx.options.clone();
    if let Some(system) = system {
        options = options.with_system(system);
    }

    if !stream {
        let generation = ctx
            .gateway
            .generate_text(prompt, &options)
            .await
            .map_err(Error::from)?;
        for attempt in &generation.failed_attempts {
            warn!(provider = %attempt.provider, error = %attempt.error, "Provider skipped");
        }
        info!(
            provider = %generation.provider,
            model = %generation.model,
            cached = generation.cached,
            "Generated"
        );
        println!("{}", generation.text);
        return Ok(());
    }

    let mut events = ctx
        .gateway
        .stream_text(prompt, &options)
        .await
        .map_err(Error::from)?;
    let mut stdout = std::io::stdout();

    while let Some(event) = events.next().await {
        match event.map_err(Error::from)? {
            StreamEvent::Delta(text) => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
            StreamEvent::Done { usage, characters } => {
                println!();
                info!(
                    characters,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "Stream finished"
                );
            }
        }
    }
    Ok(())
}
