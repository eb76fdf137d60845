mod config;
mod errors;
mod labeling;
mod llm_client;
mod models;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::labeling::orchestrator::{LabelingOptions, Orchestrator, RunSummary};
use crate::llm_client::{
    BackendKind, CompletionBackend, GenerationParams, LlmClient, LocalProcessClient, RemoteClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting labeler v{}", env!("CARGO_PKG_VERSION"));

    let backend = build_backend(&config)?;
    info!(
        "LLM client initialized ({} backend, model: {})",
        backend.kind().as_str(),
        config.model
    );

    let params = GenerationParams::new(config.model.clone(), config.max_output_tokens);
    let mut options = LabelingOptions::new(&config.input_path, &config.output_path);
    options.max_workers = config.max_workers;
    options.persist_mode = config.persist_mode;
    options.resume = config.resume;
    options.max_retries = config.max_retries;

    let summary = Orchestrator::new(backend, params, options)
        .run()
        .await
        .context("Labeling run aborted")?;

    report(&summary);
    Ok(())
}

fn build_backend(config: &Config) -> Result<Arc<dyn CompletionBackend>> {
    let client = match config.backend {
        BackendKind::Remote => {
            let api_key = config
                .api_key
                .clone()
                .context("OPENAI_API_KEY is required for the remote backend")?;
            LlmClient::Remote(
                RemoteClient::new(config.api_url.clone(), api_key, config.timeout)
                    .context("Failed to build HTTP client")?,
            )
        }
        BackendKind::LocalProcess => LlmClient::LocalProcess(LocalProcessClient::new(
            config.local_command.clone(),
            config.local_args.clone(),
            config.timeout,
        )),
    };
    Ok(Arc::new(client))
}

fn report(summary: &RunSummary) {
    info!(
        "Output: {} | total {} | succeeded {} ({} raw) | failed {} | skipped {} | workers {}",
        summary.output_path.display(),
        summary.total,
        summary.succeeded,
        summary.raw_fallbacks,
        summary.failed,
        summary.skipped,
        summary.workers
    );
    if !summary.failures.is_empty() {
        warn!("{} records could not be labeled:", summary.failures.len());
        for failure in &summary.failures {
            warn!("  {failure}");
        }
    }
}
