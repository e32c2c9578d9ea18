//! Triage runner: classify one note and fan it out to the deployed handlers.
//!
//! ```bash
//! triage-agents "Standup moved to 10am" --origin work/inbox
//! echo "Slept badly again, third night in a row" | triage-agents --config triage.toml
//! ```

mod agents;
mod config;

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use triage_coordination::classifier::ChatClassificationService;
use triage_coordination::synthesis::ChatSynthesisService;
use triage_coordination::{Handler, HandlerRegistry, JsonlRecorder, TriagePipeline};

use crate::agents::{HttpHandler, LocalHandler};
use crate::config::DeploymentConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Note text (read from stdin when omitted)
    text: Option<String>,

    /// Origin hint such as a folder path or inbox name
    #[arg(long)]
    origin: Option<String>,

    /// Deployment file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Append the routing decision to this JSONL file
    #[arg(long)]
    record: Option<PathBuf>,

    /// Print only the synthesis report instead of the full outcome
    #[arg(long, default_value_t = false)]
    summary_only: bool,
}

fn build_registry(deployment: &DeploymentConfig) -> Result<Arc<HandlerRegistry>> {
    let mut builder = HandlerRegistry::builder();
    for entry in deployment.handler_deployments() {
        let handler: Arc<dyn Handler> = match entry.url {
            Some(ref url) => Arc::new(HttpHandler::new(entry.kind, url, entry.api_key.clone())?),
            None => Arc::new(LocalHandler::new(entry.kind)),
        };
        builder = builder
            .register(entry.profile(), handler)
            .with_context(|| format!("Failed to register handler {}", entry.kind))?;
    }
    Ok(builder.build().shared())
}

fn read_input(text: Option<String>) -> Result<String> {
    match text {
        Some(text) => Ok(text),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read note from stdin")?;
            Ok(buf)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the JSON outcome.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let deployment = match args.config {
        Some(ref path) => DeploymentConfig::load(path)?,
        None => DeploymentConfig::from_env(),
    };
    let text = read_input(args.text)?;

    let registry = build_registry(&deployment)?;
    info!(handlers = registry.len(), "Handler registry ready");

    let mut builder = TriagePipeline::builder(deployment.triage.clone(), registry);
    if let Some(endpoint) = deployment.model_endpoint() {
        info!(model = %endpoint.model, url = %endpoint.url, "Using model services");
        let classification = ChatClassificationService::new(
            endpoint.clone(),
            deployment.triage.classifier.model_timeout(),
        )?;
        let synthesis =
            ChatSynthesisService::new(endpoint, deployment.triage.execution.synthesis_timeout())?;
        builder = builder
            .classification_service(Arc::new(classification))
            .synthesis_service(Arc::new(synthesis));
    } else {
        info!("No model endpoint configured; rule-based classification and templated synthesis");
    }
    if let Some(path) = args.record.or(deployment.record_path) {
        builder = builder.recorder(Arc::new(JsonlRecorder::new(path)));
    }

    let pipeline = builder.build().context("Invalid triage configuration")?;
    let outcome = pipeline.process(&text, args.origin.as_deref()).await?;

    let rendered = if args.summary_only {
        serde_json::to_string_pretty(&outcome.synthesis)?
    } else {
        serde_json::to_string_pretty(&outcome)?
    };
    println!("{rendered}");
    Ok(())
}
