use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use bookforge::anthropic::AnthropicClient;
use bookforge::cli::{Cli, Command};
use bookforge::collaborators::{
    AnthropicGenerator, Collaborators, HttpPersistence, HttpRetrieval, HttpStandards,
    MemoryPersistence, NullRetrieval, NullStandards, PersistenceApi, RetrievalService,
    StandardsLookup,
};
use bookforge::config::BookforgeConfig;
use bookforge::model::{JobSpec, JobStatus};
use bookforge::ui::JobProgress;
use bookforge::{CancellationToken, JobOrchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = BookforgeConfig::load(cli.config.as_deref())?;
    if let Some(max) = cli.max_revisions {
        config.pipeline.max_revisions = max;
        config.validate()?;
    }

    match cli.command {
        Command::Run { spec, output } => run(&config, &spec, output.as_deref()).await,
        Command::Validate { file } => validate(&file),
        Command::Status { job_id } => status(&config, &job_id).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "bookforge=debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(config: &BookforgeConfig, spec_path: &Path, output: Option<&Path>) -> Result<()> {
    let spec = JobSpec::from_path(spec_path)
        .with_context(|| format!("failed to read job spec {}", spec_path.display()))?;
    let collaborators = build_collaborators(config)?;

    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current step");
            on_interrupt.cancel();
        }
    });

    let progress = Arc::new(JobProgress::start(&spec.title));
    let orchestrator = JobOrchestrator::from_config(collaborators, config)
        .with_cancellation(token)
        .with_observer(progress.clone());

    let result = orchestrator.run_job(spec).await;
    progress.complete(&result);
    progress.print_scores(&result.scores);

    let json = serde_json::to_string_pretty(&result)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "job result written");
        }
        None => println!("{json}"),
    }

    if result.status != JobStatus::Completed {
        bail!("job {} ended {}", result.job_id, result.status);
    }
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    let spec = JobSpec::from_path(path)
        .with_context(|| format!("failed to read job spec {}", path.display()))?;
    spec.validate()?;
    println!(
        "✓ {}: \"{}\" for {}, up to {} chapters",
        path.display(),
        spec.title,
        spec.audience,
        spec.chapter_count
    );
    Ok(())
}

async fn status(config: &BookforgeConfig, job_id: &str) -> Result<()> {
    let Some(url) = config.services.persistence_url.as_deref() else {
        bail!("services.persistence_url is not configured");
    };
    let persistence = HttpPersistence::new(url, config.call_timeout());
    let persistence = &persistence;
    let record = config
        .retry_policy()
        .invoke("persistence.get_job", move || persistence.get_job(job_id))
        .await?;

    match record {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => bail!("job {job_id} not found"),
    }
    Ok(())
}

// A service without a configured URL falls back to its null collaborator.
fn build_collaborators(config: &BookforgeConfig) -> Result<Collaborators> {
    if config.api_key.is_empty() {
        bail!("no API key: set ANTHROPIC_API_KEY or api_key in bookforge.toml");
    }
    let timeout = config.call_timeout();
    let client = AnthropicClient::new(config.api_key.clone(), timeout);
    let services = &config.services;

    let retrieval: Arc<dyn RetrievalService> = match &services.retrieval_url {
        Some(url) => Arc::new(HttpRetrieval::new(url.as_str(), timeout)),
        None => Arc::new(NullRetrieval),
    };
    let standards: Arc<dyn StandardsLookup> = match &services.standards_url {
        Some(url) => Arc::new(HttpStandards::new(url.as_str(), timeout)),
        None => Arc::new(NullStandards),
    };
    let persistence: Arc<dyn PersistenceApi> = match &services.persistence_url {
        Some(url) => Arc::new(HttpPersistence::new(url.as_str(), timeout)),
        None => Arc::new(MemoryPersistence::default()),
    };

    Ok(Collaborators {
        generator: Arc::new(AnthropicGenerator::new(client, config.model.clone())),
        retrieval,
        standards,
        persistence,
    })
}
