pub mod cli;
pub mod modules;
pub mod shared;

use clap::Parser;
use cli::{Cli, Command};
use futures::StreamExt;
use modules::jobs::{
    application::{TrackerConfig, TrackerContext, TrackerRegistry},
    domain::{JobBackend, JobId, PushSource, StatusVocabulary},
    infrastructure::{DisabledPushSource, HttpJobBackend, WebSocketPushSource},
};
use shared::config::{AppConfig, ENV_API_URL, ENV_PUSH_URL};
use shared::errors::AppResult;
use shared::utils::logger::init_logger;
use std::sync::Arc;

/// Wire the HTTP backend, the push source and a registry from configuration.
pub fn build_registry(config: &AppConfig) -> AppResult<TrackerRegistry> {
    let vocabulary = Arc::new(StatusVocabulary::default());

    let backend: Arc<dyn JobBackend> =
        Arc::new(HttpJobBackend::new(config, Arc::clone(&vocabulary))?);

    let push: Arc<dyn PushSource> = match &config.push_url {
        Some(url) => Arc::new(WebSocketPushSource::new(
            url.clone(),
            config.api_key.clone(),
            config.push_ack_timeout,
            vocabulary,
        )),
        None => {
            log_info!("No push endpoint configured, tracking by polling only");
            Arc::new(DisabledPushSource)
        }
    };

    let tracker_config = TrackerConfig::from_app_config(config)?;
    Ok(TrackerRegistry::new(TrackerContext::new(
        backend,
        push,
        tracker_config,
    )))
}

fn load_config(cli: &Cli) -> AppResult<AppConfig> {
    dotenvy::dotenv().ok();

    let mut config = AppConfig::from_lookup(|key| match key {
        ENV_API_URL if cli.url.is_some() => cli.url.clone(),
        ENV_PUSH_URL if cli.push_url.is_some() => cli.push_url.clone(),
        _ => std::env::var(key).ok(),
    })?;

    if cli.no_push {
        config.push_url = None;
    }
    Ok(config)
}

/// Entry point of the `jobwatch` binary
pub async fn run() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let registry = build_registry(&config)?;

    match cli.command {
        Command::Track { kind, job_ids } => {
            let mut ids = Vec::with_capacity(job_ids.len());
            for raw in job_ids {
                ids.push(JobId::new(raw)?);
            }
            let subscriptions = ids
                .into_iter()
                .map(|id| registry.watch(id, kind).into_stream().boxed());
            follow(&registry, futures::stream::select_all(subscriptions)).await?;
        }
        Command::Start { kind, params } => {
            let params: serde_json::Value = serde_json::from_str(&params)?;
            let tracker = registry.start_and_track(kind, params).await?;
            log_info!("Submitted job {}", tracker.id());
            follow(&registry, tracker.subscribe().into_stream().boxed()).await?;
        }
        Command::Status { job_id } => {
            let job_id = JobId::new(job_id)?;
            let snapshot = registry.context().backend.fetch_snapshot(&job_id).await?;
            println!("{}", serde_json::to_string(&snapshot)?);
        }
        Command::Cancel { job_id } => {
            let job_id = JobId::new(job_id)?;
            registry.context().backend.request_cancellation(&job_id).await?;
            log_info!("Cancellation requested for job {}", job_id);
        }
    }

    Ok(())
}

/// Print updates as JSON lines until every stream ends. Ctrl-C stops
/// tracking; the cancelled updates still get printed.
async fn follow<S>(registry: &TrackerRegistry, mut updates: S) -> anyhow::Result<()>
where
    S: futures::Stream<Item = modules::jobs::domain::JobUpdate> + Unpin,
{
    let mut interrupted = false;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal?;
                interrupted = true;
                let cancelled = registry.cancel_all();
                log_warn!("Interrupted, stopped tracking {} jobs", cancelled);
            }
            update = updates.next() => match update {
                Some(update) => println!("{}", serde_json::to_string(&update)?),
                None => break,
            },
        }
    }

    Ok(())
}
