mod code_host;
mod error;
mod logging;
mod routes;
mod worker;

use std::sync::Arc;

use patchwright_agent::{AnthropicClient, ClaudeBackend};
use patchwright_core::{
    agent::{EventSink, FanoutSink, LogSink},
    config::Config,
    pipeline::Pipeline,
    proposal::ProposalSynthesizer,
    stream::TaskStreamManager,
};
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::{
    code_host::AutomaClient,
    logging::BroadcastLayer,
    routes::{AppState, TaskJob},
    worker::run_workers,
};

const DEFAULT_LOG_FILTER: &str =
    "patchwright_server=info,patchwright_core=info,patchwright_agent=info,tower_http=info";

// ── main ──────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (log_tx, _log_rx) = broadcast::channel::<String>(256);
    let broadcast_layer = BroadcastLayer::new(log_tx.clone());
    let log_ring = broadcast_layer.ring.clone();

    let fmt_layer = if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(fmt_layer)
        .with(broadcast_layer)
        .init();

    let config = Config::from_env()?;
    std::fs::create_dir_all(&config.data_dir)?;

    let automa = Arc::new(AutomaClient::new(&config.data_dir)?);
    let streams = TaskStreamManager::new();
    let sinks: Vec<Arc<dyn EventSink>> = vec![
        Arc::new(LogSink) as Arc<dyn EventSink>,
        streams.clone() as Arc<dyn EventSink>,
        automa.clone() as Arc<dyn EventSink>,
    ];
    let sink: Arc<dyn EventSink> = Arc::new(FanoutSink(sinks));

    let completion = AnthropicClient::new(
        &config.anthropic_api_key,
        &config.anthropic_base_url,
        config.completion_timeout(),
    )?;
    let pipeline = Pipeline::new(
        automa,
        Arc::new(ClaudeBackend::new(&config.claude_bin).with_model(&config.agent_model)),
        ProposalSynthesizer::new(Arc::new(completion), &config.anthropic_model),
    )
    .with_sink(sink)
    .with_agent_timeout(config.agent_timeout());
    let pipeline = Arc::new(pipeline);

    let (jobs_tx, jobs_rx) = mpsc::unbounded_channel::<TaskJob>();
    tokio::spawn(run_workers(
        Arc::clone(&pipeline),
        jobs_rx,
        config.max_concurrent_tasks,
    ));

    let state = Arc::new(AppState {
        webhook_secret: config.webhook_secret.clone(),
        jobs: jobs_tx,
        streams,
        log_tx,
        log_ring,
    });
    let app = routes::router(state);

    let addr = config.listen_addr();
    info!(
        model = %config.anthropic_model,
        max_concurrent_tasks = config.max_concurrent_tasks,
        agent_timeout_s = config.agent_timeout_s,
        "Listening on {addr}"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
