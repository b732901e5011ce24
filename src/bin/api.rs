use hedge_cycle_orchestrator::{agent::Orchestrator, api::start_server, config::OrchestratorConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = OrchestratorConfig::from_env()?;
    let api_port = config.api_port;

    info!("Trading Cycle Orchestrator - API Server");
    info!("Port: {}", api_port);

    let orchestrator = Arc::new(Orchestrator::from_config(config)?);

    info!("Orchestrator initialized");

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            on_signal.cancel();
        }
    });

    start_server(orchestrator, api_port, shutdown).await?;

    Ok(())
}
