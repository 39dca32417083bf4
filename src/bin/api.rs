use std::sync::Arc;
use technician_ledger::{api::start_server, Config, Orchestrator};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    if config.gemini_api_key.is_none() && config.worker_command.is_none() {
        warn!("GEMINI_API_KEY not set; utterances will fail until it is configured");
    }

    info!("Technician Ledger - API Server");
    info!("Port: {}", config.port);

    let orchestrator = Arc::new(Orchestrator::from_config(&config).await?);
    info!("Orchestrator initialized");

    start_server(orchestrator, config.port).await?;

    Ok(())
}
