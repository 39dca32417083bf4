//! Worker process: one request on stdin, one `{intent, payload}` envelope on stdout.
//!
//! Anything on stderr is a protocol failure for the caller, so logging is
//! off unless LEDGER_WORKER_LOG is set.

use std::sync::Arc;
use technician_ledger::{
    gemini::GeminiClient,
    worker::{CommandWorker, LocalWorker, WorkerRequest},
    Command, Config, LedgerError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

async fn handle(raw: &str) -> Result<Command, LedgerError> {
    let request = WorkerRequest::from_json(raw)?;

    let mut config = Config::from_env()?;
    if let Some(credential) = request.credential.clone() {
        config.gemini_api_key = Some(credential);
    }

    let model = GeminiClient::from_config(&config)?;
    LocalWorker::new(Arc::new(model)).process(&request).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    if std::env::var_os("LEDGER_WORKER_LOG").is_some() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
            .with_writer(std::io::stderr)
            .init();
    }

    let mut raw = String::new();
    tokio::io::stdin().read_to_string(&mut raw).await?;

    let command = handle(&raw)
        .await
        .unwrap_or_else(|e| Command::from_failure(&e));

    let mut stdout = tokio::io::stdout();
    stdout.write_all(command.to_json().as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;

    Ok(())
}
