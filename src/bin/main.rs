use technician_ledger::{
    models::ReportPeriod,
    report::render_stats,
    Config, Orchestrator,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const SESSION: &str = "console";

const HELP: &str = "Type a transaction or question, or one of:
  :edit                           edit the last transaction
  :report [today|monthly|all_time]
  :stats                          today's totals
  :demo                           add sample transactions
  :quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Logs go to stderr so they do not interleave with replies
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    if config.gemini_api_key.is_none() && config.worker_command.is_none() {
        warn!("GEMINI_API_KEY not set; only :report, :stats, :edit and :demo will work");
    }

    let orchestrator = match Orchestrator::from_config(&config).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("Failed to open ledger: {}", e);
            return Err(e.into());
        }
    };
    info!(database = %config.database_url, "Ledger ready");

    println!("Technician Ledger\n{}\n", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut words = line.split_whitespace();
        match words.next() {
            Some(":quit") | Some(":q") => break,
            Some(":help") => println!("{}", HELP),
            Some(":edit") => match orchestrator.begin_edit(SESSION).await {
                Ok(Some(editable)) => {
                    println!("Editing last transaction. Type the corrected entry:\n  {}", editable)
                }
                Ok(None) => println!("No transactions to edit."),
                Err(e) => println!("Error: {}", e),
            },
            Some(":report") => {
                let period = match words.next().unwrap_or_default().parse::<ReportPeriod>() {
                    Ok(period) => period,
                    Err(message) => {
                        println!("{}", message);
                        continue;
                    }
                };
                match orchestrator.report(period).await {
                    Ok(report) => println!("{}", report.render()),
                    Err(e) => println!("Error: {}", e),
                }
            }
            Some(":stats") => match orchestrator.today_stats().await {
                Ok(stats) => println!("{}", render_stats(&stats)),
                Err(e) => println!("Error: {}", e),
            },
            Some(":demo") => match orchestrator.seed_demo_data().await {
                Ok(ids) => println!("Added {} demo transactions.", ids.len()),
                Err(e) => println!("Error: {}", e),
            },
            _ => match orchestrator.submit(SESSION, line).await {
                Ok(reply) => println!("{}", reply.text),
                Err(e) => println!("Error: {}", e),
            },
        }
        println!();
    }

    Ok(())
}
