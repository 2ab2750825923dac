use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "clawsmos")]
#[command(about = "Clawsmos bounty aggregator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one refresh cycle and print its summary.
    Refresh,
    /// Run one refresh cycle and print per-ecosystem stats as JSON.
    Stats,
    /// Serve the HTTP API with periodic refresh.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let started_at = Instant::now();
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clawsmos=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Refresh) {
        Commands::Refresh => {
            let summary = clawsmos_sync::run_refresh_once_from_env().await?;
            println!(
                "refresh complete: run_id={} ecosystems={} bounties={} failed={}",
                summary.run_id,
                summary.sources.len(),
                summary.total_bounties,
                summary.failed_sources().count()
            );
            for source in &summary.sources {
                match &source.error {
                    Some(err) => println!("  {:<16} error: {err}", source.ecosystem),
                    None => println!(
                        "  {:<16} {} bounties ({} ms)",
                        source.ecosystem, source.bounty_count, source.elapsed_ms
                    ),
                }
            }
        }
        Commands::Stats => {
            let summary = clawsmos_sync::run_refresh_once_from_env().await?;
            let rows = clawsmos_core::stats(&summary.snapshot);
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Serve => clawsmos_web::serve_from_env(started_at).await?,
    }

    Ok(())
}
