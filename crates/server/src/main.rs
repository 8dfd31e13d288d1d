mod api;
mod auth;
mod router;
mod startup;
mod state;

use std::path::Path;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use depesche_core::config::load_dotenv;
use depesche_core::Config;
use depesche_store::models::{ChannelUpsert, TickStatus, TickTrigger};
use depesche_store::traits::{AccountStore, ChannelStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("serve") => startup::serve(config).await?,
        Some("tick") => {
            let force = args.get(2).map(|s| s.as_str()) == Some("--force");
            let code = tick_once(&config, force).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Some("seed-account") => {
            let label = args.get(2).expect("usage: seed-account <label> <credential-ref>");
            let credential_ref = args.get(3).expect("usage: seed-account <label> <credential-ref>");
            seed_account(&config, label, credential_ref).await?;
        }
        Some("seed-channels") => {
            let path = args.get(2).expect("usage: seed-channels <file.json>");
            seed_channels(&config, Path::new(path)).await?;
        }
        _ => print_usage(),
    }

    Ok(())
}

/// Run a single cycle and report how it went through the exit code:
/// 0 for a completed cycle, 2 when the lock was held elsewhere.
async fn tick_once(config: &Config, force: bool) -> anyhow::Result<i32> {
    config.log_summary();
    let stores = startup::build_stores(config).await?;
    let scheduler = startup::build_scheduler(config, stores).await?;
    let trigger = if force { TickTrigger::Manual } else { TickTrigger::Scheduled };
    let report = scheduler.run_tick(trigger).await?;
    info!(run_id = report.run_id, status = ?report.status, "tick finished");
    Ok(if report.status == TickStatus::Skipped { 2 } else { 0 })
}

async fn seed_account(config: &Config, label: &str, credential_ref: &str) -> anyhow::Result<()> {
    let stores = startup::build_stores(config).await?;
    let account = stores.accounts.upsert(label, credential_ref).await?;
    info!(id = account.id, label = %account.label, "account seeded");
    Ok(())
}

async fn seed_channels(config: &Config, path: &Path) -> anyhow::Result<()> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let entries: Vec<ChannelUpsert> =
        serde_json::from_str(&data).context("invalid channel seed file")?;
    let stores = startup::build_stores(config).await?;
    for entry in entries {
        let channel = stores.channels.upsert(entry).await?;
        info!(id = channel.id, identifier = %channel.identifier, "channel seeded");
    }
    Ok(())
}

fn print_usage() {
    println!("depesche v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: depesche-server <command>");
    println!();
    println!("Commands:");
    println!("  serve                                  Start the API server and scheduler loop");
    println!("  tick [--force]                         Run one cycle now (exit 2 when skipped)");
    println!("  seed-account <label> <credential-ref>  Register a source account");
    println!("  seed-channels <file.json>              Register channels from a JSON file");
}
