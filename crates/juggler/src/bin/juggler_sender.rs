//! juggler-sender - deliver one combaine task to juggler.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use common::{CallContext, MultiHostClient, Sender, SenderTask};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use juggler::config::CONFIG_ENV;
use juggler::{CheckCache, Config, JugglerSender, SenderConfig};

/// Reconcile juggler checks for a task and push its events.
#[derive(Parser)]
#[command(name = "juggler-sender")]
#[command(about = "Send combaine aggregation results to juggler")]
#[command(version)]
struct Cli {
    /// Sender config file
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Task file (JSON), `-` for stdin
    #[arg(long, default_value = "-")]
    task: String,

    /// Overrides the sender config deadline
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("juggler=info,common=info,warn"),
        1 => EnvFilter::new("juggler=debug,common=debug,info"),
        _ => EnvFilter::new("trace"),
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn read_task(source: &str) -> Result<SenderTask<Config>> {
    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read task from stdin")?;
        buf
    } else {
        std::fs::read_to_string(Path::new(source))
            .with_context(|| format!("Failed to read task file {source}"))?
    };
    serde_json::from_str(&raw).context("Failed to unpack juggler task")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let sender_config = match &cli.config {
        Some(path) => SenderConfig::load_from_path(path)?,
        None => SenderConfig::load()?,
    };
    let cache = CheckCache::new(sender_config.cache_settings());

    let mut task = read_task(&cli.task)?;
    task.config
        .apply_sender_config(&sender_config)
        .with_context(|| format!("{} Failed to update task config", task.id))?;
    tracing::debug!(task_id = %task.id, config = ?task.config, "Task");

    let timeout = cli
        .timeout_secs
        .map_or_else(|| sender_config.timeout(), Duration::from_secs);
    let sender = JugglerSender::new(task.id.clone(), task.config, MultiHostClient::default(), cache)?;

    let ctx = CallContext::with_timeout(timeout);
    sender
        .send(&ctx, &task.data)
        .await
        .with_context(|| format!("{} Sending error", task.id))?;

    println!("DONE");
    Ok(())
}
