use anyhow::Result;
use futures_util::stream::{FuturesUnordered, StreamExt};
use log::{error, info, warn};
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use automod::prelude::*;

/// Reads newline-delimited JSON chat messages from stdin and moderates them
/// against a dry-run adapter, logging every action instead of performing it.
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("Starting AutoMod v{}", automod::VERSION);

    let config_dir = env::var("AUTOMOD_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let config = Arc::new(ConfigurationManager::new(&config_dir));

    if let Err(e) = config.initialize().await {
        error!("Failed to initialize configuration from {}: {}", config_dir, e);
        return Err(e);
    }

    let adapter = Arc::new(DryRunConnection::new());
    let automod = Arc::new(AutoModerator::new(config, adapter.clone())?);

    info!("Reading messages from stdin (one JSON object per line, Ctrl+C to stop)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = FuturesUnordered::new();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            Some(result) = tasks.next(), if !tasks.is_empty() => {
                log_task_result(result);
                continue;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested, finishing in-flight messages");
                break;
            }
        };

        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let message: ChatMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Skipping malformed message: {}", e);
                continue;
            }
        };

        adapter.post(&message).await;

        let automod = automod.clone();
        tasks.push(tokio::spawn(async move {
            match automod.handle_message(&message).await {
                Ok(Some(report)) => info!(
                    "{} in #{} by {}: {} -> {:?}",
                    report.violation.rule,
                    message.channel_id,
                    message.author_id,
                    report.violation.details,
                    report.outcome
                ),
                Ok(None) => {}
                Err(e) => error!("Failed to moderate message {}: {}", message.message_id, e),
            }
        }));
    }

    while let Some(result) = tasks.next().await {
        log_task_result(result);
    }

    info!("AutoMod stopped");
    Ok(())
}

fn log_task_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!("Moderation task panicked: {}", e);
    }
}
