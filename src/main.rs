//! # Main Entry Point
//!
//! Runs the relay engine behind a JSON-lines panel bridge:
//! - stdin: one panel request per line
//! - stdout: one response per request, plus `discord-log` push events
//! - stderr and `data/session.log`: tracing output
//!

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use relaybot::application::logging;
use relaybot::application::service::BotService;
use relaybot::domain::config::AppConfig;
use relaybot::domain::paths;
use relaybot::infrastructure::discord::DiscordGateway;
use relaybot::infrastructure::llm::OpenAiClient;
use relaybot::interface::panel;

#[derive(Parser, Debug)]
#[command(version, about = "Discord chat-relay bot engine")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = paths::CONFIG_FILE)]
    config: PathBuf,

    /// Connect on launch with the configured token, whatever the saved state.
    #[arg(long)]
    autostart: bool,
}

fn init_logging(config: &AppConfig) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let dir = Path::new(&config.logging.dir);
    if !dir.exists() {
        fs::create_dir_all(dir).context("Failed to create log directory")?;
    }

    // Clear previous session log
    let log_path = dir.join(&config.logging.file);
    if log_path.exists() {
        let _ = fs::remove_file(&log_path);
    }

    let file_appender = tracing_appender::rolling::never(dir, &config.logging.file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    // stdout belongs to the panel bridge
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load Configuration
    let mut config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        AppConfig::default()
    };
    if config.state_file.is_none() {
        config.state_file = Some(paths::STATE_FILE.to_string());
    }

    // 2. Logging Setup
    let _guard = init_logging(&config)?;
    tracing::info!("Starting relaybot...");
    if !cli.config.exists() {
        tracing::warn!("{} not found, using defaults", cli.config.display());
    }

    // 3. Initialize Infrastructure
    let completion =
        Arc::new(OpenAiClient::new(&config.llm).context("Failed to build LLM client")?);
    let gateway = Arc::new(DiscordGateway::new().context("Failed to build Discord gateway")?);
    let service = Arc::new(BotService::new(&config, gateway, completion));

    // 4. Output: responses and log events share one writer
    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    let events_tx = out_tx.clone();
    let mut log_events = Box::pin(logging::entries(service.subscribe_logs()));
    let forwarder = tokio::spawn(async move {
        while let Some(entry) = log_events.next().await {
            if events_tx.send(panel::event_line(&entry)).await.is_err() {
                break;
            }
        }
    });

    // 5. Resume
    let token = config.discord.resolve_token();
    if cli.autostart {
        match token.as_deref() {
            Some(token) => {
                if let Err(e) = service.start(token).await {
                    tracing::error!("Autostart failed: {}", e);
                }
            }
            None => tracing::warn!("--autostart given but no bot token is configured"),
        }
    } else if config.discord.autostart
        && let Err(e) = service.resume(token.as_deref()).await
    {
        tracing::error!("Resume failed: {}", e);
    }

    // 6. Panel loop
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let response = panel::handle_line(&service, &line).await;
                    if out_tx.send(response).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read panel input: {}", e);
                    break;
                }
            }
        }
    }

    service.shutdown().await;
    forwarder.abort();
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}
