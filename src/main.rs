//! # quire
//!
//! Command-line front end for the transcript engine.
//!
//! - `replay` feeds recorded session-channel payloads (one JSON object per
//!   line on stdin) through the engine and prints the resulting transcript.
//! - `history` prints one page of a session's REST history.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use quire_api::{HttpChatApi, MockChatApi};
use quire_core::api::{ChatApi, HistoryQuery};
use quire_core::ids::SessionContext;
use quire_settings::QuireSettings;
use quire_stream::{ChatEngine, MemoryTransport, PlaybackConfig};
use quire_telemetry::TelemetryConfig;

/// Payloads buffered per subscriber; a replay publishes its whole input up front.
const REPLAY_BUFFER: usize = 1 << 16;

/// Streaming chat transcript reconstruction.
#[derive(Parser, Debug)]
#[command(name = "quire", about = "Streaming chat transcript reconstruction")]
struct Cli {
    /// Settings file (defaults to `~/.quire/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level, overriding settings.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON log lines on stderr.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay recorded payloads from stdin and print the transcript.
    Replay(ReplayArgs),
    /// Print one page of history.
    History(HistoryArgs),
}

#[derive(Args, Debug)]
struct SessionArgs {
    #[arg(long)]
    space: String,

    #[arg(long)]
    session: String,
}

impl SessionArgs {
    fn context(&self) -> SessionContext {
        SessionContext::new(self.space.as_str(), self.session.as_str())
    }
}

#[derive(Args, Debug)]
struct ReplayArgs {
    #[command(flatten)]
    session: SessionArgs,

    /// Serve history from memory instead of the REST API.
    #[arg(long)]
    offline: bool,

    /// Reveal fragments without pacing delays.
    #[arg(long)]
    instant: bool,

    /// Give up waiting for the queue to drain after this many seconds.
    #[arg(long, default_value = "30")]
    max_wait_secs: u64,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    #[command(flatten)]
    session: SessionArgs,

    /// 1-based page number; page 1 is the newest.
    #[arg(long, default_value = "1")]
    page: u32,
}

fn load_settings(cli: &Cli) -> Result<QuireSettings> {
    let path = cli.settings.clone().unwrap_or_else(quire_settings::settings_path);
    quire_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))
}

fn http_api(settings: &QuireSettings) -> Result<HttpChatApi> {
    HttpChatApi::new(
        settings.api.base_url.clone(),
        settings.api.token.clone(),
        Duration::from_millis(settings.api.timeout_ms),
    )
    .context("failed to build HTTP client")
}

async fn replay(settings: &QuireSettings, args: &ReplayArgs) -> Result<()> {
    let context = args.session.context();
    let api: Arc<dyn ChatApi> = if args.offline {
        Arc::new(MockChatApi::new())
    } else {
        Arc::new(http_api(settings)?)
    };
    let mut config = PlaybackConfig::from(settings);
    if args.instant {
        config.chunk_delay = Duration::ZERO;
    }
    let cycle_interval = config.cycle_interval;

    let transport = Arc::new(MemoryTransport::new(REPLAY_BUFFER));
    let engine = ChatEngine::new(transport.clone(), api, config);
    if let Err(err) = engine.open_session(context.clone()).await {
        tracing::warn!(error = %err, "initial history load failed, continuing with an empty transcript");
    }

    let topic = context.topic();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut published = 0usize;
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        published += transport.publish(&topic, line.to_owned());
    }
    tracing::info!(published, "payloads published");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.max_wait_secs);
    // The normalizer runs on its own task; an empty queue means nothing
    // until it has taken every payload off the channel.
    while (engine.payloads_received() as usize) < published {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(published, received = engine.payloads_received(), "gave up waiting for the normalizer");
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Drive cycles by hand so every reveal has finished before printing.
    loop {
        tokio::time::sleep(cycle_interval).await;
        let report = engine.scheduler().drain_cycle().await;
        if engine.queue().is_empty() && !engine.monitor().is_reloading() {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(pending = engine.queue().len(), ?report, "gave up waiting for the queue to drain");
            break;
        }
    }
    engine.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&engine.snapshot())?);
    Ok(())
}

async fn history(settings: &QuireSettings, args: &HistoryArgs) -> Result<()> {
    let api = http_api(settings)?;
    let query = HistoryQuery::page(args.page, settings.api.history_page_size);
    let page = api
        .history(&args.session.context(), &query)
        .await
        .context("history request failed")?;
    tracing::info!(messages = page.messages.len(), total = page.total, "history page loaded");
    println!("{}", serde_json::to_string_pretty(&page.messages)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    let level = cli.log_level.as_deref().unwrap_or(settings.logging.level.as_str());
    let telemetry = TelemetryConfig::from_level_name(level, cli.json_logs || settings.logging.json);
    quire_telemetry::init_telemetry(&telemetry);

    match &cli.command {
        Command::Replay(args) => replay(&settings, args).await,
        Command::History(args) => history(&settings, args).await,
    }
}
