//! BiteBase backend binary.
//!
//! Wires settings, the MCP connection manager, the analysis pipeline, and
//! the HTTP/WebSocket server together, then runs until ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bitebase_mcp::McpManager;
use bitebase_server::AppState;
use bitebase_settings::{Settings, load_settings, load_settings_from_path};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "bitebase", version, about = "BiteBase market-research backend")]
struct Cli {
    /// Settings file (default: ~/.bitebase/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the HTTP listen port.
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Override the tracing filter (e.g. `info,bitebase_mcp=debug`).
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the backend (default).
    Serve,
    /// Validate configuration and print the effective settings.
    CheckConfig,
}

fn load(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => load_settings().context("loading settings")?,
    };
    if let Some(port) = cli.port {
        settings.server.http_port = port;
    }
    if let Some(filter) = &cli.log_filter {
        settings.logging.filter = filter.clone();
    }
    Ok(settings)
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.logging.filter.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Command::Serve => serve(settings).await,
    }
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    init_tracing(&settings);
    bitebase_settings::init_settings(settings.clone());

    let metrics = bitebase_server::metrics::install_recorder();

    let manager = McpManager::new(settings.mcp.clone());
    manager.connect_all().await;
    let health_loop = manager.spawn_health_loop();

    let addr = format!("{}:{}", settings.server.bind_addr, settings.server.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let state = AppState::new(Arc::new(settings), manager.clone()).with_metrics(metrics);
    state.spawn_session_purge(chrono::Duration::hours(24));

    info!(%addr, "bitebase backend starting");
    bitebase_server::serve(state.clone(), listener, shutdown_signal())
        .await
        .context("http server")?;

    info!("shutting down");
    for session in state.store.list() {
        if !session.status.is_terminal() {
            let _ = state.store.cancel(&session.id);
        }
    }
    health_loop.abort();
    manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
