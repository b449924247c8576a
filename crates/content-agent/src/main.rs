mod commands;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use content_sync::{ContentLayout, Progress};
use content_sync_engine::SyncOrchestrator;
use content_sync_http::{
    CatalogClientConfig, HttpCatalogClient, HttpConnectivityProbe, ResumableDownloader,
};
use content_sync_store::SyncHistory;
use tracing_subscriber::EnvFilter;

use crate::config::AgentConfig;

#[derive(Parser)]
#[command(name = "content-agent")]
#[command(about = "Keep a device's media directory in sync with its remote catalog")]
struct Cli {
    /// Config file (defaults to ~/.config/content-agent/agent.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Write logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync once at startup if needed, then periodically until interrupted
    Run,
    /// Run one sync cycle and print its report as JSON
    Sync,
    /// Print the current sync status as JSON
    Status,
    /// Show recently recorded sync cycles
    History {
        /// Number of cycles to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Remove every partial download
    Cleanup,
    /// Check connectivity; exits non-zero when offline
    Online,
    /// Show what a sync would fetch and delete without doing it
    Plan,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_probe(config: &AgentConfig) -> Result<Arc<HttpConnectivityProbe>> {
    let probe = HttpConnectivityProbe::new(
        config.connectivity.endpoints.clone(),
        config.connectivity.timeout(),
    )?;
    Ok(Arc::new(probe))
}

fn build_history(config: &AgentConfig) -> Result<SyncHistory> {
    let path = config
        .history_path()
        .context("could not determine data directory for the sync history")?;
    SyncHistory::open(&path)
        .with_context(|| format!("failed to open sync history at {}", path.display()))
}

fn build_orchestrator(config: &AgentConfig) -> Result<SyncOrchestrator> {
    let manifest_url = config
        .manifest_url
        .clone()
        .context("manifest_url is not configured")?;
    let content_dir = config
        .content_dir()
        .context("could not determine data directory for content")?;
    let layout = ContentLayout::new(content_dir, config.extension.as_str());

    let probe = build_probe(config)?;

    let catalog = HttpCatalogClient::new(
        CatalogClientConfig {
            manifest_url,
            issue_url: config.issue_url.clone(),
            device_id: config.device_id.clone(),
            extension: layout.extension().to_owned(),
            timeout: config.catalog_timeout(),
        },
        probe.clone(),
    );

    let downloader = ResumableDownloader::new(
        layout.clone(),
        probe.clone(),
        config.download.downloader_config(),
    )?
    .with_progress(Arc::new(|filename: &str, progress: Progress| {
        tracing::debug!(%filename, %progress, "download progress");
    }));

    let history = match build_history(config) {
        Ok(history) => Some(history),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "sync history disabled");
            None
        }
    };

    Ok(SyncOrchestrator::new(
        probe,
        Arc::new(catalog),
        Arc::new(downloader),
        layout,
        history,
    ))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = config::load_config(cli.config.as_deref());

    match cli.command {
        Command::Run => {
            let orchestrator = Arc::new(build_orchestrator(&config)?);
            commands::run::run(orchestrator, config.sync_interval()).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Sync => commands::sync::run(&build_orchestrator(&config)?).await,
        Command::Status => commands::status::run(&build_orchestrator(&config)?),
        Command::History { limit } => commands::history::run(&build_history(&config)?, limit),
        Command::Cleanup => {
            let removed = build_orchestrator(&config)?.cleanup_partial_downloads();
            println!("Removed {removed} partial download(s).");
            Ok(ExitCode::SUCCESS)
        }
        Command::Online => commands::online::run(&*build_probe(&config)?).await,
        Command::Plan => commands::plan::run(&build_orchestrator(&config)?).await,
    }
}
