use std::process::ExitCode;

use anyhow::{Context, Result};
use content_sync_engine::SyncOrchestrator;

pub fn run(orchestrator: &SyncOrchestrator) -> Result<ExitCode> {
    let status = orchestrator.status();
    let json = serde_json::to_string_pretty(&status).context("failed to serialize status")?;
    println!("{json}");
    Ok(ExitCode::SUCCESS)
}
