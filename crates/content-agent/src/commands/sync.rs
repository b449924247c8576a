use std::process::ExitCode;

use anyhow::{Context, Result};
use content_sync_engine::SyncOrchestrator;

/// Run a single cycle and print the report as JSON on stdout.
pub async fn run(orchestrator: &SyncOrchestrator) -> Result<ExitCode> {
    let report = orchestrator.trigger_sync_now().await;

    let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
    println!("{json}");

    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
