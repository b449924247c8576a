use std::process::ExitCode;

use anyhow::{Context, Result};
use content_sync_engine::SyncOrchestrator;

use super::format::print_plan;

/// Fetch the catalog and print the reconciliation result without acting.
pub async fn run(orchestrator: &SyncOrchestrator) -> Result<ExitCode> {
    let plan = orchestrator
        .preview()
        .await
        .context("failed to build sync plan")?;

    if plan.is_empty() {
        println!("Local content matches the catalog.");
    } else {
        print_plan(&plan);
    }

    Ok(ExitCode::SUCCESS)
}
