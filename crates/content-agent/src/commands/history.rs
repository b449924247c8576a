use std::process::ExitCode;

use anyhow::{Context, Result};
use content_sync_store::SyncHistory;

use super::format::print_runs;

pub fn run(history: &SyncHistory, limit: usize) -> Result<ExitCode> {
    let runs = history
        .recent(limit)
        .context("failed to read sync history")?;

    if runs.is_empty() {
        println!("No sync cycles recorded yet.");
    } else {
        print_runs(&runs);
    }

    Ok(ExitCode::SUCCESS)
}
