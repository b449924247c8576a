use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use content_sync_engine::{SyncOrchestrator, run_periodic};

/// Sync periodically until Ctrl-C. A cycle in progress is allowed to finish.
pub async fn run(orchestrator: Arc<SyncOrchestrator>, period: Duration) -> Result<()> {
    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("interrupt received, shutting down"),
            Err(e) => {
                tracing::warn!(error = %e, "could not listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    };

    run_periodic(orchestrator, period, shutdown).await;
    Ok(())
}
