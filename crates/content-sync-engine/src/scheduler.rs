use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

use crate::orchestrator::SyncOrchestrator;

const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Run the bootstrap fetch, then a sync cycle every `period` until
/// `shutdown` resolves.
///
/// A cycle that is already running when shutdown fires is allowed to finish.
/// Ticks missed while a long cycle runs are delayed rather than replayed.
pub async fn run_periodic<F>(orchestrator: Arc<SyncOrchestrator>, period: Duration, shutdown: F)
where
    F: Future<Output = ()>,
{
    let period = period.max(MIN_PERIOD);
    tokio::pin!(shutdown);

    let bootstrapped = orchestrator.bootstrap().await.is_some();

    // Content already on disk means nothing has synced yet this run.
    let first_tick = if bootstrapped {
        Instant::now() + period
    } else {
        Instant::now()
    };
    let mut ticker = tokio::time::interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(period_secs = period.as_secs(), "periodic sync started");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                orchestrator.trigger_sync_now().await;
            }
        }
    }

    info!("periodic sync stopped");
}
