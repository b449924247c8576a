use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use content_sync::{
    CatalogSource, ConnectivityProbe, ContentFetcher, ContentLayout, CycleTally, SkipReason,
    SyncError, SyncPhase, SyncPlan, SyncReport, SyncStats, SyncStatus, scan,
};
use content_sync_store::SyncHistory;
use futures::FutureExt;
use tracing::{error, info, warn};

/// Rows kept in the history journal.
const HISTORY_RETENTION: usize = 1000;

#[derive(Debug)]
struct CycleState {
    phase: SyncPhase,
    last_sync: Option<DateTime<Utc>>,
    last_successful_sync: Option<DateTime<Utc>>,
    last_report: Option<SyncReport>,
    stats: SyncStats,
}

/// Drives sync cycles: connectivity check, reconciliation, downloads,
/// deletions and reporting.
///
/// At most one cycle runs at a time. A trigger that arrives while a cycle is
/// in flight returns a skipped report straight away instead of queuing.
pub struct SyncOrchestrator {
    probe: Arc<dyn ConnectivityProbe>,
    catalog: Arc<dyn CatalogSource>,
    fetcher: Arc<dyn ContentFetcher>,
    layout: ContentLayout,
    history: Option<SyncHistory>,
    syncing: AtomicBool,
    state: Mutex<CycleState>,
}

/// Holds the single-flight flag. Dropping it releases the flag and returns
/// the phase to `Idle`, including when the cycle unwinds.
struct FlightGuard<'a> {
    orchestrator: &'a SyncOrchestrator,
}

impl<'a> FlightGuard<'a> {
    fn acquire(orchestrator: &'a SyncOrchestrator) -> Option<Self> {
        orchestrator
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { orchestrator })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.state().phase = SyncPhase::Idle;
        self.orchestrator.syncing.store(false, Ordering::Release);
    }
}

impl SyncOrchestrator {
    /// Build an orchestrator. When a history journal is supplied, the
    /// last-sync timestamps and cumulative counters are restored from it.
    pub fn new(
        probe: Arc<dyn ConnectivityProbe>,
        catalog: Arc<dyn CatalogSource>,
        fetcher: Arc<dyn ContentFetcher>,
        layout: ContentLayout,
        history: Option<SyncHistory>,
    ) -> Self {
        let mut state = CycleState {
            phase: SyncPhase::Idle,
            last_sync: None,
            last_successful_sync: None,
            last_report: None,
            stats: SyncStats::default(),
        };

        if let Some(history) = &history {
            restore(&mut state, history);
        }

        Self {
            probe,
            catalog,
            fetcher,
            layout,
            history,
            syncing: AtomicBool::new(false),
            state: Mutex::new(state),
        }
    }

    pub fn layout(&self) -> &ContentLayout {
        &self.layout
    }

    pub fn history(&self) -> Option<&SyncHistory> {
        self.history.as_ref()
    }

    fn state(&self) -> MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.state().phase = phase;
    }

    pub fn phase(&self) -> SyncPhase {
        self.state().phase
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub async fn is_online(&self) -> bool {
        self.probe.is_online().await
    }

    /// Run one cycle now, or report that one is already running.
    ///
    /// Never fails: every path, a panic inside the cycle included, ends in a
    /// [`SyncReport`].
    pub async fn trigger_sync_now(&self) -> SyncReport {
        let started_at = Utc::now();

        let Some(_guard) = FlightGuard::acquire(self) else {
            info!("sync already in progress, skipping trigger");
            return SyncReport::skipped(SkipReason::AlreadySyncing, false, started_at);
        };

        info!("sync cycle starting");

        let report = match AssertUnwindSafe(self.run_cycle(started_at))
            .catch_unwind()
            .await
        {
            Ok(report) => report,
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(panic = %detail, "sync cycle panicked");
                SyncReport::errored(format!("Sync failed: {detail}"), started_at)
            }
        };

        self.record(&report);

        info!(
            success = report.success,
            skipped = report.skipped,
            downloaded = report.downloaded,
            failed = report.failed,
            paused = report.paused,
            deleted = report.deleted,
            "{}",
            report.message
        );

        report
    }

    async fn run_cycle(&self, started_at: DateTime<Utc>) -> SyncReport {
        self.set_phase(SyncPhase::Checking);

        if !self.probe.is_online().await {
            info!("no internet connection, skipping sync");
            return SyncReport::skipped(SkipReason::NoInternet, false, started_at);
        }

        if let Err(e) = self.layout.ensure_dir() {
            error!(error = %e, "content directory unavailable");
            return SyncReport::errored(format!("Sync failed: {e}"), started_at);
        }

        let catalog = match self.catalog.fetch_catalog().await {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "catalog unavailable, skipping sync");
                return SyncReport::skipped(SkipReason::CatalogUnavailable, true, started_at);
            }
        };

        let local = match scan(&self.layout) {
            Ok(local) => local,
            Err(e) => {
                error!(error = %e, "failed to scan content directory");
                return SyncReport::errored(format!("Sync failed: {e}"), started_at);
            }
        };

        let plan = content_sync::plan(&catalog, &local);
        info!(
            catalog = catalog.len(),
            local = local.len(),
            to_fetch = plan.to_fetch.len(),
            to_delete = plan.to_delete.len(),
            "reconciled catalog against local content"
        );

        let mut tally = CycleTally::new();

        self.set_phase(SyncPhase::Fetching);
        for entry in &plan.to_fetch {
            let outcome = self.fetcher.fetch(entry).await;

            if outcome.needs_upstream_report() {
                let message = outcome
                    .error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                self.catalog
                    .report_issue(&entry.filename, &message, &entry.source)
                    .await;
            }

            if !outcome.success {
                warn!(
                    filename = %outcome.filename,
                    resumable = outcome.resumable,
                    error = ?outcome.error,
                    "download did not complete"
                );
            }

            tally.record_download(&outcome);
        }

        self.set_phase(SyncPhase::Deleting);
        for record in &plan.to_delete {
            match self.layout.remove_artifacts(&record.filename) {
                Ok(removed) => {
                    info!(filename = %record.filename, removed, "removed content no longer in catalog");
                    tally.record_deletion(true);
                }
                Err(e) => {
                    warn!(filename = %record.filename, error = %e, "failed to remove content");
                    tally.record_deletion(false);
                }
            }
        }

        self.set_phase(SyncPhase::Reporting);
        tally.finish(started_at)
    }

    fn record(&self, report: &SyncReport) {
        {
            let mut state = self.state();
            state.stats.absorb(report);
            if !report.skipped {
                state.last_sync = Some(report.finished_at);
                if report.success {
                    state.last_successful_sync = Some(report.finished_at);
                }
            }
            state.last_report = Some(report.clone());
        }

        let Some(history) = &self.history else {
            return;
        };
        if let Err(e) = history.record(report) {
            warn!(error = %e, "failed to write sync history");
            return;
        }
        if let Err(e) = history.prune(HISTORY_RETENTION) {
            warn!(error = %e, "failed to prune sync history");
        }
    }

    /// Run the first full fetch when the inventory has zero entries.
    ///
    /// Returns `None` when the content directory holds anything, complete
    /// files or partial downloads. Partials are picked up by the next
    /// regular cycle instead.
    pub async fn bootstrap(&self) -> Option<SyncReport> {
        match scan(&self.layout) {
            Ok(local) if !local.is_empty() => None,
            Ok(_) => {
                info!(dir = %self.layout.dir().display(), "no local content, running initial sync");
                Some(self.trigger_sync_now().await)
            }
            Err(e) => {
                warn!(error = %e, "could not inspect content directory, running initial sync");
                Some(self.trigger_sync_now().await)
            }
        }
    }

    /// Reconcile without acting on the result.
    pub async fn preview(&self) -> Result<SyncPlan, SyncError> {
        let catalog = self.catalog.fetch_catalog().await?;
        let local = scan(&self.layout)?;
        Ok(content_sync::plan(&catalog, &local))
    }

    pub fn status(&self) -> SyncStatus {
        let (local_count, partial_count) = match scan(&self.layout) {
            Ok(records) => {
                let partial = records.iter().filter(|r| r.is_partial()).count();
                (records.len() - partial, partial)
            }
            Err(e) => {
                warn!(error = %e, "failed to scan content directory for status");
                (0, 0)
            }
        };

        let state = self.state();
        SyncStatus {
            is_syncing: self.is_syncing(),
            phase: state.phase,
            last_sync: state.last_sync,
            last_successful_sync: state.last_successful_sync,
            last_report: state.last_report.clone(),
            local_count,
            partial_count,
            stats: state.stats.clone(),
        }
    }

    /// Delete every partial artifact. Returns how many were removed.
    ///
    /// Takes the same guard as a sync cycle, so it does nothing while a
    /// download may be writing to a partial.
    pub fn cleanup_partial_downloads(&self) -> usize {
        let Some(_guard) = FlightGuard::acquire(self) else {
            warn!("sync in progress, not cleaning up partial downloads");
            return 0;
        };

        let records = match scan(&self.layout) {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "failed to scan content directory for cleanup");
                return 0;
            }
        };

        let mut removed = 0;
        for record in records.iter().filter(|r| r.is_partial()) {
            match self.layout.remove_partial(&record.filename) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(filename = %record.filename, error = %e, "failed to remove partial"),
            }
        }

        info!(removed, "cleaned up partial downloads");
        removed
    }
}

fn restore(state: &mut CycleState, history: &SyncHistory) {
    match history.last_sync() {
        Ok(at) => state.last_sync = at,
        Err(e) => warn!(error = %e, "failed to read last sync from history"),
    }
    match history.last_successful_sync() {
        Ok(at) => state.last_successful_sync = at,
        Err(e) => warn!(error = %e, "failed to read last successful sync from history"),
    }
    match history.totals() {
        Ok(stats) => state.stats = stats,
        Err(e) => warn!(error = %e, "failed to read sync totals from history"),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
