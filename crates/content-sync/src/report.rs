use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fetch::DownloadOutcome;

/// Why a cycle did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// The connectivity probe failed every endpoint.
    NoInternet,
    /// Another cycle was already in flight.
    AlreadySyncing,
    /// The probe passed but the manifest could not be retrieved.
    CatalogUnavailable,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoInternet => "no_internet",
            Self::AlreadySyncing => "already_syncing",
            Self::CatalogUnavailable => "catalog_unavailable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "no_internet" => Some(Self::NoInternet),
            "already_syncing" => Some(Self::AlreadySyncing),
            "catalog_unavailable" => Some(Self::CatalogUnavailable),
            _ => None,
        }
    }
}

/// A file that did not download in this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub filename: String,
    pub error: String,
    pub resumable: bool,
}

/// Machine-readable result of one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// No download failed permanently and nothing went wrong internally.
    pub success: bool,
    pub skipped: bool,
    pub skip_reason: Option<SkipReason>,
    pub internet_available: bool,
    pub downloaded: u64,
    /// Downloads that failed and will not resume on their own.
    pub failed: u64,
    /// Downloads interrupted with their partial artifact kept.
    pub paused: u64,
    pub resumed: u64,
    pub deleted: u64,
    pub delete_failures: u64,
    pub failures: Vec<FileFailure>,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn skipped(reason: SkipReason, internet_available: bool, started_at: DateTime<Utc>) -> Self {
        let message = match reason {
            SkipReason::NoInternet => "Skipped: no internet connection",
            SkipReason::AlreadySyncing => "Skipped: sync already in progress",
            SkipReason::CatalogUnavailable => "Skipped: catalog unavailable",
        };
        Self {
            skipped: true,
            skip_reason: Some(reason),
            internet_available,
            message: message.to_owned(),
            ..Self::empty(started_at)
        }
    }

    /// A cycle that hit an internal error before it could finish.
    pub fn errored(message: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            internet_available: true,
            message: message.into(),
            ..Self::empty(started_at)
        }
    }

    fn empty(started_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            skipped: false,
            skip_reason: None,
            internet_available: false,
            downloaded: 0,
            failed: 0,
            paused: 0,
            resumed: 0,
            deleted: 0,
            delete_failures: 0,
            failures: Vec::new(),
            message: String::new(),
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Accumulates per-file results while a cycle runs.
#[derive(Debug, Default)]
pub struct CycleTally {
    downloaded: u64,
    failed: u64,
    paused: u64,
    resumed: u64,
    deleted: u64,
    delete_failures: u64,
    failures: Vec<FileFailure>,
}

impl CycleTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_download(&mut self, outcome: &DownloadOutcome) {
        if outcome.success {
            self.downloaded += 1;
            if outcome.resumed {
                self.resumed += 1;
            }
            return;
        }

        if outcome.resumable {
            self.paused += 1;
        } else {
            self.failed += 1;
        }
        self.failures.push(FileFailure {
            filename: outcome.filename.clone(),
            error: outcome
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown error".into()),
            resumable: outcome.resumable,
        });
    }

    pub fn record_deletion(&mut self, ok: bool) {
        if ok {
            self.deleted += 1;
        } else {
            self.delete_failures += 1;
        }
    }

    pub fn finish(self, started_at: DateTime<Utc>) -> SyncReport {
        let success = self.failed == 0;
        let mut message = format!(
            "Downloaded {}, failed {}, paused {}, resumed {}, deleted {}",
            self.downloaded, self.failed, self.paused, self.resumed, self.deleted
        );
        if self.delete_failures > 0 {
            message.push_str(&format!(" ({} deletion(s) failed)", self.delete_failures));
        }

        SyncReport {
            success,
            skipped: false,
            skip_reason: None,
            internet_available: true,
            downloaded: self.downloaded,
            failed: self.failed,
            paused: self.paused,
            resumed: self.resumed,
            deleted: self.deleted,
            delete_failures: self.delete_failures,
            failures: self.failures,
            message,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Cumulative counters across cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub cycles: u64,
    pub skipped_cycles: u64,
    pub downloaded: u64,
    pub failed: u64,
    pub deleted: u64,
    pub resumed: u64,
}

impl SyncStats {
    pub fn absorb(&mut self, report: &SyncReport) {
        if report.skipped {
            self.skipped_cycles += 1;
            return;
        }
        self.cycles += 1;
        self.downloaded += report.downloaded;
        self.failed += report.failed;
        self.deleted += report.deleted;
        self.resumed += report.resumed;
    }
}

/// Where the orchestrator is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    Idle,
    Checking,
    Fetching,
    Deleting,
    Reporting,
}

/// Snapshot returned to the command surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub phase: SyncPhase,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub last_report: Option<SyncReport>,
    pub local_count: usize,
    pub partial_count: usize,
    pub stats: SyncStats,
}
