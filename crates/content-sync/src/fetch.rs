use std::sync::Arc;

use crate::catalog::CatalogEntry;
use crate::error::SyncError;

/// Result of one file transfer attempt, including its retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub filename: String,
    pub success: bool,
    /// Bytes written to disk by this call (excludes bytes from earlier attempts).
    pub bytes_written: u64,
    /// True if the transfer continued from an existing partial artifact.
    pub resumed: bool,
    pub error: Option<SyncError>,
    /// True if the partial artifact was kept on purpose so a later call can
    /// resume. False after a permanent failure.
    pub resumable: bool,
    /// Total size of the file when the server disclosed it.
    pub total_bytes: Option<u64>,
}

impl DownloadOutcome {
    pub fn completed(filename: impl Into<String>, bytes_written: u64, resumed: bool) -> Self {
        Self {
            filename: filename.into(),
            success: true,
            bytes_written,
            resumed,
            error: None,
            resumable: false,
            total_bytes: None,
        }
    }

    /// A failure whose partial artifact (if any) was preserved.
    pub fn paused(filename: impl Into<String>, error: SyncError) -> Self {
        Self {
            filename: filename.into(),
            success: false,
            bytes_written: 0,
            resumed: false,
            error: Some(error),
            resumable: true,
            total_bytes: None,
        }
    }

    /// A failure that will not be resumed.
    pub fn failed(filename: impl Into<String>, error: SyncError) -> Self {
        Self {
            resumable: false,
            ..Self::paused(filename, error)
        }
    }

    pub fn with_total(mut self, total: Option<u64>) -> Self {
        self.total_bytes = total;
        self
    }

    pub fn with_bytes_written(mut self, bytes: u64) -> Self {
        self.bytes_written = bytes;
        self
    }

    /// True if this failure should be reported to the coordinator.
    pub fn needs_upstream_report(&self) -> bool {
        !self.success && self.error.as_ref().is_some_and(SyncError::is_permanent)
    }
}

/// How far a transfer has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Percent of the disclosed total, including resumed bytes.
    Percent(u8),
    /// Raw bytes on disk when the total is unknown.
    Bytes(u64),
}

impl Progress {
    pub fn compute(done: u64, total: Option<u64>) -> Self {
        match total {
            Some(total) if total > 0 => {
                let pct = (done.min(total) * 100) / total;
                Self::Percent(pct as u8)
            }
            _ => Self::Bytes(done),
        }
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Percent(p) => write!(f, "{p}%"),
            Self::Bytes(b) => write!(f, "{b} bytes"),
        }
    }
}

/// Callback invoked with `(filename, progress)` during a transfer.
pub type ProgressFn = Arc<dyn Fn(&str, Progress) + Send + Sync>;

/// Materializes one catalog entry into the content directory.
///
/// Implementations never return an error: every failure is folded into the
/// outcome so the caller can keep going with other files.
#[async_trait::async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, entry: &CatalogEntry) -> DownloadOutcome;
}

#[async_trait::async_trait]
impl<T: ContentFetcher + ?Sized> ContentFetcher for Arc<T> {
    async fn fetch(&self, entry: &CatalogEntry) -> DownloadOutcome {
        (**self).fetch(entry).await
    }
}
