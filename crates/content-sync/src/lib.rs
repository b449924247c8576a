pub mod catalog;
pub mod connectivity;
pub mod error;
pub mod fetch;
pub mod inventory;
pub mod reconcile;
pub mod report;

pub use catalog::{CatalogEntry, CatalogSource, is_safe_filename, normalize_filename};
pub use connectivity::ConnectivityProbe;
pub use error::SyncError;
pub use fetch::{ContentFetcher, DownloadOutcome, Progress, ProgressFn};
pub use inventory::{
    ArtifactState, ContentLayout, FileState, LocalFileRecord, PARTIAL_SUFFIX, scan,
};
pub use reconcile::{SyncPlan, plan};
pub use report::{
    CycleTally, FileFailure, SkipReason, SyncPhase, SyncReport, SyncStats, SyncStatus,
};

pub use url::Url;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
