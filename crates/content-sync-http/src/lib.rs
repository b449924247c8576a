pub mod catalog;
pub mod downloader;
pub mod probe;
pub mod retry;

pub use catalog::{CatalogClientConfig, HttpCatalogClient, ManifestEntry};
pub use downloader::{DownloaderConfig, ResumableDownloader};
pub use probe::{DEFAULT_ENDPOINTS, DEFAULT_PROBE_TIMEOUT, HttpConnectivityProbe};
pub use retry::RetryPolicy;

/// User agent sent with every request to the coordinator and content origins.
pub const USER_AGENT: &str = concat!("content-agent/", env!("CARGO_PKG_VERSION"));
