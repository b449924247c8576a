use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use content_sync::{
    ArtifactState, CatalogEntry, ConnectivityProbe, ContentFetcher, ContentLayout,
    DownloadOutcome, Progress, ProgressFn, SyncError, Url,
};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, HeaderMap, RANGE, USER_AGENT};
use tokio::io::AsyncWriteExt;

use crate::retry::RetryPolicy;

/// Emit a bytes-only progress update at most once per this many bytes.
const PROGRESS_BYTE_STEP: u64 = 1024 * 1024;

/// Tunables for [`ResumableDownloader`].
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
    /// Longest wait for response headers or for the next body chunk.
    pub stall_timeout: Duration,
    /// Timeout for the size probe sent before a fresh download.
    pub probe_timeout: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            stall_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// Why a single attempt stopped short of materializing the file.
#[derive(Debug)]
enum AttemptError {
    Offline,
    /// 416 with no partial artifact to promote.
    RangeNotSatisfiable,
    Permanent(String),
    Transient(String),
    Filesystem(SyncError),
}

struct Transfer {
    resumed: bool,
    total: Option<u64>,
}

/// Downloads catalog entries into the content directory, resuming from
/// partial artifacts with HTTP range requests.
///
/// Bytes are appended to `<name>.download` and renamed to `<name>` only once
/// the body is complete, so a final file is never observed half-written.
pub struct ResumableDownloader {
    client: reqwest::Client,
    layout: ContentLayout,
    probe: Arc<dyn ConnectivityProbe>,
    config: DownloaderConfig,
    in_flight: Mutex<HashSet<String>>,
    on_progress: Option<ProgressFn>,
}

impl ResumableDownloader {
    pub fn new(
        layout: ContentLayout,
        probe: Arc<dyn ConnectivityProbe>,
        config: DownloaderConfig,
    ) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| SyncError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            layout,
            probe,
            config,
            in_flight: Mutex::new(HashSet::new()),
            on_progress: None,
        })
    }

    pub fn with_progress(mut self, on_progress: ProgressFn) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn layout(&self) -> &ContentLayout {
        &self.layout
    }

    /// Download one entry, retrying transient failures with backoff.
    ///
    /// Never returns an error; see [`DownloadOutcome`] for how failures are
    /// classified.
    pub async fn run(&self, entry: &CatalogEntry) -> DownloadOutcome {
        let filename = entry.filename.as_str();

        let Some(_claim) = InFlightClaim::acquire(&self.in_flight, filename) else {
            tracing::warn!(%filename, "download already in progress; not starting another");
            return DownloadOutcome::paused(
                filename,
                SyncError::TransientTransfer("download already in progress".into()),
            );
        };

        let mut written = 0u64;
        let mut attempt = 1u32;
        let mut restarted = false;

        loop {
            let err = match self.attempt(entry, &mut written).await {
                Ok(transfer) => {
                    return DownloadOutcome::completed(filename, written, transfer.resumed)
                        .with_total(transfer.total);
                }
                Err(err) => err,
            };

            match err {
                AttemptError::Offline => {
                    tracing::info!(%filename, "offline; leaving download paused");
                    return DownloadOutcome::paused(
                        filename,
                        SyncError::Unavailable("no internet connection".into()),
                    )
                    .with_bytes_written(written);
                }
                AttemptError::RangeNotSatisfiable if !restarted => {
                    tracing::info!(%filename, "range not satisfiable; restarting from zero");
                    restarted = true;
                    if let Err(e) = self.layout.remove_partial(filename) {
                        return DownloadOutcome::failed(filename, e).with_bytes_written(written);
                    }
                }
                AttemptError::RangeNotSatisfiable => {
                    return DownloadOutcome::paused(
                        filename,
                        SyncError::TransientTransfer("range not satisfiable".into()),
                    )
                    .with_bytes_written(written);
                }
                AttemptError::Permanent(msg) => {
                    tracing::warn!(%filename, error = %msg, "download rejected; discarding partial artifact");
                    if let Err(e) = self.layout.remove_partial(filename) {
                        tracing::warn!(%filename, error = %e, "failed to discard partial artifact");
                    }
                    return DownloadOutcome::failed(filename, SyncError::PermanentTransfer(msg))
                        .with_bytes_written(written);
                }
                AttemptError::Filesystem(e) => {
                    tracing::warn!(%filename, error = %e, "download hit a filesystem error");
                    return DownloadOutcome::failed(filename, e).with_bytes_written(written);
                }
                AttemptError::Transient(msg) => {
                    if !self.config.retry.allows_retry_after(attempt) {
                        tracing::warn!(%filename, attempts = attempt, error = %msg, "giving up for this cycle; partial artifact kept");
                        return DownloadOutcome::paused(filename, SyncError::TransientTransfer(msg))
                            .with_bytes_written(written);
                    }
                    if !self.probe.is_online().await {
                        tracing::info!(%filename, error = %msg, "connectivity lost mid-download; leaving download paused");
                        return DownloadOutcome::paused(
                            filename,
                            SyncError::Unavailable("no internet connection".into()),
                        )
                        .with_bytes_written(written);
                    }

                    let delay = self.config.retry.delay_for_attempt(attempt);
                    tracing::warn!(%filename, attempt, delay_ms = delay.as_millis() as u64, error = %msg, "download attempt failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(
        &self,
        entry: &CatalogEntry,
        written: &mut u64,
    ) -> Result<Transfer, AttemptError> {
        if !self.probe.is_online().await {
            return Err(AttemptError::Offline);
        }

        let filename = entry.filename.as_str();
        let state = self
            .layout
            .artifact_state(filename)
            .map_err(AttemptError::Filesystem)?;

        let offset = match state {
            ArtifactState::Complete { size } if size > 0 => {
                tracing::debug!(%filename, size, "already complete; nothing to transfer");
                return Ok(Transfer {
                    resumed: false,
                    total: Some(size),
                });
            }
            ArtifactState::Partial { size } => size,
            ArtifactState::Complete { .. } | ArtifactState::Absent => 0,
        };

        self.layout.ensure_dir().map_err(AttemptError::Filesystem)?;

        let probed_total = if offset == 0 {
            self.probe_length(&entry.source).await
        } else {
            None
        };

        let mut request = self
            .client
            .get(entry.source.clone())
            .header(USER_AGENT, crate::USER_AGENT);
        if offset > 0 {
            tracing::info!(%filename, offset, "resuming download");
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let mut response = match tokio::time::timeout(self.config.stall_timeout, request.send()).await {
            Err(_) => return Err(AttemptError::Transient("timed out waiting for response".into())),
            Ok(Err(e)) => return Err(AttemptError::Transient(format!("request failed: {e}"))),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let (append, expected_total) = match status {
            StatusCode::PARTIAL_CONTENT => {
                if let Some(start) = content_range_start(response.headers())
                    && start != offset
                {
                    tracing::warn!(%filename, offset, start, "server answered a different range; discarding partial artifact");
                    if let Err(e) = self.layout.remove_partial(filename) {
                        tracing::warn!(%filename, error = %e, "failed to discard partial artifact");
                    }
                    return Err(AttemptError::Transient(format!(
                        "server sent range starting at byte {start}, expected {offset}"
                    )));
                }
                let total = content_range_total(response.headers())
                    .or_else(|| response.content_length().map(|len| offset + len));
                (true, total)
            }
            StatusCode::OK => {
                if offset > 0 {
                    tracing::info!(%filename, "server ignored range request; restarting from zero");
                }
                (false, response.content_length().or(probed_total))
            }
            StatusCode::RANGE_NOT_SATISFIABLE => {
                if offset == 0 {
                    return Err(AttemptError::RangeNotSatisfiable);
                }
                tracing::info!(%filename, offset, "server reports range already complete");
                self.materialize(filename).await?;
                return Ok(Transfer {
                    resumed: true,
                    total: Some(offset),
                });
            }
            status if is_permanent(status) => {
                return Err(AttemptError::Permanent(format!(
                    "HTTP {status} from {}",
                    entry.source
                )));
            }
            status => return Err(AttemptError::Transient(format!("HTTP {status}"))),
        };

        let start = if append { offset } else { 0 };
        let partial_path = self.layout.partial_path(filename);

        let mut options = tokio::fs::OpenOptions::new();
        if append {
            options.create(true).append(true);
        } else {
            options.create(true).write(true).truncate(true);
        }
        let mut file = options
            .open(&partial_path)
            .await
            .map_err(|e| fs_error("opening", &partial_path, &e))?;

        let mut received = 0u64;
        let mut last_progress = None;

        loop {
            let chunk = match tokio::time::timeout(self.config.stall_timeout, response.chunk()).await {
                Err(_) => return Err(AttemptError::Transient("download stalled".into())),
                Ok(Err(e)) => return Err(AttemptError::Transient(format!("stream error: {e}"))),
                Ok(Ok(None)) => break,
                Ok(Ok(Some(chunk))) => chunk,
            };

            file.write_all(&chunk)
                .await
                .map_err(|e| fs_error("writing", &partial_path, &e))?;

            received += chunk.len() as u64;
            *written += chunk.len() as u64;
            last_progress = self.report_progress(filename, start + received, expected_total, last_progress);
        }

        let synced = async {
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        synced.map_err(|e| fs_error("syncing", &partial_path, &e))?;
        drop(file);

        let size = start + received;
        if size == 0 {
            if let Err(e) = self.layout.remove_partial(filename) {
                tracing::warn!(%filename, error = %e, "failed to discard partial artifact");
            }
            return Err(AttemptError::Transient("empty response body".into()));
        }

        if let Some(total) = expected_total {
            if size < total {
                return Err(AttemptError::Transient(format!(
                    "body ended early: {size} of {total} bytes"
                )));
            }
            if size > total {
                self.layout
                    .remove_partial(filename)
                    .map_err(AttemptError::Filesystem)?;
                return Err(AttemptError::Transient(format!(
                    "received {size} bytes but expected {total}; discarded"
                )));
            }
        }

        self.materialize(filename).await?;

        let resumed = append && offset > 0;
        tracing::info!(%filename, bytes = received, size, resumed, "download complete");

        Ok(Transfer {
            resumed,
            total: Some(expected_total.unwrap_or(size)),
        })
    }

    /// Ask for the first byte to learn the total size. Failures are ignored:
    /// without a size, progress is reported in bytes.
    async fn probe_length(&self, url: &Url) -> Option<u64> {
        let result = self
            .client
            .get(url.clone())
            .header(USER_AGENT, crate::USER_AGENT)
            .header(RANGE, "bytes=0-0")
            .timeout(self.config.probe_timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status() == StatusCode::PARTIAL_CONTENT => {
                content_range_total(response.headers())
            }
            Ok(response) if response.status() == StatusCode::OK => response.content_length(),
            Ok(response) => {
                tracing::debug!(%url, status = %response.status(), "size probe not honored");
                None
            }
            Err(e) => {
                tracing::debug!(%url, error = %e, "size probe failed");
                None
            }
        }
    }

    /// Atomically rename the partial artifact to its final name.
    async fn materialize(&self, filename: &str) -> Result<(), AttemptError> {
        let from = self.layout.partial_path(filename);
        let to = self.layout.final_path(filename);
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| fs_error("renaming", &from, &e))
    }

    fn report_progress(
        &self,
        filename: &str,
        done: u64,
        total: Option<u64>,
        last: Option<Progress>,
    ) -> Option<Progress> {
        let progress = Progress::compute(done, total);
        let changed = match (last, progress) {
            (Some(Progress::Percent(a)), Progress::Percent(b)) => a != b,
            (Some(Progress::Bytes(a)), Progress::Bytes(b)) => {
                a / PROGRESS_BYTE_STEP != b / PROGRESS_BYTE_STEP
            }
            _ => true,
        };

        if changed {
            tracing::debug!(%filename, %progress, "download progress");
            if let Some(callback) = &self.on_progress {
                callback(filename, progress);
            }
        }
        Some(progress)
    }
}

#[async_trait::async_trait]
impl ContentFetcher for ResumableDownloader {
    async fn fetch(&self, entry: &CatalogEntry) -> DownloadOutcome {
        self.run(entry).await
    }
}

/// Marks a filename as being downloaded until dropped.
struct InFlightClaim<'a> {
    set: &'a Mutex<HashSet<String>>,
    filename: String,
}

impl<'a> InFlightClaim<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, filename: &str) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.insert(filename.to_owned()) {
            return None;
        }
        Some(Self {
            set,
            filename: filename.to_owned(),
        })
    }
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.filename);
    }
}

fn fs_error(action: &str, path: &Path, err: &std::io::Error) -> AttemptError {
    AttemptError::Filesystem(SyncError::filesystem(
        &format!("{action} {}", path.display()),
        err,
    ))
}

/// Client errors other than timeouts and rate limiting will not go away
/// by retrying.
fn is_permanent(status: StatusCode) -> bool {
    status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
}

/// Total length from `Content-Range: bytes <start>-<end>/<total>`.
/// First byte position of `Content-Range: bytes <start>-<end>/<total>`.
fn content_range_start(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let range = value.trim().strip_prefix("bytes ")?;
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}

fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}
