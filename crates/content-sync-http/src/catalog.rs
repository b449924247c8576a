use std::sync::Arc;
use std::time::Duration;

use content_sync::{
    CatalogEntry, CatalogSource, ConnectivityProbe, SyncError, Url, is_safe_filename,
    normalize_filename,
};
use serde::{Deserialize, Serialize};

/// Configuration for talking to the coordinator.
#[derive(Debug, Clone)]
pub struct CatalogClientConfig {
    /// `GET` returns a JSON array of `{ filename, fileUrl }`.
    pub manifest_url: Url,
    /// `POST` target for download issue reports. Reports are skipped if unset.
    pub issue_url: Option<Url>,
    pub device_id: String,
    /// Canonical content extension, without the dot.
    pub extension: String,
    pub timeout: Duration,
}

/// One element of the manifest array.
#[derive(Debug, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    #[serde(rename = "fileUrl")]
    pub file_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IssueReport<'a> {
    device_id: &'a str,
    filename: &'a str,
    error: &'a str,
    url: &'a str,
    timestamp: String,
}

/// Fetches the remote manifest and reports download issues back.
pub struct HttpCatalogClient {
    config: CatalogClientConfig,
    client: reqwest::Client,
    probe: Arc<dyn ConnectivityProbe>,
}

impl HttpCatalogClient {
    pub fn new(config: CatalogClientConfig, probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            probe,
        }
    }

    /// Turn raw manifest entries into catalog entries.
    ///
    /// Names are normalized to carry the extension. Entries that would
    /// escape the content directory or have no usable URL are dropped.
    pub fn normalize(entries: Vec<ManifestEntry>, extension: &str) -> Vec<CatalogEntry> {
        entries
            .into_iter()
            .filter_map(|entry| {
                let filename = normalize_filename(&entry.filename, extension);
                if !is_safe_filename(&filename) {
                    tracing::warn!(filename = %entry.filename, "ignoring catalog entry with unsafe filename");
                    return None;
                }

                match Url::parse(&entry.file_url) {
                    Ok(source) => Some(CatalogEntry::new(filename, source)),
                    Err(e) => {
                        tracing::warn!(%filename, url = %entry.file_url, error = %e, "ignoring catalog entry with invalid URL");
                        None
                    }
                }
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl CatalogSource for HttpCatalogClient {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, SyncError> {
        if !self.probe.is_online().await {
            return Err(SyncError::Unavailable("no internet connection".into()));
        }

        let response = self
            .client
            .get(self.config.manifest_url.clone())
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| SyncError::Unavailable(format!("manifest request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SyncError::Unavailable(format!(
                "manifest returned HTTP {}",
                response.status()
            )));
        }

        let entries: Vec<ManifestEntry> = response
            .json()
            .await
            .map_err(|e| SyncError::Unavailable(format!("malformed manifest: {e}")))?;

        let catalog = Self::normalize(entries, &self.config.extension);
        tracing::debug!(entries = catalog.len(), "fetched catalog");
        Ok(catalog)
    }

    async fn report_issue(&self, filename: &str, error: &str, locator: &Url) {
        let Some(issue_url) = &self.config.issue_url else {
            tracing::debug!(%filename, "no issue endpoint configured; not reporting");
            return;
        };

        if !self.probe.is_online().await {
            tracing::debug!(%filename, "offline; not reporting issue");
            return;
        }

        let body = IssueReport {
            device_id: &self.config.device_id,
            filename,
            error,
            url: locator.as_str(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let result = self
            .client
            .post(issue_url.clone())
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!(%filename, "reported download issue");
            }
            Ok(response) => {
                tracing::warn!(%filename, status = %response.status(), "issue report rejected");
            }
            Err(e) => {
                tracing::warn!(%filename, error = %e, "issue report failed");
            }
        }
    }
}
