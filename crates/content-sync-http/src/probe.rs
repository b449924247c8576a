use std::time::Duration;

use content_sync::{ConnectivityProbe, SyncError, Url};

/// Endpoints run by independent operators, tried in order.
pub const DEFAULT_ENDPOINTS: &[&str] = &[
    "http://connectivitycheck.gstatic.com/generate_204",
    "http://www.msftconnecttest.com/connecttest.txt",
    "http://captive.apple.com/hotspot-detect.html",
];

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Decides "online" by a plain GET against well-known endpoints.
///
/// The first endpoint answering with a 2xx or 3xx status wins. Every request
/// carries its own short timeout so a dead network fails fast.
pub struct HttpConnectivityProbe {
    client: reqwest::Client,
    endpoints: Vec<Url>,
    timeout: Duration,
}

impl HttpConnectivityProbe {
    pub fn new(endpoints: Vec<Url>, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SyncError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoints,
            timeout,
        })
    }

    /// Probe against [`DEFAULT_ENDPOINTS`].
    pub fn with_defaults() -> Result<Self, SyncError> {
        let endpoints = DEFAULT_ENDPOINTS
            .iter()
            .filter_map(|e| Url::parse(e).ok())
            .collect();
        Self::new(endpoints, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }
}

#[async_trait::async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
    async fn is_online(&self) -> bool {
        for endpoint in &self.endpoints {
            let result = self
                .client
                .get(endpoint.clone())
                .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
                .timeout(self.timeout)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() || status.is_redirection() {
                        tracing::debug!(%endpoint, %status, "connectivity probe succeeded");
                        return true;
                    }
                    tracing::debug!(%endpoint, %status, "connectivity probe got unexpected status");
                }
                Err(e) => {
                    tracing::debug!(%endpoint, error = %e, "connectivity probe failed");
                }
            }
        }

        tracing::info!(endpoints = self.endpoints.len(), "no connectivity endpoint reachable");
        false
    }
}
