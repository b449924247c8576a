use std::path::{Path, PathBuf};
use std::time::Duration;

use content_sync_http::{DEFAULT_ENDPOINTS, DEFAULT_PROBE_TIMEOUT, DownloaderConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use url::Url;

/// Top-level agent configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Identifies this device in issue reports.
    pub device_id: String,
    /// Coordinator endpoint returning this device's manifest.
    pub manifest_url: Option<Url>,
    /// Coordinator endpoint accepting download issue reports.
    pub issue_url: Option<Url>,
    /// Directory holding the media files. Defaults under the data directory.
    pub content_dir: Option<PathBuf>,
    /// Sync journal location. Defaults under the data directory.
    pub history_path: Option<PathBuf>,
    pub extension: String,
    pub sync_interval_secs: u64,
    pub catalog_timeout_secs: u64,
    pub connectivity: ConnectivityConfig,
    pub download: DownloadConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub endpoints: Vec<Url>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_secs: u64,
    pub connect_timeout_secs: u64,
    pub stall_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: "content-agent".into(),
            manifest_url: None,
            issue_url: None,
            content_dir: None,
            history_path: None,
            extension: "mp4".into(),
            sync_interval_secs: 300,
            catalog_timeout_secs: 30,
            connectivity: ConnectivityConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS
                .iter()
                .filter_map(|e| Url::parse(e).ok())
                .collect(),
            timeout_secs: DEFAULT_PROBE_TIMEOUT.as_secs(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let downloader = DownloaderConfig::default();
        Self {
            max_attempts: retry.max_attempts,
            base_delay_ms: u64::try_from(retry.base_delay.as_millis()).unwrap_or(u64::MAX),
            max_delay_secs: retry.max_delay.as_secs(),
            connect_timeout_secs: downloader.connect_timeout.as_secs(),
            stall_timeout_secs: downloader.stall_timeout.as_secs(),
        }
    }
}

impl AgentConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn catalog_timeout(&self) -> Duration {
        Duration::from_secs(self.catalog_timeout_secs)
    }

    /// Configured content directory, or `<data dir>/content-agent/media`.
    pub fn content_dir(&self) -> Option<PathBuf> {
        self.content_dir
            .clone()
            .or_else(|| data_dir().map(|d| d.join("media")))
    }

    /// Configured journal path, or `<data dir>/content-agent/history.db`.
    pub fn history_path(&self) -> Option<PathBuf> {
        self.history_path
            .clone()
            .or_else(|| data_dir().map(|d| d.join("history.db")))
    }
}

impl ConnectivityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DownloadConfig {
    pub fn downloader_config(&self) -> DownloaderConfig {
        DownloaderConfig {
            retry: RetryPolicy::new(
                self.max_attempts,
                Duration::from_millis(self.base_delay_ms),
                Duration::from_secs(self.max_delay_secs),
            ),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
            ..DownloaderConfig::default()
        }
    }
}

fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("content-agent"))
}

/// Config file path: `~/.config/content-agent/agent.toml`
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("content-agent").join("agent.toml"))
}

pub fn parse_config(contents: &str) -> Result<AgentConfig, toml::de::Error> {
    toml::from_str(contents)
}

/// Load config from `explicit` or the default path, falling back to
/// defaults if the file is missing or unreadable.
pub fn load_config(explicit: Option<&Path>) -> AgentConfig {
    let path = explicit.map(Path::to_path_buf).or_else(config_path);

    if let Some(path) = path {
        match std::fs::read_to_string(&path) {
            Ok(contents) => match parse_config(&contents) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                ),
            },
            Err(e) if explicit.is_some() => tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config, using defaults"
            ),
            Err(_) => {}
        }
    }

    AgentConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AgentConfig::default();
        assert_eq!(config.extension, "mp4");
        assert_eq!(config.sync_interval(), Duration::from_secs(300));
        assert!(config.manifest_url.is_none());
        assert_eq!(config.connectivity.endpoints.len(), DEFAULT_ENDPOINTS.len());
        assert_eq!(config.connectivity.timeout(), Duration::from_secs(5));

        let downloader = config.download.downloader_config();
        assert_eq!(downloader.retry, RetryPolicy::default());
        assert_eq!(downloader.connect_timeout, Duration::from_secs(10));
        assert_eq!(downloader.stall_timeout, Duration::from_secs(30));
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.device_id, "content-agent");
        assert_eq!(config.download.max_attempts, 5);
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
device_id = "kiosk-7"
manifest_url = "https://coordinator.example/api/devices/kiosk-7/manifest"
issue_url = "https://coordinator.example/api/issues"
content_dir = "/srv/media"
extension = "webm"
sync_interval_secs = 120

[connectivity]
endpoints = ["http://probe.example/ok"]
timeout_secs = 2

[download]
max_attempts = 3
base_delay_ms = 500
stall_timeout_secs = 10
"#;
        let config = parse_config(toml_str).unwrap();

        assert_eq!(config.device_id, "kiosk-7");
        assert_eq!(
            config.manifest_url.as_ref().map(Url::as_str),
            Some("https://coordinator.example/api/devices/kiosk-7/manifest")
        );
        assert_eq!(config.content_dir(), Some(PathBuf::from("/srv/media")));
        assert_eq!(config.extension, "webm");
        assert_eq!(config.sync_interval(), Duration::from_secs(120));
        assert_eq!(config.connectivity.endpoints.len(), 1);
        assert_eq!(config.connectivity.timeout(), Duration::from_secs(2));

        let downloader = config.download.downloader_config();
        assert_eq!(downloader.retry.max_attempts, 3);
        assert_eq!(downloader.retry.base_delay, Duration::from_millis(500));
        assert_eq!(downloader.retry.max_delay, Duration::from_secs(30));
        assert_eq!(downloader.stall_timeout, Duration::from_secs(10));
    }

    #[test]
    fn invalid_url_is_a_parse_error() {
        assert!(parse_config(r#"manifest_url = "not a url""#).is_err());
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let config = parse_config("[download]\nmax_attempts = 0").unwrap();
        assert_eq!(config.download.downloader_config().retry.max_attempts, 1);
    }

    #[test]
    fn unreadable_explicit_path_falls_back_to_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/content-agent.toml")));
        assert_eq!(config.sync_interval_secs, 300);
    }
}
