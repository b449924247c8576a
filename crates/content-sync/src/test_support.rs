use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use url::Url;

use crate::{CatalogEntry, CatalogSource, ConnectivityProbe, ContentFetcher, ContentLayout, DownloadOutcome, SyncError};

/// Connectivity probe with a switchable answer. Counts how often it was asked.
pub struct FakeProbe {
    online: AtomicBool,
    calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ConnectivityProbe for FakeProbe {
    async fn is_online(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.online.load(Ordering::SeqCst)
    }
}

/// An issue captured by [`InMemoryCatalog::report_issue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedIssue {
    pub filename: String,
    pub error: String,
    pub url: String,
}

/// In-memory catalog for testing. Records fetches and reported issues.
pub struct InMemoryCatalog {
    entries: Mutex<Vec<CatalogEntry>>,
    failure: Mutex<Option<SyncError>>,
    fetches: AtomicUsize,
    issues: Mutex<Vec<ReportedIssue>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            fetches: AtomicUsize::new(0),
            issues: Mutex::new(Vec::new()),
        }
    }

    /// Add an entry served from `https://content.test/<filename>`.
    pub fn add(&self, filename: &str) {
        let url = Url::parse(&format!("https://content.test/{filename}")).unwrap();
        self.entries
            .lock()
            .unwrap()
            .push(CatalogEntry::new(filename, url));
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Make every subsequent fetch fail with `error`.
    pub fn fail_with(&self, error: SyncError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn issues(&self) -> Vec<ReportedIssue> {
        self.issues.lock().unwrap().clone()
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CatalogSource for InMemoryCatalog {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, SyncError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn report_issue(&self, filename: &str, error: &str, locator: &Url) {
        self.issues.lock().unwrap().push(ReportedIssue {
            filename: filename.to_owned(),
            error: error.to_owned(),
            url: locator.to_string(),
        });
    }
}

/// Fetcher that materializes fixed content without any network.
///
/// Filenames registered with [`StubFetcher::respond_with`] return the given
/// outcome instead of writing a file.
pub struct StubFetcher {
    layout: ContentLayout,
    content: Vec<u8>,
    scripted: Mutex<HashMap<String, DownloadOutcome>>,
    calls: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn new(layout: ContentLayout) -> Self {
        Self {
            layout,
            content: b"stub media".to_vec(),
            scripted: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond_with(&self, outcome: DownloadOutcome) {
        self.scripted
            .lock()
            .unwrap()
            .insert(outcome.filename.clone(), outcome);
    }

    /// Filenames passed to `fetch`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ContentFetcher for StubFetcher {
    async fn fetch(&self, entry: &CatalogEntry) -> DownloadOutcome {
        self.calls.lock().unwrap().push(entry.filename.clone());

        if let Some(outcome) = self.scripted.lock().unwrap().get(&entry.filename) {
            return outcome.clone();
        }

        let partial = self.layout.partial_path(&entry.filename);
        let write = std::fs::write(&partial, &self.content)
            .and_then(|()| std::fs::rename(&partial, self.layout.final_path(&entry.filename)));

        match write {
            Ok(()) => DownloadOutcome::completed(&entry.filename, self.content.len() as u64, false),
            Err(e) => DownloadOutcome::failed(
                &entry.filename,
                SyncError::filesystem("stub write", &e),
            ),
        }
    }
}
