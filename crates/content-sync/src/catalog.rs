use std::sync::Arc;

use url::Url;

use crate::error::SyncError;

/// One file the coordinator expects to exist locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Normalized filename, always ending in the canonical extension.
    pub filename: String,
    /// Where the content can be downloaded from.
    pub source: Url,
}

impl CatalogEntry {
    pub fn new(filename: impl Into<String>, source: Url) -> Self {
        Self {
            filename: filename.into(),
            source,
        }
    }
}

/// Append `.<extension>` unless the name already carries it.
///
/// The comparison is case-insensitive so `AD1.MP4` is left as-is.
pub fn normalize_filename(name: &str, extension: &str) -> String {
    let name = name.trim();
    if has_extension(name, extension) {
        name.to_owned()
    } else {
        format!("{name}.{extension}")
    }
}

/// True if `name` is `<something>.<extension>`, ignoring ASCII case.
pub fn has_extension(name: &str, extension: &str) -> bool {
    let suffix_len = extension.len() + 1;
    name.len() > suffix_len
        && name
            .get(name.len() - suffix_len..)
            .is_some_and(|tail| {
                tail.starts_with('.') && tail[1..].eq_ignore_ascii_case(extension)
            })
}

/// True if the name is a single path component that cannot escape
/// the content directory.
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// The remote coordinator's catalog.
#[async_trait::async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch the full list of expected files.
    ///
    /// Fails with [`SyncError::Unavailable`] when offline or when the
    /// manifest cannot be retrieved or parsed.
    async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, SyncError>;

    /// Tell the coordinator a file could not be downloaded.
    /// Best-effort: implementations swallow their own failures.
    async fn report_issue(&self, filename: &str, error: &str, locator: &Url);
}

#[async_trait::async_trait]
impl<T: CatalogSource + ?Sized> CatalogSource for Arc<T> {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, SyncError> {
        (**self).fetch_catalog().await
    }

    async fn report_issue(&self, filename: &str, error: &str, locator: &Url) {
        (**self).report_issue(filename, error, locator).await
    }
}
