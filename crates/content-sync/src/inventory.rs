use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::catalog::{has_extension, is_safe_filename};
use crate::error::SyncError;

/// Suffix appended to a final filename while its download is in progress.
pub const PARTIAL_SUFFIX: &str = ".download";

/// Whether an on-disk entry is a finished file or an interrupted download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FileState {
    Complete,
    Partial,
}

/// One file found in the content directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileRecord {
    /// Final filename. Partial records carry the name with the suffix stripped.
    pub filename: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    pub state: FileState,
}

impl LocalFileRecord {
    pub fn is_complete(&self) -> bool {
        self.state == FileState::Complete
    }

    pub fn is_partial(&self) -> bool {
        self.state == FileState::Partial
    }
}

/// What exists on disk for one filename, queried once per decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    Absent,
    /// A partial artifact exists; `size` is the resume offset.
    Partial { size: u64 },
    Complete { size: u64 },
}

/// Naming rules for the local content directory.
///
/// Final files are `<name>.<ext>`; in-progress downloads are
/// `<name>.<ext>.download` next to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLayout {
    dir: PathBuf,
    extension: String,
}

impl ContentLayout {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension: String = extension.into();
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_owned(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn final_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    pub fn partial_path(&self, filename: &str) -> PathBuf {
        self.dir.join(format!("{filename}{PARTIAL_SUFFIX}"))
    }

    /// Create the content directory if it does not exist yet.
    pub fn ensure_dir(&self) -> Result<(), SyncError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| SyncError::filesystem(&format!("creating {}", self.dir.display()), &e))
    }

    /// Classify a directory entry name. Returns the final filename and state,
    /// or `None` for anything that is not content.
    pub fn classify(&self, entry_name: &str) -> Option<(String, FileState)> {
        if let Some(base) = entry_name.strip_suffix(PARTIAL_SUFFIX) {
            if has_extension(base, &self.extension) && is_safe_filename(base) {
                return Some((base.to_owned(), FileState::Partial));
            }
            return None;
        }

        if has_extension(entry_name, &self.extension) {
            Some((entry_name.to_owned(), FileState::Complete))
        } else {
            None
        }
    }

    /// Query what exists on disk for `filename`.
    ///
    /// A partial artifact takes precedence: if one exists, the download is
    /// still in progress regardless of any final file.
    pub fn artifact_state(&self, filename: &str) -> Result<ArtifactState, SyncError> {
        if let Some(size) = file_size(&self.partial_path(filename))? {
            return Ok(ArtifactState::Partial { size });
        }
        match file_size(&self.final_path(filename))? {
            Some(size) => Ok(ArtifactState::Complete { size }),
            None => Ok(ArtifactState::Absent),
        }
    }

    /// Remove the final file and any stray partial for `filename`.
    /// Returns how many files were removed. Missing files are not errors.
    pub fn remove_artifacts(&self, filename: &str) -> Result<usize, SyncError> {
        let mut removed = 0;
        for path in [self.final_path(filename), self.partial_path(filename)] {
            if remove_if_exists(&path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove the partial artifact for `filename`, if any.
    pub fn remove_partial(&self, filename: &str) -> Result<bool, SyncError> {
        remove_if_exists(&self.partial_path(filename))
    }
}

/// Enumerate the content directory once.
///
/// A missing directory yields an empty inventory; creating it is the
/// orchestrator's job.
pub fn scan(layout: &ContentLayout) -> Result<Vec<LocalFileRecord>, SyncError> {
    let entries = match std::fs::read_dir(layout.dir()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(SyncError::filesystem(
                &format!("reading {}", layout.dir().display()),
                &e,
            ));
        }
    };

    let mut records = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|e| SyncError::filesystem("reading directory entry", &e))?;

        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            tracing::debug!(name = ?entry.file_name(), "skipping non-UTF-8 directory entry");
            continue;
        };

        let Some((filename, state)) = layout.classify(&name) else {
            continue;
        };

        let metadata = match entry.metadata() {
            Ok(m) => m,
            // Removed between listing and stat.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(SyncError::filesystem(&format!("stat {name}"), &e)),
        };

        if !metadata.is_file() {
            continue;
        }

        records.push(LocalFileRecord {
            filename,
            size_bytes: metadata.len(),
            modified_at: metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_default(),
            state,
        });
    }

    records.sort_by(|a, b| a.filename.cmp(&b.filename).then(state_rank(a).cmp(&state_rank(b))));
    tracing::debug!(dir = %layout.dir().display(), records = records.len(), "scanned content directory");
    Ok(records)
}

fn state_rank(record: &LocalFileRecord) -> u8 {
    match record.state {
        FileState::Complete => 0,
        FileState::Partial => 1,
    }
}

fn file_size(path: &Path) -> Result<Option<u64>, SyncError> {
    match std::fs::metadata(path) {
        Ok(m) if m.is_file() => Ok(Some(m.len())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SyncError::filesystem(&format!("stat {}", path.display()), &e)),
    }
}

fn remove_if_exists(path: &Path) -> Result<bool, SyncError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SyncError::filesystem(&format!("removing {}", path.display()), &e)),
    }
}
