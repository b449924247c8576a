use std::collections::HashSet;

use crate::catalog::CatalogEntry;
use crate::inventory::LocalFileRecord;

/// The difference between what the catalog wants and what is on disk.
///
/// `to_fetch` and `to_delete` never share a filename: a name is fetched only
/// when no complete local copy exists, and deleted only when it is a complete
/// copy absent from the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub to_fetch: Vec<CatalogEntry>,
    pub to_delete: Vec<LocalFileRecord>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_fetch.is_empty() && self.to_delete.is_empty()
    }
}

/// Compute the plan for one cycle. Pure and deterministic.
///
/// - Catalog duplicates are collapsed to their first occurrence.
/// - A complete local file matching a catalog entry is left alone; presence
///   is enough, nothing is hashed.
/// - Partial files are never scheduled for deletion so an interrupted
///   download can still resume after a catalog edit.
pub fn plan(catalog: &[CatalogEntry], local: &[LocalFileRecord]) -> SyncPlan {
    let complete: HashSet<&str> = local
        .iter()
        .filter(|record| record.is_complete())
        .map(|record| record.filename.as_str())
        .collect();

    let mut seen = HashSet::new();
    let to_fetch = catalog
        .iter()
        .filter(|entry| seen.insert(entry.filename.as_str()))
        .filter(|entry| !complete.contains(entry.filename.as_str()))
        .cloned()
        .collect();

    let to_delete = local
        .iter()
        .filter(|record| record.is_complete())
        .filter(|record| !seen.contains(record.filename.as_str()))
        .cloned()
        .collect();

    SyncPlan {
        to_fetch,
        to_delete,
    }
}
