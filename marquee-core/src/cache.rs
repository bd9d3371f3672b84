//! Persisted resolution cache.
//!
//! Two maps: file identity to resolution entry, and external id to metadata
//! record. Many files may share one record (multi-part rips). The cache is a
//! single JSON document written atomically via a temp sibling and rename, so
//! a crash mid-write never leaves a truncated cache behind.
//!
//! Concurrency contract: concurrent reads, serialized writes, last write
//! wins per key. Each file resolves independently so no merge semantics are
//! needed.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use marquee_model::{ExternalId, FileIdentity, MetadataRecord, ResolutionEntry};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheInner {
    /// Keyed by source file path; the stored identity carries the mtime and
    /// size used for staleness checks.
    entries: HashMap<PathBuf, ResolutionEntry>,
    records: HashMap<ExternalId, MetadataRecord>,
}

/// Owned, passed-by-reference store of resolved mappings. Not a process-wide
/// singleton; the pipeline holds it in an `Arc` and hands references down.
#[derive(Debug)]
pub struct RecordCache {
    path: PathBuf,
    inner: RwLock<CacheInner>,
}

impl RecordCache {
    /// Read the cache file at `path`.
    ///
    /// A missing file starts an empty cache; an unreadable or malformed one
    /// is treated the same but logged as a warning, forcing re-resolution of
    /// everything rather than failing the run.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let inner = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<CacheInner>(&bytes) {
                Ok(inner) => {
                    debug!(
                        entries = inner.entries.len(),
                        records = inner.records.len(),
                        "loaded resolution cache from {}",
                        path.display()
                    );
                    inner
                }
                Err(err) => {
                    let corrupt = EngineError::CacheCorrupt(err.to_string());
                    warn!(
                        "{corrupt} at {}, starting with an empty cache",
                        path.display()
                    );
                    CacheInner::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "cache file {} not found, starting with an empty cache",
                    path.display()
                );
                CacheInner::default()
            }
            Err(err) => {
                warn!(
                    "cache file {} is unreadable ({err}), starting with an \
                     empty cache",
                    path.display()
                );
                CacheInner::default()
            }
        };
        Self {
            path,
            inner: RwLock::new(inner),
        }
    }

    /// Write the cache to disk: serialize into a `.newcache` sibling, then
    /// rename over the target.
    pub async fn persist(&self) -> Result<()> {
        let inner = self.inner.read().await;
        let bytes = serde_json::to_vec(&*inner)?;
        drop(inner);

        let staging = self.path.with_extension("newcache");
        tokio::fs::write(&staging, &bytes).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        debug!("wrote resolution cache to {}", self.path.display());
        Ok(())
    }

    /// Return the cached resolution for this identity, or `None` when the
    /// file is unknown or changed since the entry was stored.
    pub async fn lookup(
        &self,
        identity: &FileIdentity,
    ) -> Option<(ResolutionEntry, MetadataRecord)> {
        let inner = self.inner.read().await;
        let entry = inner.entries.get(&identity.path)?;
        if !entry.identity.is_unchanged(identity) {
            return None;
        }
        let record = inner.records.get(&entry.record_id)?;
        Some((entry.clone(), record.clone()))
    }

    /// Insert or overwrite the resolution for one file, last write wins.
    pub async fn store(&self, entry: ResolutionEntry, record: MetadataRecord) {
        let mut inner = self.inner.write().await;
        inner.records.insert(record.id.clone(), record);
        inner.entries.insert(entry.identity.path.clone(), entry);
    }

    /// Drop the entry for this path. Returns whether one existed.
    pub async fn invalidate(&self, path: &Path) -> bool {
        let mut inner = self.inner.write().await;
        inner.entries.remove(path).is_some()
    }

    /// Drop a record and every entry referencing it, forcing those files to
    /// re-identify on the next run. Returns the number of entries removed.
    pub async fn purge_record(&self, id: &ExternalId) -> usize {
        let mut inner = self.inner.write().await;
        inner.records.remove(id);
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.record_id != *id);
        before - inner.entries.len()
    }

    /// Replace a record in place, keeping all file entries pointing at it.
    pub async fn update_record(&self, record: MetadataRecord) {
        let mut inner = self.inner.write().await;
        inner.records.insert(record.id.clone(), record);
    }

    /// All current (entry, record) pairs, the planner's input.
    pub async fn resolved(&self) -> Vec<(ResolutionEntry, MetadataRecord)> {
        let inner = self.inner.read().await;
        inner
            .entries
            .values()
            .filter_map(|entry| {
                inner
                    .records
                    .get(&entry.record_id)
                    .map(|record| (entry.clone(), record.clone()))
            })
            .collect()
    }

    /// Every cached metadata record.
    pub async fn all_records(&self) -> Vec<MetadataRecord> {
        let inner = self.inner.read().await;
        inner.records.values().cloned().collect()
    }

    /// Ids of records older than `max_age_days`.
    pub async fn stale_record_ids(&self, max_age_days: i64) -> Vec<ExternalId> {
        let now = Utc::now();
        let inner = self.inner.read().await;
        inner
            .records
            .values()
            .filter(|record| record.age_days(now) >= max_age_days)
            .map(|record| record.id.clone())
            .collect()
    }

    /// Remove entries whose source path is gone, then records left with no
    /// referencing entry. Returns `(entries_removed, records_removed)`.
    pub async fn prune_missing(
        &self,
        existing: &HashSet<PathBuf>,
    ) -> (usize, usize) {
        let mut inner = self.inner.write().await;

        let entries_before = inner.entries.len();
        inner.entries.retain(|path, _| existing.contains(path));
        let entries_removed = entries_before - inner.entries.len();

        let referenced: HashSet<ExternalId> = inner
            .entries
            .values()
            .map(|entry| entry.record_id.clone())
            .collect();
        let records_before = inner.records.len();
        inner.records.retain(|id, _| referenced.contains(id));
        let records_removed = records_before - inner.records.len();

        if entries_removed > 0 || records_removed > 0 {
            debug!(
                entries_removed,
                records_removed, "pruned vanished files from cache"
            );
        }
        (entries_removed, records_removed)
    }

    pub async fn entry_count(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}
