//! Link tree reconciliation.
//!
//! Diffs the desired link set against the on-disk tree and applies minimal
//! create/repoint/delete operations. The pass is idempotent and best-effort:
//! a denied entry is recorded and skipped, never aborting the batch.
//!
//! Ownership rule: only symlinks whose target resolves under one of the
//! scanned library roots (or which are broken) are considered ours and may
//! be removed. Ordinary files, directories, and foreign symlinks are left
//! alone.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use marquee_model::LinkPlanEntry;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

/// One reconciliation decision for a link path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Create { target: PathBuf },
    Repoint { target: PathBuf },
    Delete,
    Keep,
}

/// A non-fatal per-entry failure recorded during the pass.
#[derive(Debug, Clone)]
pub struct SyncFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Mutation counts and failures for one synchronization pass. A second run
/// with unchanged input reports zero mutations.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub created: usize,
    pub repointed: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn mutations(&self) -> usize {
        self.created + self.repointed + self.removed
    }
}

/// Applies a link plan to the filesystem.
#[derive(Debug, Clone)]
pub struct TreeSynchronizer {
    link_root: PathBuf,
    library_roots: Vec<PathBuf>,
    relative_links: bool,
}

impl TreeSynchronizer {
    pub fn new(
        link_root: PathBuf,
        library_roots: Vec<PathBuf>,
        relative_links: bool,
    ) -> Self {
        Self {
            link_root,
            library_roots,
            relative_links,
        }
    }

    /// Reconcile the tree under the link root with `desired`.
    ///
    /// Fails only when the link root itself is unreachable; everything else
    /// degrades to per-entry failures in the report.
    pub async fn sync(&self, desired: &[LinkPlanEntry]) -> Result<SyncReport> {
        tokio::fs::create_dir_all(&self.link_root)
            .await
            .map_err(|e| EngineError::denied(&self.link_root, e))?;

        let mut report = SyncReport::default();

        let desired: BTreeMap<PathBuf, PathBuf> = desired
            .iter()
            .map(|entry| {
                (
                    self.link_root.join(&entry.link),
                    lexical_normalize(&entry.target),
                )
            })
            .collect();

        let existing = self.collect_links(&mut report).await;
        let actions = self.plan_actions(&desired, &existing);

        let mut deleted_parents: Vec<PathBuf> = Vec::new();
        for (link, action) in actions {
            match action {
                SyncAction::Keep => report.unchanged += 1,
                SyncAction::Create { target } => {
                    self.apply_create(&link, &target, &mut report).await;
                }
                SyncAction::Repoint { target } => {
                    self.apply_repoint(&link, &target, &mut report).await;
                }
                SyncAction::Delete => {
                    self.apply_delete(&link, &mut report).await;
                    if let Some(parent) = link.parent() {
                        deleted_parents.push(parent.to_path_buf());
                    }
                }
            }
        }

        self.prune_emptied_dirs(deleted_parents).await;

        debug!(
            created = report.created,
            repointed = report.repointed,
            removed = report.removed,
            unchanged = report.unchanged,
            failures = report.failures.len(),
            "synchronization pass complete"
        );
        Ok(report)
    }

    /// Pure reconciliation over the two sorted maps. Foreign symlinks inside
    /// the tree produce no action at all.
    fn plan_actions(
        &self,
        desired: &BTreeMap<PathBuf, PathBuf>,
        existing: &BTreeMap<PathBuf, PathBuf>,
    ) -> Vec<(PathBuf, SyncAction)> {
        let mut actions = Vec::new();

        for (link, raw_target) in existing {
            let resolved = resolve_link_target(link, raw_target);
            match desired.get(link) {
                Some(want) if *want == resolved => {
                    actions.push((link.clone(), SyncAction::Keep));
                }
                Some(want) => {
                    actions.push((
                        link.clone(),
                        SyncAction::Repoint {
                            target: want.clone(),
                        },
                    ));
                }
                None => {
                    if self.owns(&resolved) {
                        actions.push((link.clone(), SyncAction::Delete));
                    } else {
                        debug!(
                            "leaving foreign symlink {} alone",
                            link.display()
                        );
                    }
                }
            }
        }

        for (link, target) in desired {
            if !existing.contains_key(link) {
                actions.push((
                    link.clone(),
                    SyncAction::Create {
                        target: target.clone(),
                    },
                ));
            }
        }

        actions
    }

    /// Walk the link tree collecting `link -> raw target` for every symlink.
    /// Does not follow symlinks.
    async fn collect_links(
        &self,
        report: &mut SyncReport,
    ) -> BTreeMap<PathBuf, PathBuf> {
        let mut links = BTreeMap::new();
        let mut stack = vec![self.link_root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    record_failure(report, &dir, &err);
                    continue;
                }
            };
            loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let path = entry.path();
                        let file_type = match entry.file_type().await {
                            Ok(ft) => ft,
                            Err(err) => {
                                record_failure(report, &path, &err);
                                continue;
                            }
                        };
                        if file_type.is_symlink() {
                            match tokio::fs::read_link(&path).await {
                                Ok(target) => {
                                    links.insert(path, target);
                                }
                                Err(err) => {
                                    record_failure(report, &path, &err);
                                }
                            }
                        } else if file_type.is_dir() {
                            stack.push(path);
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        record_failure(report, &dir, &err);
                        break;
                    }
                }
            }
        }
        links
    }

    /// A link is ours when its target resolves under a library root, or when
    /// it dangles (its movie was deleted, which is exactly the case where we
    /// must clean up).
    fn owns(&self, resolved_target: &Path) -> bool {
        self.library_roots
            .iter()
            .any(|root| resolved_target.starts_with(root))
            || !resolved_target.exists()
    }

    async fn apply_create(
        &self,
        link: &Path,
        target: &Path,
        report: &mut SyncReport,
    ) {
        if let Some(parent) = link.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                record_failure(report, link, &err);
                return;
            }
        }
        match make_symlink(&self.link_target(link, target), link).await {
            Ok(()) => report.created += 1,
            Err(err) => record_failure(report, link, &err),
        }
    }

    async fn apply_repoint(
        &self,
        link: &Path,
        target: &Path,
        report: &mut SyncReport,
    ) {
        if let Err(err) = tokio::fs::remove_file(link).await {
            record_failure(report, link, &err);
            return;
        }
        match make_symlink(&self.link_target(link, target), link).await {
            Ok(()) => report.repointed += 1,
            Err(err) => record_failure(report, link, &err),
        }
    }

    async fn apply_delete(&self, link: &Path, report: &mut SyncReport) {
        match tokio::fs::remove_file(link).await {
            Ok(()) => report.removed += 1,
            Err(err) => record_failure(report, link, &err),
        }
    }

    /// Remove directories we emptied, climbing towards the link root and
    /// stopping at the first non-empty ancestor. Never removes the root.
    async fn prune_emptied_dirs(&self, mut parents: Vec<PathBuf>) {
        parents.sort();
        parents.dedup();
        for parent in parents {
            let mut dir = parent;
            while dir != self.link_root && dir.starts_with(&self.link_root) {
                // remove_dir fails on non-empty directories, which is the
                // stop condition.
                if tokio::fs::remove_dir(&dir).await.is_err() {
                    break;
                }
                match dir.parent() {
                    Some(up) => dir = up.to_path_buf(),
                    None => break,
                }
            }
        }
    }

    /// Target value actually written into the symlink.
    fn link_target(&self, link: &Path, target: &Path) -> PathBuf {
        if self.relative_links {
            if let Some(parent) = link.parent() {
                return relative_walk_up(target, parent);
            }
        }
        target.to_path_buf()
    }
}

fn record_failure(report: &mut SyncReport, path: &Path, err: &std::io::Error) {
    warn!("sync failure at {}: {err}", path.display());
    report.failures.push(SyncFailure {
        path: path.to_path_buf(),
        message: err.to_string(),
    });
}

#[cfg(unix)]
async fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(windows)]
async fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink_file(target, link).await
}

/// Resolve a possibly-relative symlink target against the link's parent.
fn resolve_link_target(link: &Path, raw_target: &Path) -> PathBuf {
    if raw_target.is_absolute() {
        lexical_normalize(raw_target)
    } else {
        let base = link.parent().unwrap_or_else(|| Path::new("/"));
        lexical_normalize(&base.join(raw_target))
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Relative path from `base` to `target`, walking up as needed. Both paths
/// must be absolute and lexically normalized.
fn relative_walk_up(target: &Path, base: &Path) -> PathBuf {
    let target_parts: Vec<Component> = target.components().collect();
    let base_parts: Vec<Component> = base.components().collect();

    let common = target_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base_parts.len() {
        out.push("..");
    }
    for part in &target_parts[common..] {
        out.push(part);
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
