//! Run orchestration.
//!
//! One [`Engine::run`] pass is scan, prune, resolve (fanned out over worker
//! tasks), refresh, plan, sync. Resolution failures degrade to per-file
//! report entries; only an unreachable provider across the whole batch or a
//! denied link root aborts the run, and the cache is persisted either way so
//! partial progress is never lost.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use marquee_model::{ExternalId, SourceFile, UnresolvedEntry, UnresolvedReason};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::RecordCache;
use crate::error::{EngineError, Result};
use crate::parser::{NameParser, Stoplist};
use crate::planner::HierarchyPlanner;
use crate::provider::MetadataProvider;
use crate::resolver::{Resolution, Resolver};
use crate::scan::LibraryScanner;
use crate::settings::EngineSettings;
use crate::sync::{SyncReport, TreeSynchronizer};

/// Summary of one pipeline run.
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// Video files discovered by the scan.
    pub scanned: usize,
    /// Files with a usable resolution after this run, cache hits included.
    pub resolved: usize,
    /// Files the run could not resolve, with the reason each.
    pub unresolved: Vec<UnresolvedEntry>,
    /// Stale metadata records re-fetched this run.
    pub refreshed: usize,
    /// Cache entries dropped because their source file vanished.
    pub pruned: usize,
    /// Link tree reconciliation summary; `None` when the run stopped before
    /// touching the tree.
    pub sync: Option<SyncReport>,
    pub cancelled: bool,
}

enum FileOutcome {
    Resolved,
    Unresolved(UnresolvedEntry),
    Cancelled,
}

/// Ties the scanner, parser, resolver, planner, and synchronizer together.
#[derive(Debug)]
pub struct Engine {
    settings: EngineSettings,
    cache: Arc<RecordCache>,
    resolver: Resolver,
    parser: NameParser,
    cancel: CancellationToken,
}

impl Engine {
    /// Build an engine, loading (or starting) the cache at the configured
    /// path. The token cancels provider calls and skips the tree mutation
    /// stages; already-cached results are still persisted.
    pub async fn new(
        settings: EngineSettings,
        provider: Arc<dyn MetadataProvider>,
        cancel: CancellationToken,
    ) -> Self {
        let cache = Arc::new(RecordCache::load(&settings.cache_path).await);
        let gate = Arc::new(Semaphore::new(settings.provider_concurrency.max(1)));
        let resolver = Resolver::new(
            provider,
            Arc::clone(&cache),
            settings.scoring.clone(),
            settings.retry.clone(),
            gate,
            cancel.clone(),
        );
        let parser = NameParser::with_stoplist(Stoplist::with_extra(
            &settings.extra_stop_tokens,
        ));
        Self {
            settings,
            cache,
            resolver,
            parser,
            cancel,
        }
    }

    /// Execute one full pass.
    pub async fn run(&self) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();

        let scanner = LibraryScanner::new(
            self.settings.library_roots.clone(),
            &self.settings.video_extensions,
        );
        let files = scanner.scan().await;
        report.scanned = files.len();

        let existing: HashSet<PathBuf> =
            files.iter().map(|f| f.path().to_path_buf()).collect();
        let (pruned, _) = self.cache.prune_missing(&existing).await;
        report.pruned = pruned;

        let outcomes: Vec<FileOutcome> = futures::stream::iter(&files)
            .map(|file| self.process_file(file))
            .buffer_unordered(self.settings.worker_concurrency.max(1))
            .collect()
            .await;

        let mut provider_failures = 0usize;
        let mut provider_attempts = 0usize;
        for outcome in outcomes {
            match outcome {
                FileOutcome::Resolved => {
                    report.resolved += 1;
                    provider_attempts += 1;
                }
                FileOutcome::Unresolved(entry) => {
                    if !matches!(
                        entry.reason,
                        UnresolvedReason::UnparsableName
                    ) {
                        provider_attempts += 1;
                    }
                    if matches!(
                        entry.reason,
                        UnresolvedReason::ProviderUnavailable
                    ) {
                        provider_failures += 1;
                    }
                    report.unresolved.push(entry);
                }
                FileOutcome::Cancelled => report.cancelled = true,
            }
        }
        report.unresolved.sort_by(|a, b| a.path.cmp(&b.path));

        if !self.cancel.is_cancelled() {
            match self
                .resolver
                .refresh_stale(self.settings.refresh_age_days)
                .await
            {
                Ok(refreshed) => report.refreshed = refreshed,
                // Cancellation mid-refresh must still reach the persist
                // below; the resolved progress is already in the cache.
                Err(EngineError::Cancelled) => report.cancelled = true,
                Err(err) => return Err(err),
            }
        }

        // Partial progress survives whatever happens next.
        self.cache.persist().await?;

        // Every provider-needing file failed to reach the provider: treat
        // the provider as down and leave the link tree exactly as it was.
        if provider_attempts > 0 && provider_failures == provider_attempts {
            warn!(
                failures = provider_failures,
                "no file reached the metadata provider, halting before sync"
            );
            return Err(EngineError::ProviderOutage);
        }

        if self.cancel.is_cancelled() {
            report.cancelled = true;
            info!("run cancelled, leaving the link tree untouched");
            return Ok(report);
        }

        let resolved = self.cache.resolved().await;
        let planner = HierarchyPlanner::new(self.settings.planner.clone());
        let plan = planner.plan(&resolved);

        let synchronizer = TreeSynchronizer::new(
            self.settings.link_root.clone(),
            self.settings.library_roots.clone(),
            self.settings.relative_links,
        );
        let sync = synchronizer.sync(&plan).await?;
        info!(
            scanned = report.scanned,
            resolved = report.resolved,
            unresolved = report.unresolved.len(),
            links = plan.len(),
            created = sync.created,
            removed = sync.removed,
            "run complete"
        );
        report.sync = Some(sync);
        Ok(report)
    }

    async fn process_file(&self, file: &SourceFile) -> FileOutcome {
        let query = match self.parser.parse(file.path()) {
            Ok(query) => query,
            Err(_) => {
                return FileOutcome::Unresolved(UnresolvedEntry::new(
                    file.path().to_path_buf(),
                    UnresolvedReason::UnparsableName,
                ));
            }
        };

        match self.resolver.resolve(file, &query).await {
            Ok(Resolution::Resolved { .. }) => FileOutcome::Resolved,
            Ok(Resolution::Ambiguous(candidates)) => {
                FileOutcome::Unresolved(UnresolvedEntry::new(
                    file.path().to_path_buf(),
                    UnresolvedReason::Ambiguous(candidates),
                ))
            }
            Ok(Resolution::NotFound) => {
                FileOutcome::Unresolved(UnresolvedEntry::new(
                    file.path().to_path_buf(),
                    UnresolvedReason::NotFound,
                ))
            }
            Err(EngineError::Cancelled) => FileOutcome::Cancelled,
            Err(err) => {
                warn!("{}: {err}", file.path().display());
                FileOutcome::Unresolved(UnresolvedEntry::new(
                    file.path().to_path_buf(),
                    UnresolvedReason::ProviderUnavailable,
                ))
            }
        }
    }

    /// Record a manual disambiguation decision for one file and persist it.
    pub async fn confirm(
        &self,
        file: &SourceFile,
        id: &ExternalId,
    ) -> Result<Resolution> {
        let resolution = self.resolver.confirm(file, id).await?;
        self.cache.persist().await?;
        Ok(resolution)
    }

    /// Forget a metadata record and all files mapped to it, forcing
    /// re-identification on the next run. Returns the number of file
    /// entries dropped.
    pub async fn purge(&self, id: &ExternalId) -> Result<usize> {
        let removed = self.cache.purge_record(id).await;
        self.cache.persist().await?;
        Ok(removed)
    }

    /// Shared handle to the underlying cache, for inspection tooling.
    pub fn cache(&self) -> Arc<RecordCache> {
        Arc::clone(&self.cache)
    }
}
