//! Candidate scoring and selection.
//!
//! The resolver maps a parsed query to exactly one metadata record, or
//! surfaces the ambiguity instead of guessing. Provider ranking is not
//! trusted; candidates are re-scored locally from title similarity, year
//! agreement, and a small vote-count bonus that orders near-equal results
//! without ever deciding between them.

use std::future::Future;
use std::sync::Arc;

use marquee_model::{
    Confidence, ExternalId, MetadataRecord, ParsedQuery, ResolutionEntry,
    SourceFile,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::RecordCache;
use crate::error::{EngineError, Result};
use crate::provider::{MetadataProvider, ProviderError};
use crate::settings::{RetryPolicy, ScoringSettings};

/// Outcome of resolving one file.
#[derive(Debug, Clone)]
pub enum Resolution {
    Resolved {
        entry: ResolutionEntry,
        record: MetadataRecord,
    },
    /// No clear winner; carries the ranked top-N candidates so an outer
    /// layer can ask the user and feed the decision back via
    /// [`Resolver::confirm`].
    Ambiguous(Vec<MetadataRecord>),
    /// The provider had no candidate above the similarity floor.
    NotFound,
}

enum RetryOutcome<T> {
    Ok(T),
    /// Non-retryable provider error (unknown id).
    Rejected(ProviderError),
    /// Retries exhausted on transient errors.
    Exhausted(ProviderError),
}

/// Maps parsed queries to metadata records, consulting the cache first and
/// the provider second. Provider calls go through a shared semaphore so the
/// collective request rate stays within quota regardless of how many worker
/// tasks run concurrently.
pub struct Resolver {
    provider: Arc<dyn MetadataProvider>,
    cache: Arc<RecordCache>,
    scoring: ScoringSettings,
    retry: RetryPolicy,
    gate: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("scoring", &self.scoring)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    pub fn new(
        provider: Arc<dyn MetadataProvider>,
        cache: Arc<RecordCache>,
        scoring: ScoringSettings,
        retry: RetryPolicy,
        gate: Arc<Semaphore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            cache,
            scoring,
            retry,
            gate,
            cancel,
        }
    }

    /// Resolve one file: cached entry if the file is unchanged, otherwise a
    /// provider query. A successful resolution is written back to the cache;
    /// a failed one leaves any prior entry untouched.
    pub async fn resolve(
        &self,
        file: &SourceFile,
        query: &ParsedQuery,
    ) -> Result<Resolution> {
        if let Some((entry, record)) = self.cache.lookup(&file.identity).await {
            debug!("cache hit for {}", file.path().display());
            return Ok(Resolution::Resolved { entry, record });
        }

        if let Some(hint) = &file.id_hint {
            match self.fetch_with_retries(hint).await? {
                RetryOutcome::Ok(record) => {
                    return Ok(self
                        .accept(file, record, Confidence::Certain)
                        .await);
                }
                RetryOutcome::Rejected(err) => {
                    // Bad hint in a companion file; fall back to search.
                    warn!(
                        "id hint for {} rejected ({err}), falling back to \
                         title search",
                        file.path().display()
                    );
                }
                RetryOutcome::Exhausted(err) => {
                    return Err(EngineError::ProviderUnavailable(
                        err.to_string(),
                    ));
                }
            }
        }

        let candidates = match self.search_with_retries(query).await? {
            RetryOutcome::Ok(candidates) => candidates,
            RetryOutcome::Rejected(err) | RetryOutcome::Exhausted(err) => {
                return Err(EngineError::ProviderUnavailable(err.to_string()));
            }
        };

        let mut scored = self.score(query, candidates);
        if scored.is_empty() {
            self.drop_stale_entry(file).await;
            return Ok(Resolution::NotFound);
        }

        let top_score = scored[0].0;
        let lead = top_score - scored.get(1).map_or(0.0, |(s, _)| *s);
        if top_score >= self.scoring.confidence_threshold
            && (scored.len() == 1 || lead >= self.scoring.lead_margin)
        {
            let (_, record) = scored.swap_remove(0);
            return Ok(self
                .accept(file, record, Confidence::Scored(top_score))
                .await);
        }

        self.drop_stale_entry(file).await;
        scored.truncate(self.scoring.ambiguous_top_n);
        Ok(Resolution::Ambiguous(
            scored.into_iter().map(|(_, record)| record).collect(),
        ))
    }

    /// Apply a manual disambiguation decision: fetch the chosen id and store
    /// it with certain confidence.
    pub async fn confirm(
        &self,
        file: &SourceFile,
        id: &ExternalId,
    ) -> Result<Resolution> {
        match self.fetch_with_retries(id).await? {
            RetryOutcome::Ok(record) => {
                Ok(self.accept(file, record, Confidence::Certain).await)
            }
            RetryOutcome::Rejected(_) => Ok(Resolution::NotFound),
            RetryOutcome::Exhausted(err) => {
                Err(EngineError::ProviderUnavailable(err.to_string()))
            }
        }
    }

    /// Re-fetch records older than `max_age_days`. Stops early when the
    /// provider goes unavailable or the run is cancelled; stale data is
    /// still usable data. Returns the number of refreshed records.
    pub async fn refresh_stale(&self, max_age_days: i64) -> Result<usize> {
        if max_age_days <= 0 {
            return Ok(0);
        }
        let stale = self.cache.stale_record_ids(max_age_days).await;
        let mut refreshed = 0;
        for id in stale {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.fetch_with_retries(&id).await? {
                RetryOutcome::Ok(record) => {
                    self.cache.update_record(record).await;
                    refreshed += 1;
                }
                RetryOutcome::Rejected(err) => {
                    warn!("cannot refresh {id}: {err}");
                }
                RetryOutcome::Exhausted(err) => {
                    warn!("provider unavailable during refresh ({err})");
                    break;
                }
            }
        }
        Ok(refreshed)
    }

    /// A changed file that now classifies as ambiguous or not-found must not
    /// keep planning links from its previous resolution. Provider failures
    /// never reach this point, so an outage leaves prior entries intact.
    async fn drop_stale_entry(&self, file: &SourceFile) {
        if self.cache.invalidate(file.path()).await {
            debug!(
                "dropped stale resolution for {}",
                file.path().display()
            );
        }
    }

    async fn accept(
        &self,
        file: &SourceFile,
        record: MetadataRecord,
        confidence: Confidence,
    ) -> Resolution {
        let entry = ResolutionEntry::new(
            file.identity.clone(),
            record.id.clone(),
            confidence,
        );
        self.cache.store(entry.clone(), record.clone()).await;
        debug!("{} resolved to {}", file.path().display(), record.short());
        Resolution::Resolved { entry, record }
    }

    /// Score, filter, and rank candidates: best first, ties broken by vote
    /// count, then by external id for determinism.
    fn score(
        &self,
        query: &ParsedQuery,
        candidates: Vec<MetadataRecord>,
    ) -> Vec<(f64, MetadataRecord)> {
        let wanted = normalize_title(&query.title);
        let mut scored: Vec<(f64, MetadataRecord)> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let similarity = strsim::jaro_winkler(
                    &wanted,
                    &normalize_title(&candidate.title),
                );
                if similarity < self.scoring.similarity_floor {
                    return None;
                }
                let mut score = self.scoring.title_weight * similarity;
                if query.year == Some(candidate.year) {
                    score += self.scoring.year_weight;
                }
                let votes = candidate.vote_count as f64;
                score += self.scoring.vote_weight * (votes / (votes + 5000.0));
                Some((score, candidate))
            })
            .collect();

        scored.sort_by(|(a_score, a), (b_score, b)| {
            b_score
                .total_cmp(a_score)
                .then_with(|| b.vote_count.cmp(&a.vote_count))
                .then_with(|| a.id.cmp(&b.id))
        });
        scored
    }

    async fn search_with_retries(
        &self,
        query: &ParsedQuery,
    ) -> Result<RetryOutcome<Vec<MetadataRecord>>> {
        self.with_retries(|| {
            self.provider.search(&query.title, query.year)
        })
        .await
    }

    async fn fetch_with_retries(
        &self,
        id: &ExternalId,
    ) -> Result<RetryOutcome<MetadataRecord>> {
        self.with_retries(|| self.provider.fetch(id)).await
    }

    /// Run a provider call under the rate gate, retrying transient failures
    /// with exponential backoff. Cancellation stops new attempts
    /// immediately.
    async fn with_retries<T, F, Fut>(
        &self,
        mut op: F,
    ) -> Result<RetryOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let mut last_err = None;
        for attempt in 0..self.retry.max_attempts {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if attempt > 0 {
                let delay = self.retry.delay_after(attempt - 1);
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        return Err(EngineError::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| EngineError::Cancelled)?;
            match op().await {
                Ok(value) => return Ok(RetryOutcome::Ok(value)),
                Err(err) if !err.is_retryable() => {
                    return Ok(RetryOutcome::Rejected(err));
                }
                Err(err) => {
                    debug!(
                        attempt,
                        "provider call failed ({err}), backing off"
                    );
                    last_err = Some(err);
                }
            }
        }
        // max_attempts >= 1, so last_err is set when we get here.
        Ok(RetryOutcome::Exhausted(
            last_err.unwrap_or(ProviderError::Timeout),
        ))
    }
}

/// Lowercase, strip punctuation, collapse whitespace. Keeps similarity
/// scoring insensitive to separator and casing noise.
fn normalize_title(title: &str) -> String {
    let lowered: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use marquee_model::FileIdentity;

    use super::*;

    type SearchResult = std::result::Result<Vec<MetadataRecord>, ProviderError>;

    /// Scripted provider fake: pops one search response per call.
    struct ScriptedProvider {
        responses: Mutex<VecDeque<SearchResult>>,
        by_id: HashMap<ExternalId, MetadataRecord>,
        search_calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<SearchResult>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                by_id: HashMap::new(),
                search_calls: AtomicUsize::new(0),
            }
        }

        fn with_fetch(mut self, record: MetadataRecord) -> Self {
            self.by_id.insert(record.id.clone(), record);
            self
        }

        fn searches(&self) -> usize {
            self.search_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MetadataProvider for ScriptedProvider {
        async fn search(
            &self,
            _title: &str,
            _year: Option<u16>,
        ) -> SearchResult {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn fetch(
            &self,
            id: &ExternalId,
        ) -> std::result::Result<MetadataRecord, ProviderError> {
            self.by_id
                .get(id)
                .cloned()
                .ok_or_else(|| ProviderError::UnknownId(id.clone()))
        }
    }

    fn record(id: &str, title: &str, year: u16, votes: u64) -> MetadataRecord {
        MetadataRecord {
            id: ExternalId::new(id),
            title: title.to_string(),
            year,
            genres: vec!["Drama".to_string()],
            cast: Vec::new(),
            directors: Vec::new(),
            poster_url: None,
            vote_count: votes,
            popularity: votes as f64,
            runtime_minutes: Some(120),
            fetched_at: Utc::now(),
        }
    }

    fn source_file(path: &str) -> SourceFile {
        SourceFile::new(FileIdentity::new(
            PathBuf::from(path),
            Utc::now(),
            4096,
        ))
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    async fn resolver_with(
        provider: ScriptedProvider,
    ) -> (Resolver, Arc<RecordCache>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache =
            Arc::new(RecordCache::load(dir.path().join("test.cache")).await);
        let resolver = Resolver::new(
            Arc::new(provider),
            Arc::clone(&cache),
            ScoringSettings::default(),
            fast_retry(),
            Arc::new(Semaphore::new(2)),
            CancellationToken::new(),
        );
        (resolver, cache, dir)
    }

    #[tokio::test]
    async fn selects_clear_winner_and_caches_it() {
        let provider = ScriptedProvider::new(vec![Ok(vec![
            record("tt0113277", "Heat", 1995, 700_000),
            record("tt0068696", "Heat", 1972, 500),
        ])]);
        let (resolver, cache, _dir) = resolver_with(provider).await;

        let file = source_file("/movies/Heat.1995.mkv");
        let query = ParsedQuery::new("Heat").with_year(1995);
        let resolution = resolver.resolve(&file, &query).await.unwrap();

        match resolution {
            Resolution::Resolved { record, entry } => {
                assert_eq!(record.id, ExternalId::new("tt0113277"));
                assert!(matches!(entry.confidence, Confidence::Scored(_)));
            }
            other => panic!("expected Resolved, got {other:?}"),
        }
        assert!(cache.lookup(&file.identity).await.is_some());
    }

    #[tokio::test]
    async fn near_equal_candidates_without_year_are_ambiguous() {
        // Same title, different years, no year token in the query: the vote
        // bonus orders them but must not pick one.
        let provider = ScriptedProvider::new(vec![Ok(vec![
            record("tt0113277", "Heat", 1995, 700_000),
            record("tt0068696", "Heat", 1972, 650_000),
        ])]);
        let (resolver, _cache, _dir) = resolver_with(provider).await;

        let file = source_file("/movies/Heat.mkv");
        let resolution = resolver
            .resolve(&file, &ParsedQuery::new("Heat"))
            .await
            .unwrap();

        match resolution {
            Resolution::Ambiguous(candidates) => {
                assert_eq!(candidates.len(), 2);
                // Ranked: higher vote count first.
                assert_eq!(candidates[0].id, ExternalId::new("tt0113277"));
            }
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_candidate_below_similarity_floor_is_not_found() {
        let provider = ScriptedProvider::new(vec![Ok(vec![record(
            "tt0000001",
            "Zebras of Borneo",
            2001,
            9999,
        )])]);
        let (resolver, _cache, _dir) = resolver_with(provider).await;

        let file = source_file("/movies/Playtime.1967.mkv");
        let resolution = resolver
            .resolve(&file, &ParsedQuery::new("Playtime").with_year(1967))
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::NotFound));
    }

    #[tokio::test]
    async fn empty_candidate_list_is_not_found() {
        let provider = ScriptedProvider::new(vec![Ok(Vec::new())]);
        let (resolver, _cache, _dir) = resolver_with(provider).await;

        let file = source_file("/movies/Obscurity.mkv");
        let resolution = resolver
            .resolve(&file, &ParsedQuery::new("Obscurity"))
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::NotFound));
    }

    #[tokio::test]
    async fn unchanged_file_skips_the_provider() {
        let provider =
            ScriptedProvider::new(vec![Err(ProviderError::Timeout)]);
        let (resolver, cache, _dir) = resolver_with(provider).await;

        let file = source_file("/movies/Playtime.1967.mkv");
        let rec = record("tt0062136", "Playtime", 1967, 50_000);
        cache
            .store(
                ResolutionEntry::new(
                    file.identity.clone(),
                    rec.id.clone(),
                    Confidence::Certain,
                ),
                rec,
            )
            .await;

        let resolution = resolver
            .resolve(&file, &ParsedQuery::new("Playtime").with_year(1967))
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Resolved { .. }));
    }

    #[tokio::test]
    async fn changed_file_turning_ambiguous_drops_its_old_entry() {
        let provider = ScriptedProvider::new(vec![Ok(vec![
            record("tt0113277", "Heat", 1995, 700_000),
            record("tt0068696", "Heat", 1972, 650_000),
        ])]);
        let (resolver, cache, _dir) = resolver_with(provider).await;

        let old_file = source_file("/movies/Heat.mkv");
        let rec = record("tt0113277", "Heat", 1995, 700_000);
        cache
            .store(
                ResolutionEntry::new(
                    old_file.identity.clone(),
                    rec.id.clone(),
                    Confidence::Certain,
                ),
                rec,
            )
            .await;

        let mut changed = old_file.clone();
        changed.identity.modified =
            old_file.identity.modified + chrono::Duration::seconds(60);

        let resolution = resolver
            .resolve(&changed, &ParsedQuery::new("Heat"))
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Ambiguous(_)));
        // The old resolution must not feed the planner anymore.
        assert!(cache.resolved().await.is_empty());
    }

    #[tokio::test]
    async fn changed_file_turning_not_found_drops_its_old_entry() {
        let provider = ScriptedProvider::new(vec![Ok(Vec::new())]);
        let (resolver, cache, _dir) = resolver_with(provider).await;

        let old_file = source_file("/movies/Obscurity.mkv");
        let rec = record("tt0000042", "Obscurity", 1990, 10);
        cache
            .store(
                ResolutionEntry::new(
                    old_file.identity.clone(),
                    rec.id.clone(),
                    Confidence::Certain,
                ),
                rec,
            )
            .await;

        let mut changed = old_file.clone();
        changed.identity.modified =
            old_file.identity.modified + chrono::Duration::seconds(60);

        let resolution = resolver
            .resolve(&changed, &ParsedQuery::new("Obscurity"))
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::NotFound));
        assert!(cache.resolved().await.is_empty());
    }

    #[tokio::test]
    async fn retries_exhausted_surface_provider_unavailable() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Timeout),
            Err(ProviderError::RateLimited),
            Err(ProviderError::Timeout),
        ]);
        let (resolver, cache, _dir) = resolver_with(provider).await;

        // A prior entry for the same path under an older mtime must survive
        // the failed attempt.
        let old_file = source_file("/movies/Playtime.1967.mkv");
        let rec = record("tt0062136", "Playtime", 1967, 50_000);
        cache
            .store(
                ResolutionEntry::new(
                    old_file.identity.clone(),
                    rec.id.clone(),
                    Confidence::Certain,
                ),
                rec,
            )
            .await;

        let mut changed = old_file.clone();
        changed.identity.modified =
            old_file.identity.modified + chrono::Duration::seconds(60);

        let err = resolver
            .resolve(&changed, &ParsedQuery::new("Playtime").with_year(1967))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ProviderUnavailable(_)));
        assert!(cache.lookup(&old_file.identity).await.is_some());
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_retry() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::RateLimited),
            Ok(vec![record("tt0062136", "Playtime", 1967, 50_000)]),
        ]);
        let (resolver, _cache, _dir) = resolver_with(provider).await;

        let file = source_file("/movies/Playtime.1967.mkv");
        let resolution = resolver
            .resolve(&file, &ParsedQuery::new("Playtime").with_year(1967))
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Resolved { .. }));
    }

    #[tokio::test]
    async fn id_hint_resolves_without_search() {
        let rec = record("tt0062136", "Playtime", 1967, 50_000);
        let provider = ScriptedProvider::new(Vec::new()).with_fetch(rec);
        let (resolver, _cache, _dir) = resolver_with(provider).await;

        let file = SourceFile::with_hint(
            FileIdentity::new(
                PathBuf::from("/movies/pt.mkv"),
                Utc::now(),
                4096,
            ),
            ExternalId::new("tt0062136"),
        );
        let resolution = resolver
            .resolve(&file, &ParsedQuery::new("pt"))
            .await
            .unwrap();

        match resolution {
            Resolution::Resolved { entry, .. } => {
                assert!(matches!(entry.confidence, Confidence::Certain));
            }
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_token_stops_new_queries() {
        let provider = ScriptedProvider::new(vec![Ok(vec![record(
            "tt0062136",
            "Playtime",
            1967,
            50_000,
        )])]);
        let dir = tempfile::tempdir().unwrap();
        let cache =
            Arc::new(RecordCache::load(dir.path().join("test.cache")).await);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let provider = Arc::new(provider);
        let resolver = Resolver::new(
            Arc::clone(&provider) as Arc<dyn MetadataProvider>,
            cache,
            ScoringSettings::default(),
            fast_retry(),
            Arc::new(Semaphore::new(2)),
            cancel,
        );

        let file = source_file("/movies/Playtime.1967.mkv");
        let err = resolver
            .resolve(&file, &ParsedQuery::new("Playtime"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(provider.searches(), 0);
    }

    #[test]
    fn title_normalization_ignores_separators_and_case() {
        assert_eq!(
            normalize_title("The  Good, the Bad & the Ugly"),
            "the good the bad the ugly"
        );
    }
}
