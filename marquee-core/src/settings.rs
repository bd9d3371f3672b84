//! Engine configuration knobs.
//!
//! Keeping the defaults in one place allows an outer CLI/config layer to
//! expose user-facing configuration later without diverging from the core's
//! filtering and scoring rules.

use std::path::PathBuf;
use std::time::Duration;

use marquee_model::LinkAxis;
use serde::Deserialize;

/// File extensions treated as video files during a scan.
pub const DEFAULT_VIDEO_FILE_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "webm", "flv", "wmv", "m4v", "mpg", "mpeg",
];

/// Convenience helper for consumers that work with owned strings (e.g.
/// config deserialisation layers).
pub fn default_video_file_extensions_vec() -> Vec<String> {
    DEFAULT_VIDEO_FILE_EXTENSIONS
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

/// Retry behaviour for provider calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per retry.
    pub base_delay: Duration,
    /// Upper bound for the backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after the given zero-based attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Candidate scoring thresholds for the resolver.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    /// Candidates whose title similarity falls below this are discarded
    /// outright; a batch with no survivors classifies as not-found.
    pub similarity_floor: f64,
    /// Weight of the title similarity component.
    pub title_weight: f64,
    /// Score contribution of an exact year match.
    pub year_weight: f64,
    /// Small bonus scaled by provider vote count, used to order near-equal
    /// candidates. Deliberately smaller than `lead_margin` so popularity
    /// alone never silently picks a winner.
    pub vote_weight: f64,
    /// Minimum score the top candidate must reach to be selected.
    pub confidence_threshold: f64,
    /// The top candidate must lead the runner-up by at least this much.
    pub lead_margin: f64,
    /// How many ranked candidates an ambiguous result carries.
    pub ambiguous_top_n: usize,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            similarity_floor: 0.65,
            title_weight: 0.65,
            year_weight: 0.35,
            vote_weight: 0.04,
            confidence_threshold: 0.6,
            lead_margin: 0.15,
            ambiguous_top_n: 5,
        }
    }
}

/// Planner-specific knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSettings {
    /// Axes to build branches for, in output order.
    pub axes: Vec<LinkAxis>,
    /// Cap on cast members per movie to avoid link explosion.
    pub top_cast: usize,
    /// Bucket width in minutes for the runtime axis.
    pub runtime_interval: u32,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            axes: LinkAxis::DEFAULT.to_vec(),
            top_cast: 10,
            runtime_interval: 15,
        }
    }
}

/// Top-level engine settings. An outer layer (CLI, config file) is expected
/// to build this; the engine itself never reads configuration sources.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Directories scanned for movie files.
    pub library_roots: Vec<PathBuf>,
    /// Root of the generated symlink hierarchy.
    pub link_root: PathBuf,
    /// Location of the persisted resolution cache.
    pub cache_path: PathBuf,
    /// Extra noise tokens appended to the built-in parser stoplist.
    pub extra_stop_tokens: Vec<String>,
    /// Video file extensions recognised by the scanner.
    pub video_extensions: Vec<String>,
    /// Parallel per-file workers for the parse/resolve stage.
    pub worker_concurrency: usize,
    /// Collective cap on in-flight provider requests, independent of the
    /// worker count.
    pub provider_concurrency: usize,
    pub retry: RetryPolicy,
    pub scoring: ScoringSettings,
    pub planner: PlannerSettings,
    /// Cached records older than this many days are re-fetched. Zero
    /// disables refresh.
    pub refresh_age_days: i64,
    /// Create links with targets relative to the link location.
    pub relative_links: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            library_roots: Vec::new(),
            link_root: PathBuf::new(),
            cache_path: PathBuf::from("marquee.cache"),
            extra_stop_tokens: Vec::new(),
            video_extensions: default_video_file_extensions_vec(),
            worker_concurrency: 8,
            provider_concurrency: 4,
            retry: RetryPolicy::default(),
            scoring: ScoringSettings::default(),
            planner: PlannerSettings::default(),
            refresh_age_days: 30,
            relative_links: true,
        }
    }
}
