use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ExternalId;

/// Canonical metadata for one movie as returned by the provider.
///
/// Immutable once fetched; cached keyed by [`ExternalId`]. Several source
/// files (multi-part rips) may share one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub id: ExternalId,
    pub title: String,
    pub year: u16,
    /// Genres in provider order.
    pub genres: Vec<String>,
    /// Credited cast in billing order.
    pub cast: Vec<String>,
    pub directors: Vec<String>,
    pub poster_url: Option<String>,
    /// Vote count from the provider, used as a deterministic tie-break when
    /// two candidates score equally.
    pub vote_count: u64,
    /// Provider popularity score.
    pub popularity: f64,
    pub runtime_minutes: Option<u32>,
    /// When this record was fetched; stale records get refreshed.
    pub fetched_at: DateTime<Utc>,
}

impl MetadataRecord {
    /// Display name used for link naming: `Title (Year)`, with path
    /// separators replaced so the name stays a single path component.
    pub fn display_name(&self) -> String {
        sanitize_component(&format!("{} ({})", self.title, self.year))
    }

    /// Short description for log output.
    pub fn short(&self) -> String {
        format!("{} ({}) [{}]", self.title, self.year, self.genres.join(", "))
    }

    /// Bucket label for the runtime axis, e.g. `"90-105 minutes"`.
    pub fn runtime_bucket(&self, interval_minutes: u32) -> Option<String> {
        let interval = interval_minutes.max(1);
        let runtime = self.runtime_minutes?;
        let lower = runtime / interval * interval;
        Some(format!("{}-{} minutes", lower, lower + interval))
    }

    /// Whole days since the record was fetched from the provider.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.fetched_at).num_days()
    }
}

/// Replace characters that would split a name into multiple path components.
pub fn sanitize_component(name: &str) -> String {
    name.replace(['/', '\\', '\0'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, year: u16) -> MetadataRecord {
        MetadataRecord {
            id: ExternalId::new("tt0000001"),
            title: title.to_string(),
            year,
            genres: vec!["Drama".to_string()],
            cast: Vec::new(),
            directors: Vec::new(),
            poster_url: None,
            vote_count: 0,
            popularity: 0.0,
            runtime_minutes: Some(112),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn display_name_includes_year() {
        assert_eq!(record("Playtime", 1967).display_name(), "Playtime (1967)");
    }

    #[test]
    fn display_name_is_a_single_component() {
        assert_eq!(
            record("Face/Off", 1997).display_name(),
            "Face_Off (1997)"
        );
    }

    #[test]
    fn runtime_buckets_round_down() {
        let rec = record("Playtime", 1967);
        assert_eq!(rec.runtime_bucket(15), Some("105-120 minutes".to_string()));
        assert_eq!(rec.runtime_bucket(30), Some("90-120 minutes".to_string()));
    }
}
