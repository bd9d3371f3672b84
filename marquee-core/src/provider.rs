//! Metadata provider seam.
//!
//! The actual network client lives outside this crate; the engine only
//! depends on this trait. Implementations are expected to apply their own
//! internal ranking to search results; the resolver re-scores candidates
//! independently.

use async_trait::async_trait;
use marquee_model::{ExternalId, MetadataRecord};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("API error: {0}")]
    Api(String),

    /// A fetch by id for an id the provider does not know. Not retryable.
    #[error("unknown id: {0}")]
    UnknownId(ExternalId),
}

impl ProviderError {
    /// Transient failures are retried with backoff; an unknown id never
    /// becomes known by retrying.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::UnknownId(_))
    }
}

/// Query interface of the external movie metadata source.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Search by title (and year when known), returning candidate records in
    /// provider ranking order.
    async fn search(
        &self,
        title: &str,
        year: Option<u16>,
    ) -> Result<Vec<MetadataRecord>, ProviderError>;

    /// Fetch one record by its canonical id. Used for forced id hints,
    /// manual disambiguation decisions, and stale-record refresh.
    async fn fetch(
        &self,
        id: &ExternalId,
    ) -> Result<MetadataRecord, ProviderError>;
}
