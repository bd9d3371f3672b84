//! Core data model definitions shared across Marquee crates.

pub mod files;
pub mod ids;
pub mod parse;
pub mod plan;
pub mod record;
pub mod resolution;

// Intentionally curated re-exports for downstream consumers.
pub use files::{FileIdentity, SourceFile};
pub use ids::ExternalId;
pub use parse::ParsedQuery;
pub use plan::{LinkAxis, LinkPlanEntry};
pub use record::MetadataRecord;
pub use resolution::{
    Confidence, ResolutionEntry, UnresolvedEntry, UnresolvedReason,
};
