use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ExternalId, FileIdentity, MetadataRecord};

/// How sure the resolver was when it picked the record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Confidence {
    /// Accepted without scoring: forced id hint or manual disambiguation.
    Certain,
    /// Accepted by the scoring algorithm with this score.
    Scored(f64),
}

/// A persisted mapping from one source file to one metadata record.
///
/// Owned by the record cache. Invalidated when the source file's
/// modification time changes or the file disappears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionEntry {
    pub identity: FileIdentity,
    pub record_id: ExternalId,
    pub confidence: Confidence,
}

impl ResolutionEntry {
    pub fn new(
        identity: FileIdentity,
        record_id: ExternalId,
        confidence: Confidence,
    ) -> Self {
        Self {
            identity,
            record_id,
            confidence,
        }
    }
}

/// Why a file is missing from the link plan.
#[derive(Debug, Clone, PartialEq)]
pub enum UnresolvedReason {
    /// Nothing usable remained after stripping noise tokens.
    UnparsableName,
    /// Multiple candidates with no clear winner; carries the ranked top-N
    /// for later manual disambiguation.
    Ambiguous(Vec<MetadataRecord>),
    /// The provider returned no candidate above the similarity floor.
    NotFound,
    /// The provider could not be reached after exhausting retries.
    ProviderUnavailable,
}

impl UnresolvedReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnparsableName => "unparsable name",
            Self::Ambiguous(_) => "ambiguous",
            Self::NotFound => "not found",
            Self::ProviderUnavailable => "provider unavailable",
        }
    }
}

/// One row of the unresolved report handed to the caller after a run.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedEntry {
    pub path: PathBuf,
    pub reason: UnresolvedReason,
}

impl UnresolvedEntry {
    pub fn new(path: PathBuf, reason: UnresolvedReason) -> Self {
        Self { path, reason }
    }
}
