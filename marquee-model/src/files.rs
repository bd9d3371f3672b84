use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ExternalId;

/// Identity of a media file on disk: path plus the metadata that tells us
/// whether the file changed since we last resolved it.
///
/// Two identities with the same path but different modification times are
/// different identities; a cached resolution keyed on the old one is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
    pub len: u64,
}

impl FileIdentity {
    pub fn new(path: PathBuf, modified: DateTime<Utc>, len: u64) -> Self {
        Self {
            path,
            modified,
            len,
        }
    }

    /// True when `other` describes the same on-disk content: same path and
    /// the file was not rewritten in between.
    pub fn is_unchanged(&self, other: &FileIdentity) -> bool {
        self.path == other.path
            && self.modified == other.modified
            && self.len == other.len
    }
}

/// A media file discovered during a library scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub identity: FileIdentity,
    /// Provider id harvested from a companion text file next to the media
    /// file, if one was found. Takes precedence over title search.
    pub id_hint: Option<ExternalId>,
}

impl SourceFile {
    pub fn new(identity: FileIdentity) -> Self {
        Self {
            identity,
            id_hint: None,
        }
    }

    pub fn with_hint(identity: FileIdentity, hint: ExternalId) -> Self {
        Self {
            identity,
            id_hint: Some(hint),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.identity.path
    }

    /// Filename without the extension, used for link naming of multi-part
    /// files sharing one metadata record.
    pub fn stem(&self) -> Option<&str> {
        self.identity.path.file_stem().and_then(|s| s.to_str())
    }
}
