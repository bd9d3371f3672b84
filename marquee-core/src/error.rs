use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unparsable name: {}", .0.display())]
    UnparsableName(PathBuf),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider could not be reached for any file in the batch. The run
    /// halts before mutating the link tree.
    #[error("metadata provider unreachable for the whole batch")]
    ProviderOutage,

    #[error("filesystem denied at {}: {source}", .path.display())]
    FilesystemDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache corrupt: {0}")]
    CacheCorrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Wrap an IO error that should not abort the batch, keeping the path it
    /// happened at.
    pub fn denied(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FilesystemDenied {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
