//! Error types for the sync layer.
//!
//! Lower layers (local store, remote store, entity cache) return these
//! through `Result`. Domain services convert them into a per-domain error
//! message before they reach callers.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of the local persistent cache.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {0:?}: {1}")]
    Io(PathBuf, #[source] io::Error),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Failed to encode collection: {0}")]
    Encode(String),

    #[error("Failed to decode collection: {0}")]
    Decode(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Failures of the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// No remote backend is reachable (local-only operation).
    #[error("Remote store unavailable")]
    Unavailable,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The backend answered the request with an error.
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Subscription closed")]
    SubscriptionClosed,
}

/// Failures of the text-completion collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("Text completion is not available")]
    Unavailable,

    #[error("Text completion failed: {0}")]
    Failed(String),

    #[error("Malformed completion: {0}")]
    Malformed(String),
}

/// Umbrella error for entity cache and service operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid record at '{path}': {reason}")]
    InvalidRecord { path: String, reason: String },

    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl SyncError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        SyncError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = SyncError::not_found("footprint entry", "local_1");
        assert_eq!(err.to_string(), "footprint entry not found: local_1");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_remote_error_is_transparent() {
        let err: SyncError = RemoteError::Rejected("permission denied".into()).into();
        assert_eq!(err.to_string(), "Request rejected: permission denied");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_io_error_mentions_path() {
        let err = StorageError::Io(
            PathBuf::from("/tmp/store/key.json"),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/store/key.json"));
    }
}
