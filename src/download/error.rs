//! Error types for the download engine.
//!
//! Per-item failures are counted and reported as events; only conditions
//! that make the whole batch pointless surface as [`EngineError`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a download batch.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The destination root cannot be created or written to.
    #[error(
        "cannot write to destination {path}: {source}\n  Suggestion: Check that the folder exists and is writable"
    )]
    PermissionDenied {
        /// The destination root.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The download client could not be constructed.
    #[error("failed to set up download client: {0}")]
    Client(#[from] crate::http::FetchError),

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

impl EngineError {
    /// Creates a permission error for `path`.
    pub fn permission_denied(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::PermissionDenied {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_display() {
        let err = EngineError::permission_denied(
            "/readonly",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/readonly"));
        assert!(msg.contains("denied"));
        assert!(msg.contains("Suggestion"));
    }

    #[test]
    fn test_semaphore_closed_display() {
        assert_eq!(
            EngineError::SemaphoreClosed.to_string(),
            "semaphore closed unexpectedly"
        );
    }
}
