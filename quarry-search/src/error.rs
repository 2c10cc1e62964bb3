//! Error types for search client operations.

use std::time::Duration;
use thiserror::Error;

/// Search client error type.
#[derive(Error, Debug)]
pub enum SearchError {
    /// An expression failed validation while being built. Never sent.
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    /// No endpoint is registered under the requested name.
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// The call exceeded its endpoint's timeout.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The cluster answered with a structured error.
    #[error("Cluster rejected request ({status}, {error_type}): {reason}")]
    RemoteRejected {
        /// HTTP status code.
        status: u16,
        /// Cluster error type, e.g. `index_not_found_exception`.
        error_type: String,
        /// Raw reason text.
        reason: String,
    },

    /// The reply did not match the shape the request asked for.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Optimistic-concurrency check failed.
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    /// Document not found.
    #[error("Document not found: {index}/{id}")]
    NotFound {
        /// Index name.
        index: String,
        /// Document ID.
        id: String,
    },

    /// The scroll cursor is exhausted or cancelled.
    #[error("Scroll cursor is closed")]
    CursorClosed,

    /// The server-side scroll snapshot has expired.
    #[error("Scroll cursor expired: {0}")]
    CursorExpired(String),

    /// An aggregation name path did not resolve.
    #[error("Aggregation path not found: {0}")]
    NameNotFound(String),

    /// Invalid endpoint configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connection-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SearchError {
    /// Whether this is an optimistic-concurrency failure.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, SearchError::VersionConflict(_))
    }

    /// Whether the target document was missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SearchError::NotFound { .. })
    }

    /// Whether the call timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SearchError::Timeout(_))
    }

    /// Whether the cluster rejected the call. Version conflicts count.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            SearchError::RemoteRejected { .. } | SearchError::VersionConflict(_)
        )
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SearchError::InvalidExpression(msg.into())
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        SearchError::MalformedResponse(msg.into())
    }
}

impl From<opensearch::Error> for SearchError {
    fn from(err: opensearch::Error) -> Self {
        SearchError::Transport(err.to_string())
    }
}

/// Result type alias for search client operations.
pub type Result<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_helpers() {
        let conflict = SearchError::VersionConflict("stale".into());
        assert!(conflict.is_version_conflict());
        assert!(conflict.is_remote());

        let rejected = SearchError::RemoteRejected {
            status: 404,
            error_type: "index_not_found_exception".into(),
            reason: "no such index [nope]".into(),
        };
        assert!(rejected.is_remote());
        assert!(!rejected.is_version_conflict());

        assert!(SearchError::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(
            SearchError::NotFound {
                index: "students".into(),
                id: "9".into()
            }
            .is_not_found()
        );
        assert!(!SearchError::CursorClosed.is_remote());
    }

    #[test]
    fn test_display_carries_reason() {
        let rejected = SearchError::RemoteRejected {
            status: 400,
            error_type: "parsing_exception".into(),
            reason: "unknown query [tern]".into(),
        };
        let text = rejected.to_string();
        assert!(text.contains("400"));
        assert!(text.contains("unknown query [tern]"));
    }
}
