//! Error types for the discovery core

use thiserror::Error;

/// Result type alias for search operations
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Errors that can occur during search and indexing operations.
///
/// The variants mirror the service's external taxonomy: caller faults,
/// authorization faults, readiness, deadlines, transient dependency blips
/// (recovered locally where possible), and invariant violations.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Caller fault: empty query, out-of-range `k`, bad parameter
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No usable credential was presented
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Credential is valid but policy denies the operation
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The vector index has not finished building
    #[error("index not ready: {0}")]
    IndexNotReady(String),

    /// The search deadline expired
    #[error("deadline exceeded: {0}")]
    Timeout(String),

    /// A dependency (embedder, store) failed transiently
    #[error("transient dependency failure: {0}")]
    TransientDependency(String),

    /// The embedding model cannot be loaded or invoked right now
    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    /// The text exceeds the embedding model context; permanent for this input
    #[error("input too large: {len} chars exceeds limit {max}")]
    InputTooLarge {
        /// Size of the offending text
        len: usize,
        /// The model's input limit
        max: usize,
    },

    /// I/O error during snapshot or index operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (snapshot body, wire DTO)
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal invariant violation; never retried automatically
    #[error("internal error: {0}")]
    Internal(String),
}

impl SearchError {
    /// Stable machine-readable code (for JSON responses and logs)
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::IndexNotReady(_) => "INDEX_NOT_READY",
            Self::Timeout(_) => "TIMEOUT",
            Self::TransientDependency(_) => "TRANSIENT_DEPENDENCY",
            Self::EmbedderUnavailable(_) => "EMBEDDER_UNAVAILABLE",
            Self::InputTooLarge { .. } => "INPUT_TOO_LARGE",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a caller (or the pipeline itself) may retry the operation
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::IndexNotReady(_)
                | Self::Timeout(_)
                | Self::TransientDependency(_)
                | Self::EmbedderUnavailable(_)
                | Self::Io(_)
        )
    }

    /// Whether this fault is permanent for the given input (skip, don't retry)
    #[must_use]
    pub const fn is_permanent_for_input(&self) -> bool {
        matches!(self, Self::InputTooLarge { .. })
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for SearchError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_type_mapping() {
        let cases: Vec<(SearchError, &str)> = vec![
            (SearchError::InvalidRequest("k".into()), "INVALID_REQUEST"),
            (SearchError::Unauthenticated("no key".into()), "UNAUTHENTICATED"),
            (SearchError::Forbidden("denied".into()), "FORBIDDEN"),
            (SearchError::IndexNotReady("building".into()), "INDEX_NOT_READY"),
            (SearchError::Timeout("2s".into()), "TIMEOUT"),
            (
                SearchError::TransientDependency("db blip".into()),
                "TRANSIENT_DEPENDENCY",
            ),
            (
                SearchError::EmbedderUnavailable("model".into()),
                "EMBEDDER_UNAVAILABLE",
            ),
            (
                SearchError::InputTooLarge { len: 10, max: 5 },
                "INPUT_TOO_LARGE",
            ),
            (
                SearchError::Io(std::io::Error::other("disk full")),
                "IO_ERROR",
            ),
            (SearchError::Serialization("bad".into()), "SERIALIZATION_ERROR"),
            (SearchError::Internal("bug".into()), "INTERNAL_ERROR"),
        ];
        for (err, expected) in &cases {
            assert_eq!(err.error_type(), *expected, "{err:?}");
        }
    }

    #[test]
    fn retryable_classification() {
        assert!(SearchError::IndexNotReady("x".into()).is_retryable());
        assert!(SearchError::Timeout("x".into()).is_retryable());
        assert!(SearchError::TransientDependency("x".into()).is_retryable());
        assert!(SearchError::EmbedderUnavailable("x".into()).is_retryable());

        assert!(!SearchError::InvalidRequest("x".into()).is_retryable());
        assert!(!SearchError::Forbidden("x".into()).is_retryable());
        assert!(!SearchError::InputTooLarge { len: 1, max: 0 }.is_retryable());
        assert!(!SearchError::Internal("x".into()).is_retryable());
    }

    #[test]
    fn input_too_large_is_permanent() {
        assert!(SearchError::InputTooLarge { len: 9, max: 8 }.is_permanent_for_input());
        assert!(!SearchError::EmbedderUnavailable("x".into()).is_permanent_for_input());
    }

    #[test]
    fn display_all_non_empty() {
        let errors: Vec<SearchError> = vec![
            SearchError::InvalidRequest(String::new()),
            SearchError::IndexNotReady(String::new()),
            SearchError::InputTooLarge { len: 0, max: 0 },
            SearchError::Internal(String::new()),
        ];
        for err in &errors {
            assert!(!err.to_string().is_empty(), "{err:?}");
        }
    }

    #[test]
    fn io_error_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SearchError = io_err.into();
        assert!(matches!(err, SearchError::Io(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn serde_error_from_conversion() {
        let json_err = serde_json::from_str::<i32>("nope").unwrap_err();
        let err: SearchError = json_err.into();
        assert_eq!(err.error_type(), "SERIALIZATION_ERROR");
    }
}
