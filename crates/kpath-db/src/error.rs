//! Database error types

use thiserror::Error;

use kpath_search_core::SearchError;

/// Result type alias for database operations
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite-level failure
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool exhausted or unusable
    #[error("pool error: {0}")]
    Pool(String),

    /// A visibility policy failed write-time validation
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// The referenced row does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was violated (duplicate name, key hash)
    #[error("conflict: {0}")]
    Conflict(String),

    /// JSON (de)serialization of a stored column failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    /// Stable machine-readable code
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "SQLITE_ERROR",
            Self::Pool(_) => "POOL_ERROR",
            Self::InvalidPolicy(_) => "INVALID_POLICY",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// The search core sees database faults as transient dependency failures
/// (retried within the deadline), except for data-shape problems which are
/// internal.
impl From<DbError> for SearchError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlite(_) | DbError::Pool(_) => Self::TransientDependency(err.to_string()),
            DbError::Serialization(_) => Self::Internal(err.to_string()),
            DbError::InvalidPolicy(_) | DbError::NotFound(_) | DbError::Conflict(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}
