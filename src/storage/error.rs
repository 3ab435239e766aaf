//! Error types for storage operations

use thiserror::Error;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection failed
    #[error("failed to connect to storage backend: {0}")]
    ConnectionFailed(String),

    /// Database query failed
    #[error("storage query failed: {0}")]
    QueryFailed(String),

    /// A stored value could not be decoded into its domain type
    #[error("invalid stored value: {0}")]
    InvalidData(String),

    /// The backend is not healthy
    #[error("storage backend unhealthy: {0}")]
    UnhealthyBackend(String),
}

#[cfg(feature = "storage-postgres")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::QueryFailed("no rows found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StorageError::ConnectionFailed(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StorageError::InvalidData(err.to_string())
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}
