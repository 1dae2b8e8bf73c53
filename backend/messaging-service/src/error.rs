use thiserror::Error;
use uuid::Uuid;

pub type MessagingResult<T> = Result<T, MessagingError>;

pub type StorageResult<T> = Result<T, StorageError>;

/// Failures reported by a data store backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Whether repeating the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Database(e) => is_transient_db_error(e),
            StorageError::Unavailable(_) => true,
            StorageError::NotFound { .. } => false,
        }
    }
}

/// Connection loss, pool exhaustion, serialization failures and deadlocks.
pub fn is_transient_db_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001") | Some("40P01")),
        _ => false,
    }
}

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl MessagingError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        MessagingError::InvalidArgument(msg.into())
    }

    /// Only storage failures can be transient; callers decide whether to retry.
    pub fn is_transient(&self) -> bool {
        match self {
            MessagingError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for MessagingError {
    fn from(e: sqlx::Error) -> Self {
        MessagingError::Storage(StorageError::Database(e))
    }
}
