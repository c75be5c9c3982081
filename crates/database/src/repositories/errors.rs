use thiserror::Error;

/// Repository-level error taxonomy, mapped from `tokio_postgres::Error` by
/// `map_db_error` so callers can match on outcome instead of SQL states.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("conversation is deleted and rejects further writes")]
    ConversationDeleted,
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("required field missing: {0}")]
    RequiredFieldMissing(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("transaction conflict")]
    TransactionConflict,
    #[error("pool error: {0}")]
    PoolError(String),
    #[error("database error: {0}")]
    DatabaseError(#[from] anyhow::Error),
}

impl From<deadpool_postgres::PoolError> for RepositoryError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        RepositoryError::PoolError(err.to_string())
    }
}
