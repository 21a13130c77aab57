//! Errors raised by the entity store.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A unique constraint rejected the write; carries the constraint name
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("transaction commit failed: {0}")]
    Commit(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("failed to encode or decode stored value: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn commit(message: impl ToString) -> Self {
        Self::Commit(message.to_string())
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return Self::UniqueViolation(db_err.constraint().unwrap_or("unknown").to_string());
            }
        }

        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => Self::Unavailable(err.to_string()),
            sqlx::Error::Io(io) => Self::Unavailable(io.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
