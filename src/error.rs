//! # Orchestration Errors
//!
//! Caller-facing error taxonomy. Store and broker failures collapse into
//! `Internal` except where they carry domain meaning (a unique violation is a
//! conflict, a missing row is `NotFound`).

use thiserror::Error;

use crate::database::StoreError;
use crate::hashing::HashingError;
use crate::messaging::MessagingError;
use crate::models::{EntityKind, GenerationStatus, ProgressError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// The player already has a game state for this story
    SaveSlotExists,
    TooManyInFlight { active: i64, limit: i64 },
    /// The entity is generating; wait for its result
    AlreadyGenerating,
    /// Retry is only valid from `error`
    NotRetryable { status: GenerationStatus },
    /// The last generation failed; retry it before moving on
    AwaitingRetry,
    /// The game reached its ending; no further scenes
    GameCompleted,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SaveSlotExists => write!(f, "a game state already exists for this story"),
            Self::TooManyInFlight { active, limit } => {
                write!(f, "too many generations in flight ({active} active, limit {limit})")
            }
            Self::AlreadyGenerating => write!(f, "generation already in progress"),
            Self::NotRetryable { status } => write!(f, "cannot retry from status {status}"),
            Self::AwaitingRetry => write!(f, "last generation failed; retry it first"),
            Self::GameCompleted => write!(f, "the game has already ended"),
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("conflict: {0}")]
    Conflict(ConflictKind),

    #[error("{entity} {id} is not ready (status: {status})")]
    NotReady {
        entity: EntityKind,
        id: String,
        status: GenerationStatus,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// A message that could not be parsed; never retried
    #[error("message dropped: {0}")]
    Dropped(String),
}

impl OrchestrationError {
    pub fn not_found(entity: EntityKind, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<StoreError> for OrchestrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(constraint) if constraint.contains("player_game_states") => {
                Self::Conflict(ConflictKind::SaveSlotExists)
            }
            StoreError::UniqueViolation(_) => Self::Conflict(ConflictKind::AlreadyGenerating),
            StoreError::NotFound { entity, id } => Self::NotFound {
                entity: entity.to_string(),
                id,
            },
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<MessagingError> for OrchestrationError {
    fn from(err: MessagingError) -> Self {
        if err.is_malformed_payload() {
            Self::Dropped(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl From<HashingError> for OrchestrationError {
    fn from(err: HashingError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<ProgressError> for OrchestrationError {
    fn from(err: ProgressError) -> Self {
        Self::Validation(err.to_string())
    }
}

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;
