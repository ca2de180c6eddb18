//! Error types for the commit engine.

use crate::ident::ObjectId;
use std::fmt;

/// The primary error type for all relsync operations.
#[derive(Debug)]
pub enum Error {
    /// Precondition violations detected before any SQL is built or executed.
    Validation(ValidationError),
    /// Failures raised while executing batches against a store.
    Execution(ExecutionError),
    /// An optimistic-lock qualifier matched zero rows.
    OptimisticLock(OptimisticLockError),
    /// A commit failed; carries the rollback status.
    Commit(CommitError),
    /// Serialization/deserialization errors.
    Serde(String),
    /// Custom error with message.
    Custom(String),
}

/// Precondition violations. All of these abort the whole commit before
/// any SQL executes for the affected node.
#[derive(Debug)]
pub enum ValidationError {
    /// A tracked object references an entity the model does not know.
    UnknownEntity {
        /// The unmapped entity name.
        entity: String,
    },
    /// A read-only entity appeared in an insert, update, or delete batch.
    ReadOnlyEntity {
        /// The offending entity.
        entity: String,
    },
    /// Key propagation found a master object without a resolved
    /// permanent id. Masters must be ordered before dependents.
    MissingMasterKey {
        /// The dependent entity.
        entity: String,
        /// The master relationship traversed.
        relationship: String,
    },
    /// More than one primary-key column would need a generated value.
    MultipleGeneratedKeys {
        /// The offending entity.
        entity: String,
        /// The second column that required generation.
        column: String,
    },
    /// Instance-level ordering over reflexive relationships is cyclic.
    ReflexiveCycle {
        /// The entity whose instances cannot be ordered.
        entity: String,
    },
    /// An optimistic-lock qualifier needed a retained snapshot that is
    /// no longer available.
    MissingSnapshot {
        /// Identity of the object missing its snapshot.
        id: ObjectId,
    },
}

/// A failure reported by a physical store during batch execution.
#[derive(Debug)]
pub struct ExecutionError {
    /// Name of the node that failed.
    pub node: String,
    /// Table targeted by the failing batch.
    pub table: String,
    /// Store-specific message.
    pub message: String,
    /// Underlying store error, when available.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Zero rows matched an optimistic-locking qualifier.
#[derive(Debug)]
pub struct OptimisticLockError {
    /// Table targeted by the failing row.
    pub table: String,
    /// Identity of the conflicting object.
    pub id: ObjectId,
}

/// Whether the transaction was rolled back after a failed commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackStatus {
    /// Every touched connection rolled back cleanly.
    RolledBack,
    /// At least one rollback failed; the store state is unknown.
    Unknown,
}

/// The single failure surfaced from `commit()`. No partial commit is
/// ever reported as success.
#[derive(Debug)]
pub struct CommitError {
    /// Rollback outcome for the failed transaction.
    pub rollback: RollbackStatus,
    /// The error that aborted the commit.
    pub source: Box<Error>,
}

impl Error {
    /// Wrap an error as a commit failure with the given rollback status.
    pub fn into_commit_failure(self, rollback: RollbackStatus) -> Error {
        Error::Commit(CommitError {
            rollback,
            source: Box::new(self),
        })
    }

    /// The rollback status, when this is a commit failure.
    pub fn rollback_status(&self) -> Option<RollbackStatus> {
        match self {
            Error::Commit(c) => Some(c.rollback),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(e) => write!(f, "Validation error: {e}"),
            Error::Execution(e) => write!(f, "Execution error: {e}"),
            Error::OptimisticLock(e) => write!(f, "Optimistic lock failure: {e}"),
            Error::Commit(e) => write!(f, "Commit failed ({}): {}", e.rollback, e.source),
            Error::Serde(msg) => write!(f, "Serialization error: {msg}"),
            Error::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::UnknownEntity { entity } => {
                write!(f, "entity '{entity}' is not mapped in the model")
            }
            ValidationError::ReadOnlyEntity { entity } => {
                write!(f, "attempt to write to read-only entity '{entity}'")
            }
            ValidationError::MissingMasterKey {
                entity,
                relationship,
            } => write!(
                f,
                "master object for '{entity}.{relationship}' has no permanent id"
            ),
            ValidationError::MultipleGeneratedKeys { entity, column } => write!(
                f,
                "entity '{entity}' needs a second generated key column '{column}'; \
                 only single-column generation is supported"
            ),
            ValidationError::ReflexiveCycle { entity } => write!(
                f,
                "instances of '{entity}' form a cycle over reflexive relationships"
            ),
            ValidationError::MissingSnapshot { id } => {
                write!(f, "no retained snapshot for {id}; required for lock qualifier")
            }
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node '{}' failed on table '{}': {}",
            self.node, self.table, self.message
        )
    }
}

impl fmt::Display for OptimisticLockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row for {} in table '{}' no longer matches its lock qualifier",
            self.id, self.table
        )
    }
}

impl fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackStatus::RolledBack => write!(f, "rolled back"),
            RollbackStatus::Unknown => write!(f, "rollback status unknown"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Execution(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Commit(e) => Some(e.source.as_ref()),
            _ => None,
        }
    }
}

impl std::error::Error for ValidationError {}
impl std::error::Error for ExecutionError {}
impl std::error::Error for OptimisticLockError {}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<ExecutionError> for Error {
    fn from(err: ExecutionError) -> Self {
        Error::Execution(err)
    }
}

impl From<OptimisticLockError> for Error {
    fn from(err: OptimisticLockError) -> Self {
        Error::OptimisticLock(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for relsync operations.
pub type Result<T> = std::result::Result<T, Error>;
