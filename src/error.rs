//! Error types for quest-progress

use diesel::result::{DatabaseErrorInformation, DatabaseErrorKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProgressError {
    /// Another request already recorded this (user, task) completion.
    /// Expected under retries and races; not a fault.
    #[error("Task {task_id} already completed by user {user_id}")]
    AlreadyCompleted { user_id: String, task_id: String },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Enrollment not found: {0}")]
    EnrollmentNotFound(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProgressError {
    /// Classify a diesel error, prefixing the message with `context`.
    ///
    /// Closed connections and SQLITE_BUSY/locked failures are transient and
    /// map to `StoreUnavailable`; everything else is a fatal `Database` error.
    pub fn store(context: &str, err: diesel::result::Error) -> Self {
        use diesel::result::Error as DieselError;

        match &err {
            DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
                Self::StoreUnavailable(format!("{}: {}", context, err))
            }
            DieselError::DatabaseError(_, info) if is_busy_message(info.message()) => {
                Self::StoreUnavailable(format!("{}: {}", context, err))
            }
            _ => Self::Database(format!("{}: {}", context, err)),
        }
    }

    /// Caller passed identifiers or input that can never succeed.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::TaskNotFound(_) | Self::EnrollmentNotFound(_) | Self::InvalidInput(_)
        )
    }

    /// Transient infrastructure fault; the whole request may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<diesel::result::Error> for ProgressError {
    fn from(err: diesel::result::Error) -> Self {
        Self::store("Query failed", err)
    }
}

fn is_busy_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("database is locked") || lower.contains("database is busy")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(ProgressError::TaskNotFound("t1".into()).is_client_error());
        assert!(ProgressError::EnrollmentNotFound("e1".into()).is_client_error());
        assert!(!ProgressError::StoreUnavailable("down".into()).is_client_error());
        assert!(ProgressError::StoreUnavailable("down".into()).is_retryable());
        assert!(!ProgressError::InvariantViolation("2 rows".into()).is_retryable());
    }

    #[test]
    fn test_not_found_maps_to_database() {
        let err = ProgressError::store("Query failed", diesel::result::Error::NotFound);
        assert!(matches!(err, ProgressError::Database(_)));
    }

    #[test]
    fn test_busy_message_detection() {
        assert!(is_busy_message("database is locked"));
        assert!(is_busy_message("Database is BUSY"));
        assert!(!is_busy_message("UNIQUE constraint failed: completions.user_id"));
    }
}
