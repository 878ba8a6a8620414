//! Enrollment operations using Diesel
//!
//! `mark_completed_if_active` is the only writer of `completed_at` and
//! `is_active = false`. It is a single conditional UPDATE whose affected-row
//! count decides which caller owns the quest completion.

use diesel::prelude::*;
use tracing::{debug, error};
use uuid::Uuid;

use super::diesel_schema::enrollments;
use super::models::{current_timestamp, Enrollment, NewEnrollment};
use crate::error::ProgressError;

/// Outcome of the conditional quest-completion update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionTransition {
    /// This caller set `completed_at`; it owns the completion event
    Transitioned,
    /// `completed_at` was already set by someone else
    AlreadyCompleted,
}

// ============================================================================
// Read Operations
// ============================================================================

/// Get enrollment by ID
pub fn get_enrollment(
    conn: &mut SqliteConnection,
    enrollment_id: &str,
) -> Result<Option<Enrollment>, ProgressError> {
    enrollments::table
        .filter(enrollments::id.eq(enrollment_id))
        .select(Enrollment::as_select())
        .first(conn)
        .optional()
        .map_err(|e| ProgressError::store("Query failed", e))
}

/// Get the user's most recent enrollment for a quest, active or completed
pub fn get_latest_enrollment(
    conn: &mut SqliteConnection,
    user_id: &str,
    quest_id: &str,
) -> Result<Option<Enrollment>, ProgressError> {
    enrollments::table
        .filter(enrollments::user_id.eq(user_id))
        .filter(enrollments::quest_id.eq(quest_id))
        .order(enrollments::started_at.desc())
        .select(Enrollment::as_select())
        .first(conn)
        .optional()
        .map_err(|e| ProgressError::store("Query failed", e))
}

// ============================================================================
// Write Operations
// ============================================================================

/// Start a quest for a user, reusing any existing enrollment
///
/// A completed enrollment is returned as is. Completions are unique per
/// (user, task) for good, so a second attempt at the quest could never
/// complete.
pub fn start_enrollment(
    conn: &mut SqliteConnection,
    user_id: &str,
    quest_id: &str,
) -> Result<Enrollment, ProgressError> {
    if user_id.is_empty() || quest_id.is_empty() {
        return Err(ProgressError::InvalidInput("user_id and quest_id are required".into()));
    }

    if let Some(existing) = get_latest_enrollment(conn, user_id, quest_id)? {
        debug!(
            enrollment_id = %existing.id,
            completed = existing.is_completed(),
            "Reusing existing enrollment"
        );
        return Ok(existing);
    }

    let id = Uuid::new_v4().to_string();
    let now = current_timestamp();

    diesel::insert_into(enrollments::table)
        .values(&NewEnrollment {
            id: &id,
            user_id,
            quest_id,
            started_at: &now,
            is_active: true,
        })
        .execute(conn)
        .map_err(|e| ProgressError::store("Insert failed", e))?;

    get_enrollment(conn, &id)?
        .ok_or_else(|| ProgressError::Internal("Failed to retrieve created enrollment".into()))
}

/// Set `completed_at` and deactivate, only if `completed_at` is still NULL
///
/// Never read-then-write: the predicate is evaluated by the store inside the
/// UPDATE so exactly one concurrent caller can observe `Transitioned`.
pub fn mark_completed_if_active(
    conn: &mut SqliteConnection,
    enrollment_id: &str,
    completed_at: &str,
) -> Result<CompletionTransition, ProgressError> {
    let affected = diesel::update(
        enrollments::table
            .filter(enrollments::id.eq(enrollment_id))
            .filter(enrollments::completed_at.is_null()),
    )
    .set((
        enrollments::completed_at.eq(completed_at),
        enrollments::is_active.eq(false),
    ))
    .execute(conn)
    .map_err(|e| ProgressError::store("Update failed", e))?;

    match affected {
        0 => Ok(CompletionTransition::AlreadyCompleted),
        1 => Ok(CompletionTransition::Transitioned),
        n => {
            error!(enrollment_id, rows = n, "Conditional enrollment update touched multiple rows");
            Err(ProgressError::InvariantViolation(format!(
                "completing enrollment {} affected {} rows",
                enrollment_id, n
            )))
        }
    }
}
