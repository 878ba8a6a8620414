//! Completion ledger - the only writer of `completions` rows
//!
//! `record_completion` is insert-as-lock: it goes straight to the INSERT and
//! lets the UNIQUE (user_id, task_id) index decide the winner. There is no
//! existence check before the insert, since that ordering is racy.

use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::debug;
use uuid::Uuid;

use super::diesel_schema::completions;
use super::models::{current_timestamp, Completion, NewCompletion, Task};
use super::tasks;
use crate::error::ProgressError;

/// Result of attempting to insert a completion row
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// This caller created the row
    Created(Completion),
    /// A row for (user, task) already existed; nothing was written
    AlreadyExists,
}

/// A newly recorded completion together with the task it completed
#[derive(Debug, Clone)]
pub struct RecordedCompletion {
    pub completion: Completion,
    pub task: Task,
}

/// Evidence attached to a completion
#[derive(Debug, Clone, Default)]
pub struct Evidence<'a> {
    pub text: Option<&'a str>,
    pub url: Option<&'a str>,
}

// ============================================================================
// Write Operations
// ============================================================================

/// Insert the (user, task) completion row, reporting a lost race as
/// `InsertOutcome::AlreadyExists`
pub fn insert_completion(
    conn: &mut SqliteConnection,
    user_id: &str,
    task: &Task,
    evidence: Evidence<'_>,
) -> Result<InsertOutcome, ProgressError> {
    let id = Uuid::new_v4().to_string();
    let now = current_timestamp();

    let row = NewCompletion {
        id: &id,
        user_id,
        quest_id: &task.quest_id,
        task_id: &task.id,
        evidence_text: evidence.text,
        evidence_url: evidence.url,
        completed_at: &now,
        xp_awarded: task.xp_value,
    };

    let inserted = diesel::insert_into(completions::table)
        .values(&row)
        .execute(conn);

    match inserted {
        Ok(_) => Ok(InsertOutcome::Created(Completion {
            id,
            user_id: user_id.to_string(),
            quest_id: task.quest_id.clone(),
            task_id: task.id.clone(),
            evidence_text: evidence.text.map(str::to_string),
            evidence_url: evidence.url.map(str::to_string),
            completed_at: now,
            xp_awarded: task.xp_value,
        })),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            debug!(user_id, task_id = %task.id, "Completion already recorded");
            Ok(InsertOutcome::AlreadyExists)
        }
        Err(e) => Err(ProgressError::store("Insert failed", e)),
    }
}

/// Record that `user_id` finished `task_id` of `quest_id`
///
/// Returns `TaskNotFound` when the task does not exist or belongs to another
/// quest, and `AlreadyCompleted` when another call already recorded it.
pub fn record_completion(
    conn: &mut SqliteConnection,
    user_id: &str,
    quest_id: &str,
    task_id: &str,
    evidence: Evidence<'_>,
) -> Result<RecordedCompletion, ProgressError> {
    let task = tasks::get_task(conn, task_id)?
        .filter(|t| t.quest_id == quest_id)
        .ok_or_else(|| ProgressError::TaskNotFound(format!("{} in quest {}", task_id, quest_id)))?;

    match insert_completion(conn, user_id, &task, evidence)? {
        InsertOutcome::Created(completion) => Ok(RecordedCompletion { completion, task }),
        InsertOutcome::AlreadyExists => Err(ProgressError::AlreadyCompleted {
            user_id: user_id.to_string(),
            task_id: task_id.to_string(),
        }),
    }
}

// ============================================================================
// Read Operations
// ============================================================================

/// Get the completion for a (user, task) pair
pub fn get_completion(
    conn: &mut SqliteConnection,
    user_id: &str,
    task_id: &str,
) -> Result<Option<Completion>, ProgressError> {
    completions::table
        .filter(completions::user_id.eq(user_id))
        .filter(completions::task_id.eq(task_id))
        .select(Completion::as_select())
        .first(conn)
        .optional()
        .map_err(|e| ProgressError::store("Query failed", e))
}

/// All of a user's completions for one quest
pub fn list_completions_for_quest(
    conn: &mut SqliteConnection,
    user_id: &str,
    quest_id: &str,
) -> Result<Vec<Completion>, ProgressError> {
    completions::table
        .filter(completions::user_id.eq(user_id))
        .filter(completions::quest_id.eq(quest_id))
        .order(completions::completed_at.asc())
        .select(Completion::as_select())
        .load(conn)
        .map_err(|e| ProgressError::store("Query failed", e))
}

/// Total completion rows
pub fn completion_count(conn: &mut SqliteConnection) -> Result<i64, ProgressError> {
    completions::table
        .count()
        .get_result(conn)
        .map_err(|e| ProgressError::store("Count query failed", e))
}
