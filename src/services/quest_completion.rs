//! Quest completion detection
//!
//! Decides whether a user's completions satisfy the quest and, if so,
//! performs the once-only enrollment transition through
//! `enrollments::mark_completed_if_active`.

use std::collections::HashSet;

use diesel::SqliteConnection;
use tracing::{debug, info};

use crate::db::models::{current_timestamp, Completion, Task};
use crate::db::{completions, enrollments, tasks, CompletionTransition};
use crate::error::ProgressError;

/// Outcome of a quest completion check
#[derive(Debug, Clone)]
pub struct QuestCheck {
    /// The enrollment had already been completed by another caller
    pub already_completed: bool,
    /// This caller performed the transition and owns the completion event
    pub quest_completed: bool,
    /// Every task, required and optional, has a completion row
    pub all_tasks_done: bool,
    /// XP the user earned from this quest's task completions
    pub earned_xp: i64,
    /// The quest's tasks, as read for this check
    pub tasks: Vec<Task>,
}

/// Task ids that gate quest completion
///
/// When no task is marked required, every task is required.
pub fn required_task_ids(tasks: &[Task]) -> HashSet<&str> {
    let required: HashSet<&str> = tasks
        .iter()
        .filter(|t| t.is_required)
        .map(|t| t.id.as_str())
        .collect();

    if required.is_empty() {
        tasks.iter().map(|t| t.id.as_str()).collect()
    } else {
        required
    }
}

/// Whether the completions satisfy the quest's required tasks
///
/// A quest without tasks is never satisfied.
pub fn requirements_met(tasks: &[Task], completions: &[Completion]) -> bool {
    if tasks.is_empty() {
        return false;
    }
    let done: HashSet<&str> = completions.iter().map(|c| c.task_id.as_str()).collect();
    required_task_ids(tasks).iter().all(|id| done.contains(id))
}

/// Whether every task in the quest has a completion
pub fn all_tasks_done(tasks: &[Task], completions: &[Completion]) -> bool {
    let done: HashSet<&str> = completions.iter().map(|c| c.task_id.as_str()).collect();
    !tasks.is_empty() && tasks.iter().all(|t| done.contains(t.id.as_str()))
}

/// Complete the enrollment if the user's completions satisfy the quest
///
/// The caller must already have verified that `enrollment_id` exists and
/// belongs to (`user_id`, `quest_id`), and must not be inside a transaction.
/// `all_tasks_done` reflects the completions present when the update
/// succeeded.
pub fn check_and_complete(
    conn: &mut SqliteConnection,
    user_id: &str,
    quest_id: &str,
    enrollment_id: &str,
) -> Result<QuestCheck, ProgressError> {
    let quest_tasks = tasks::list_tasks_for_quest(conn, quest_id)?;
    let user_completions = completions::list_completions_for_quest(conn, user_id, quest_id)?;

    if !requirements_met(&quest_tasks, &user_completions) {
        debug!(
            user_id,
            quest_id,
            completed = user_completions.len(),
            total = quest_tasks.len(),
            "Quest requirements not yet met"
        );
        return Ok(QuestCheck {
            already_completed: false,
            quest_completed: false,
            all_tasks_done: all_tasks_done(&quest_tasks, &user_completions),
            earned_xp: user_completions.iter().map(|c| c.xp_awarded).sum(),
            tasks: quest_tasks,
        });
    }

    // Completions are re-read under the same write lock as the update, so a
    // task finished by a racer just before the transition counts toward the
    // bonus decision.
    let (transition, at_transition) = conn.immediate_transaction(|conn| {
        let transition =
            enrollments::mark_completed_if_active(conn, enrollment_id, &current_timestamp())?;
        let seen = match transition {
            CompletionTransition::Transitioned => {
                Some(completions::list_completions_for_quest(conn, user_id, quest_id)?)
            }
            CompletionTransition::AlreadyCompleted => None,
        };
        Ok::<_, ProgressError>((transition, seen))
    })?;
    let snapshot = at_transition.as_deref().unwrap_or(&user_completions);

    let (already_completed, quest_completed) = match transition {
        CompletionTransition::Transitioned => {
            info!(user_id, quest_id, enrollment_id, "Quest completed");
            (false, true)
        }
        CompletionTransition::AlreadyCompleted => {
            debug!(user_id, quest_id, enrollment_id, "Enrollment already completed");
            (true, false)
        }
    };

    Ok(QuestCheck {
        already_completed,
        quest_completed,
        all_tasks_done: all_tasks_done(&quest_tasks, snapshot),
        earned_xp: snapshot.iter().map(|c| c.xp_awarded).sum(),
        tasks: quest_tasks,
    })
}
