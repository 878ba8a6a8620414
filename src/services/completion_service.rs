//! Completion service - the single entry point for finishing a task
//!
//! Sequence for one request, all on one pooled connection:
//!
//! ```text
//! record completion (insert-as-lock) ┐ one IMMEDIATE
//! grant task XP (atomic increment)    ┘ transaction
//!     ↓ created
//! check quest + conditional enrollment update
//!     ↓ this caller transitioned and every task is done
//! compute bonus (pure) → grant bonus XP
//! ```
//!
//! Each stage leaves a durable fact behind. A failure in the first stage
//! writes nothing, so the retry records the completion. After that stage a
//! retry sees `already completed`, and `reconcile_quest` can re-run the
//! quest steps.

use std::sync::Arc;

use diesel::SqliteConnection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::completions::{self, Evidence};
use crate::db::models::Enrollment;
use crate::db::{enrollments, skill_xp, tasks, ProgressDb};
use crate::error::ProgressError;

use super::bonus::{self, total_task_xp};
use super::events::{EventBus, ProgressEvent};
use super::quest_completion::{self, required_task_ids};

/// Message returned when the (user, task) completion already exists
pub const ALREADY_COMPLETED: &str = "already completed";

/// Request to complete a task, as forwarded by an authenticated route
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTaskRequest {
    pub user_id: String,
    pub quest_id: String,
    pub task_id: String,
    pub enrollment_id: String,
    #[serde(default)]
    pub evidence_text: Option<String>,
    #[serde(default)]
    pub evidence_url: Option<String>,
}

/// Result handed back to the caller of `complete_task`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResult {
    pub success: bool,
    pub task_completed: bool,
    pub xp_awarded: i64,
    pub quest_completed: bool,
    pub bonus_awarded: i64,
    pub bonus_pillar: Option<String>,
    /// XP the user has earned from this quest's task completions
    pub total_quest_xp: i64,
    pub error: Option<String>,
}

impl CompletionResult {
    /// Idempotent-retry result: a success with nothing newly completed
    pub fn already_completed() -> Self {
        Self {
            success: true,
            error: Some(ALREADY_COMPLETED.to_string()),
            ..Default::default()
        }
    }
}

/// Read-only progress summary for a user's quest
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestProgress {
    pub user_id: String,
    pub quest_id: String,
    pub total_tasks: usize,
    pub required_tasks: usize,
    pub completed_tasks: usize,
    pub completed_required: usize,
    pub earned_xp: i64,
    pub total_quest_xp: i64,
    pub all_tasks_done: bool,
}

/// Outcome of the quest steps shared by `complete_task` and `reconcile_quest`
struct QuestOutcome {
    quest_completed: bool,
    bonus_awarded: i64,
    bonus_pillar: Option<String>,
    earned_xp: i64,
}

/// Completion service: task completion, XP, quest completion and bonus
pub struct CompletionService {
    db: Arc<ProgressDb>,
    events: Arc<EventBus>,
}

impl CompletionService {
    /// Create a new completion service
    pub fn new(db: Arc<ProgressDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    /// Complete a task for a user and apply every reward it unlocks
    ///
    /// A duplicate completion is not an error: it returns
    /// `CompletionResult::already_completed()` without writing anything.
    pub fn complete_task(
        &self,
        request: &CompleteTaskRequest,
    ) -> Result<CompletionResult, ProgressError> {
        self.validate_request(request)?;

        self.db.with_conn(|conn| {
            self.load_enrollment(
                conn,
                &request.enrollment_id,
                &request.user_id,
                &request.quest_id,
            )?;

            let evidence = Evidence {
                text: request.evidence_text.as_deref(),
                url: request.evidence_url.as_deref(),
            };

            // The completion row and its task XP commit together, so a failed
            // grant leaves no completion behind and the retry can still win.
            let recorded = conn.immediate_transaction(|conn| {
                let recorded = completions::record_completion(
                    conn,
                    &request.user_id,
                    &request.quest_id,
                    &request.task_id,
                    evidence,
                )?;
                let new_total = skill_xp::increment_xp(
                    conn,
                    &request.user_id,
                    &recorded.task.pillar,
                    recorded.completion.xp_awarded,
                )?;
                Ok::<_, ProgressError>((recorded, new_total))
            });

            let (recorded, new_total) = match recorded {
                Ok(recorded) => recorded,
                Err(ProgressError::AlreadyCompleted { .. }) => {
                    debug!(
                        user_id = %request.user_id,
                        task_id = %request.task_id,
                        "Duplicate completion request"
                    );
                    return Ok(CompletionResult::already_completed());
                }
                Err(e) => return Err(e),
            };

            let task = &recorded.task;
            self.events.emit(ProgressEvent::TaskCompleted {
                user_id: request.user_id.clone(),
                quest_id: request.quest_id.clone(),
                task_id: task.id.clone(),
                xp_awarded: recorded.completion.xp_awarded,
            });
            self.announce_grant(
                &request.user_id,
                &task.pillar,
                recorded.completion.xp_awarded,
                new_total,
            );

            let outcome = self.finish_quest(
                conn,
                &request.user_id,
                &request.quest_id,
                &request.enrollment_id,
            )?;

            info!(
                user_id = %request.user_id,
                task_id = %task.id,
                xp = recorded.completion.xp_awarded,
                quest_completed = outcome.quest_completed,
                bonus = outcome.bonus_awarded,
                "Task completed"
            );

            Ok(CompletionResult {
                success: true,
                task_completed: true,
                xp_awarded: recorded.completion.xp_awarded,
                quest_completed: outcome.quest_completed,
                bonus_awarded: outcome.bonus_awarded,
                bonus_pillar: outcome.bonus_pillar,
                total_quest_xp: outcome.earned_xp,
                error: None,
            })
        })
    }

    /// Re-run quest completion and bonus for an enrollment
    ///
    /// For recovering a `complete_task` that failed after its completion row
    /// was written. Awards nothing if the enrollment was already completed.
    pub fn reconcile_quest(
        &self,
        user_id: &str,
        quest_id: &str,
        enrollment_id: &str,
    ) -> Result<CompletionResult, ProgressError> {
        self.db.with_conn(|conn| {
            self.load_enrollment(conn, enrollment_id, user_id, quest_id)?;
            let outcome = self.finish_quest(conn, user_id, quest_id, enrollment_id)?;

            Ok(CompletionResult {
                success: true,
                task_completed: false,
                xp_awarded: 0,
                quest_completed: outcome.quest_completed,
                bonus_awarded: outcome.bonus_awarded,
                bonus_pillar: outcome.bonus_pillar,
                total_quest_xp: outcome.earned_xp,
                error: None,
            })
        })
    }

    /// Summarize a user's progress through a quest
    pub fn quest_progress(
        &self,
        user_id: &str,
        quest_id: &str,
    ) -> Result<QuestProgress, ProgressError> {
        self.db.with_conn(|conn| {
            let quest_tasks = tasks::list_tasks_for_quest(conn, quest_id)?;
            let done = completions::list_completions_for_quest(conn, user_id, quest_id)?;

            let required = required_task_ids(&quest_tasks);
            let completed_required = done
                .iter()
                .filter(|c| required.contains(c.task_id.as_str()))
                .count();

            Ok(QuestProgress {
                user_id: user_id.to_string(),
                quest_id: quest_id.to_string(),
                total_tasks: quest_tasks.len(),
                required_tasks: required.len(),
                completed_tasks: done.len(),
                completed_required,
                earned_xp: done.iter().map(|c| c.xp_awarded).sum(),
                total_quest_xp: total_task_xp(&quest_tasks),
                all_tasks_done: quest_completion::all_tasks_done(&quest_tasks, &done),
            })
        })
    }

    /// Steps after the task grant: detect completion, then award the bonus
    fn finish_quest(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        quest_id: &str,
        enrollment_id: &str,
    ) -> Result<QuestOutcome, ProgressError> {
        let check = quest_completion::check_and_complete(conn, user_id, quest_id, enrollment_id)?;

        let mut outcome = QuestOutcome {
            quest_completed: check.quest_completed,
            bonus_awarded: 0,
            bonus_pillar: None,
            earned_xp: check.earned_xp,
        };

        if !check.quest_completed {
            return Ok(outcome);
        }

        self.events.emit(ProgressEvent::QuestCompleted {
            user_id: user_id.to_string(),
            quest_id: quest_id.to_string(),
            enrollment_id: enrollment_id.to_string(),
        });

        if !check.all_tasks_done {
            debug!(user_id, quest_id, "Quest completed without optional tasks, no bonus");
            return Ok(outcome);
        }

        let bonus = bonus::compute_bonus(&check.tasks);
        if let (Some(pillar), true) = (bonus.pillar, bonus.bonus_xp > 0) {
            self.grant(conn, user_id, &pillar, bonus.bonus_xp)?;

            info!(
                user_id,
                quest_id,
                pillar = %pillar,
                bonus = bonus.bonus_xp,
                "Completion bonus awarded"
            );
            self.events.emit(ProgressEvent::BonusAwarded {
                user_id: user_id.to_string(),
                quest_id: quest_id.to_string(),
                pillar: pillar.clone(),
                bonus_xp: bonus.bonus_xp,
            });

            outcome.bonus_awarded = bonus.bonus_xp;
            outcome.bonus_pillar = Some(pillar);
        }

        Ok(outcome)
    }

    /// Apply one standalone XP grant and announce it
    fn grant(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        pillar: &str,
        amount: i64,
    ) -> Result<i64, ProgressError> {
        let new_total = skill_xp::grant_xp(conn, user_id, pillar, amount)?;
        self.announce_grant(user_id, pillar, amount, new_total);
        Ok(new_total)
    }

    fn announce_grant(&self, user_id: &str, pillar: &str, amount: i64, new_total: i64) {
        self.events.emit(ProgressEvent::XpGranted {
            user_id: user_id.to_string(),
            pillar: pillar.to_string(),
            amount,
            new_total,
        });
    }

    /// Load the enrollment and check it belongs to (user, quest)
    fn load_enrollment(
        &self,
        conn: &mut SqliteConnection,
        enrollment_id: &str,
        user_id: &str,
        quest_id: &str,
    ) -> Result<Enrollment, ProgressError> {
        let enrollment = enrollments::get_enrollment(conn, enrollment_id)?
            .ok_or_else(|| ProgressError::EnrollmentNotFound(enrollment_id.to_string()))?;

        if enrollment.user_id != user_id || enrollment.quest_id != quest_id {
            warn!(
                enrollment_id,
                user_id,
                quest_id,
                "Enrollment does not match user and quest"
            );
            return Err(ProgressError::EnrollmentNotFound(format!(
                "{} for user {} in quest {}",
                enrollment_id, user_id, quest_id
            )));
        }

        Ok(enrollment)
    }

    /// Validate request input
    fn validate_request(&self, request: &CompleteTaskRequest) -> Result<(), ProgressError> {
        let fields = [
            ("userId", &request.user_id),
            ("questId", &request.quest_id),
            ("taskId", &request.task_id),
            ("enrollmentId", &request.enrollment_id),
        ];

        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(ProgressError::InvalidInput(format!("{} is required", name)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::SkillXp;
    use crate::db::tasks::test_support::seed_task;
    use crate::db::DbStats;
    use diesel::connection::SimpleConnection;

    struct Fixture {
        db: Arc<ProgressDb>,
        events: Arc<EventBus>,
        service: CompletionService,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(ProgressDb::open_in_memory().unwrap());
        let events = Arc::new(EventBus::new());
        let service = CompletionService::new(db.clone(), events.clone());
        Fixture { db, events, service }
    }

    fn request(enrollment_id: &str, task_id: &str) -> CompleteTaskRequest {
        CompleteTaskRequest {
            user_id: "u1".into(),
            quest_id: "q1".into(),
            task_id: task_id.into(),
            enrollment_id: enrollment_id.into(),
            evidence_text: Some("done".into()),
            evidence_url: None,
        }
    }

    fn enroll(fx: &Fixture) -> String {
        fx.db
            .with_conn(|conn| enrollments::start_enrollment(conn, "u1", "q1"))
            .unwrap()
            .id
    }

    fn run_sql(fx: &Fixture, sql: &str) {
        fx.db
            .with_conn(|conn| conn.batch_execute(sql).map_err(ProgressError::from))
            .unwrap();
    }

    /// Everything a retry could possibly write to
    fn snapshot(fx: &Fixture, enrollment_id: &str) -> (DbStats, Vec<SkillXp>, Option<String>) {
        let stats = fx.db.stats().unwrap();
        fx.db
            .with_conn(|conn| {
                let ledger = skill_xp::xp_profile(conn, "u1")?;
                let enrollment = enrollments::get_enrollment(conn, enrollment_id)?;
                Ok((stats, ledger, enrollment.and_then(|e| e.completed_at)))
            })
            .unwrap()
    }

    #[test]
    fn test_three_task_quest_awards_bonus_on_last() {
        let fx = fixture();
        fx.db
            .with_conn(|conn| {
                for id in ["t1", "t2", "t3"] {
                    seed_task(conn, id, "q1", "stem", 100, true);
                }
                Ok(())
            })
            .unwrap();
        let enrollment_id = enroll(&fx);

        let first = fx.service.complete_task(&request(&enrollment_id, "t1")).unwrap();
        assert!(first.task_completed);
        assert_eq!(first.xp_awarded, 100);
        assert!(!first.quest_completed);

        let second = fx.service.complete_task(&request(&enrollment_id, "t2")).unwrap();
        assert!(second.task_completed);
        assert!(!second.quest_completed);

        let third = fx.service.complete_task(&request(&enrollment_id, "t3")).unwrap();
        assert_eq!(
            third,
            CompletionResult {
                success: true,
                task_completed: true,
                xp_awarded: 100,
                quest_completed: true,
                bonus_awarded: 150,
                bonus_pillar: Some("stem".into()),
                total_quest_xp: 300,
                error: None,
            }
        );

        let repeat = fx.service.complete_task(&request(&enrollment_id, "t3")).unwrap();
        assert!(repeat.success);
        assert!(!repeat.task_completed);
        assert_eq!(repeat.error.as_deref(), Some(ALREADY_COMPLETED));

        let stem = fx.db.with_conn(|conn| skill_xp::get_xp(conn, "u1", "stem")).unwrap();
        assert_eq!(stem, 450);
    }

    #[test]
    fn test_required_done_but_optional_open_gets_no_bonus() {
        let fx = fixture();
        fx.db
            .with_conn(|conn| {
                seed_task(conn, "req", "q1", "stem", 100, true);
                seed_task(conn, "opt", "q1", "art", 100, false);
                Ok(())
            })
            .unwrap();
        let enrollment_id = enroll(&fx);

        let result = fx.service.complete_task(&request(&enrollment_id, "req")).unwrap();
        assert!(result.quest_completed);
        assert_eq!(result.bonus_awarded, 0);
        assert_eq!(result.bonus_pillar, None);

        // Finishing the optional task later grants its XP but no bonus
        let late = fx.service.complete_task(&request(&enrollment_id, "opt")).unwrap();
        assert!(late.task_completed);
        assert!(!late.quest_completed);
        assert_eq!(late.bonus_awarded, 0);

        let art = fx.db.with_conn(|conn| skill_xp::get_xp(conn, "u1", "art")).unwrap();
        assert_eq!(art, 100);
    }

    #[test]
    fn test_invalid_identifiers_have_no_side_effects() {
        let fx = fixture();
        fx.db
            .with_conn(|conn| {
                seed_task(conn, "t1", "q1", "stem", 100, true);
                Ok(())
            })
            .unwrap();
        let enrollment_id = enroll(&fx);

        let missing_enrollment = fx.service.complete_task(&request("nope", "t1"));
        assert!(matches!(missing_enrollment, Err(ProgressError::EnrollmentNotFound(_))));

        let missing_task = fx.service.complete_task(&request(&enrollment_id, "nope"));
        assert!(matches!(missing_task, Err(ProgressError::TaskNotFound(_))));

        let mut foreign = request(&enrollment_id, "t1");
        foreign.user_id = "u2".into();
        assert!(matches!(
            fx.service.complete_task(&foreign),
            Err(ProgressError::EnrollmentNotFound(_))
        ));

        let mut blank = request(&enrollment_id, "t1");
        blank.task_id = " ".into();
        assert!(matches!(fx.service.complete_task(&blank), Err(ProgressError::InvalidInput(_))));

        let stats = fx.db.stats().unwrap();
        assert_eq!(stats.completion_count, 0);
        assert_eq!(stats.ledger_rows, 0);
    }

    #[test]
    fn test_reconcile_finishes_interrupted_request() {
        let fx = fixture();
        fx.db
            .with_conn(|conn| {
                seed_task(conn, "t1", "q1", "wellness", 80, true);
                Ok(())
            })
            .unwrap();
        let enrollment_id = enroll(&fx);

        // Simulate a request that died right after step one and its XP grant
        fx.db
            .with_conn(|conn| {
                completions::record_completion(conn, "u1", "q1", "t1", Evidence::default())?;
                skill_xp::grant_xp(conn, "u1", "wellness", 80)
            })
            .unwrap();

        let retry = fx.service.complete_task(&request(&enrollment_id, "t1")).unwrap();
        assert!(!retry.task_completed);
        assert!(!retry.quest_completed);

        let reconciled = fx.service.reconcile_quest("u1", "q1", &enrollment_id).unwrap();
        assert!(reconciled.quest_completed);
        assert_eq!(reconciled.bonus_awarded, 50);
        assert_eq!(reconciled.bonus_pillar.as_deref(), Some("wellness"));

        let again = fx.service.reconcile_quest("u1", "q1", &enrollment_id).unwrap();
        assert!(!again.quest_completed);
        assert_eq!(again.bonus_awarded, 0);

        let wellness = fx.db.with_conn(|conn| skill_xp::get_xp(conn, "u1", "wellness")).unwrap();
        assert_eq!(wellness, 130);
    }

    #[test]
    fn test_quest_progress_summary() {
        let fx = fixture();
        fx.db
            .with_conn(|conn| {
                seed_task(conn, "a", "q1", "stem", 100, true);
                seed_task(conn, "b", "q1", "art", 40, false);
                Ok(())
            })
            .unwrap();
        let enrollment_id = enroll(&fx);
        fx.service.complete_task(&request(&enrollment_id, "b")).unwrap();

        let progress = fx.service.quest_progress("u1", "q1").unwrap();
        assert_eq!(progress.total_tasks, 2);
        assert_eq!(progress.required_tasks, 1);
        assert_eq!(progress.completed_tasks, 1);
        assert_eq!(progress.completed_required, 0);
        assert_eq!(progress.earned_xp, 40);
        assert_eq!(progress.total_quest_xp, 140);
        assert!(!progress.all_tasks_done);
    }

    #[test]
    fn test_events_emitted_for_quest_completion() {
        let fx = fixture();
        let mut receiver = fx.events.subscribe();
        fx.db
            .with_conn(|conn| {
                seed_task(conn, "t1", "q1", "civics", 200, true);
                Ok(())
            })
            .unwrap();
        let enrollment_id = enroll(&fx);

        fx.service.complete_task(&request(&enrollment_id, "t1")).unwrap();

        let mut kinds = vec![];
        while let Ok(event) = receiver.try_recv() {
            kinds.push(match event {
                ProgressEvent::TaskCompleted { .. } => "task",
                ProgressEvent::XpGranted { .. } => "xp",
                ProgressEvent::QuestCompleted { .. } => "quest",
                ProgressEvent::BonusAwarded { .. } => "bonus",
            });
        }
        assert_eq!(kinds, vec!["task", "xp", "quest", "xp", "bonus"]);
    }

    #[test]
    fn test_duplicate_and_reconcile_write_nothing() {
        let fx = fixture();
        fx.db
            .with_conn(|conn| {
                seed_task(conn, "t1", "q1", "art", 60, true);
                seed_task(conn, "t2", "q1", "stem", 40, true);
                Ok(())
            })
            .unwrap();
        let enrollment_id = enroll(&fx);

        fx.service.complete_task(&request(&enrollment_id, "t1")).unwrap();
        let before = snapshot(&fx, &enrollment_id);
        let duplicate = fx.service.complete_task(&request(&enrollment_id, "t1")).unwrap();
        assert_eq!(duplicate, CompletionResult::already_completed());
        assert_eq!(snapshot(&fx, &enrollment_id), before);

        let last = fx.service.complete_task(&request(&enrollment_id, "t2")).unwrap();
        assert!(last.quest_completed);
        let completed = snapshot(&fx, &enrollment_id);
        assert!(completed.2.is_some());

        // Retries against a completed enrollment leave every row untouched
        let duplicate = fx.service.complete_task(&request(&enrollment_id, "t2")).unwrap();
        assert_eq!(duplicate, CompletionResult::already_completed());
        let reconciled = fx.service.reconcile_quest("u1", "q1", &enrollment_id).unwrap();
        assert!(!reconciled.quest_completed);
        assert_eq!(reconciled.bonus_awarded, 0);
        assert_eq!(snapshot(&fx, &enrollment_id), completed);
    }

    #[test]
    fn test_failed_task_grant_can_be_retried() {
        let fx = fixture();
        fx.db
            .with_conn(|conn| {
                seed_task(conn, "t1", "q1", "stem", 100, true);
                Ok(())
            })
            .unwrap();
        let enrollment_id = enroll(&fx);

        run_sql(
            &fx,
            "CREATE TRIGGER ledger_busy BEFORE INSERT ON skill_xp_ledger
             BEGIN SELECT RAISE(ABORT, 'database is locked'); END;",
        );

        let failed = fx.service.complete_task(&request(&enrollment_id, "t1"));
        match failed {
            Err(e) => assert!(e.is_retryable(), "unexpected error: {}", e),
            Ok(result) => panic!("grant should have failed: {:?}", result),
        }
        assert_eq!(fx.db.stats().unwrap().completion_count, 0);

        run_sql(&fx, "DROP TRIGGER ledger_busy;");

        let retry = fx.service.complete_task(&request(&enrollment_id, "t1")).unwrap();
        assert!(retry.task_completed);
        assert_eq!(retry.xp_awarded, 100);
        assert!(retry.quest_completed);
        assert_eq!(retry.bonus_awarded, 50);

        let stem = fx.db.with_conn(|conn| skill_xp::get_xp(conn, "u1", "stem")).unwrap();
        assert_eq!(stem, 150);
    }

    #[test]
    fn test_bonus_counts_optional_task_finished_during_transition() {
        let fx = fixture();
        fx.db
            .with_conn(|conn| {
                seed_task(conn, "a", "q1", "stem", 100, true);
                seed_task(conn, "c", "q1", "stem", 100, false);
                Ok(())
            })
            .unwrap();
        let enrollment_id = enroll(&fx);

        // The optional task's completion commits just before the
        // conditional update of this request runs
        run_sql(
            &fx,
            "CREATE TRIGGER racer_finishes_c BEFORE UPDATE OF completed_at ON enrollments
             BEGIN
                 INSERT INTO completions (id, user_id, quest_id, task_id, completed_at, xp_awarded)
                 VALUES ('racer', 'u1', 'q1', 'c', '2024-01-01T00:00:00.000Z', 100);
             END;",
        );

        let result = fx.service.complete_task(&request(&enrollment_id, "a")).unwrap();
        assert!(result.quest_completed);
        assert_eq!(result.bonus_awarded, 100);
        assert_eq!(result.bonus_pillar.as_deref(), Some("stem"));
        assert_eq!(result.total_quest_xp, 200);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let json = serde_json::to_value(CompletionResult::already_completed()).unwrap();
        assert_eq!(json["taskCompleted"], false);
        assert_eq!(json["error"], "already completed");
        assert!(json["bonusPillar"].is_null());
    }
}
