//! Task catalog operations using Diesel
//!
//! Tasks are owned by the quest authoring side. The completion engine only
//! reads them; `create_task` and `bulk_create_tasks` exist for seeding and
//! operator imports.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::diesel_schema::tasks;
use super::models::{current_timestamp, pillars, NewTask, Task};
use crate::error::ProgressError;

// ============================================================================
// Query Types
// ============================================================================

/// Input for creating a task
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskInput {
    #[serde(default)]
    pub id: Option<String>,
    pub quest_id: String,
    #[serde(default)]
    pub title: String,
    pub pillar: String,
    #[serde(default)]
    pub xp_value: i64,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub order_index: i32,
}

/// Result of bulk task import
#[derive(Debug, Clone, Serialize)]
pub struct BulkTaskResult {
    pub inserted: u64,
    pub skipped: u64,
    pub errors: Vec<String>,
}

// ============================================================================
// Read Operations
// ============================================================================

/// Get task by ID
pub fn get_task(conn: &mut SqliteConnection, task_id: &str) -> Result<Option<Task>, ProgressError> {
    tasks::table
        .filter(tasks::id.eq(task_id))
        .select(Task::as_select())
        .first(conn)
        .optional()
        .map_err(|e| ProgressError::store("Query failed", e))
}

/// List every task of a quest in display order
pub fn list_tasks_for_quest(
    conn: &mut SqliteConnection,
    quest_id: &str,
) -> Result<Vec<Task>, ProgressError> {
    tasks::table
        .filter(tasks::quest_id.eq(quest_id))
        .order((tasks::order_index.asc(), tasks::id.asc()))
        .select(Task::as_select())
        .load(conn)
        .map_err(|e| ProgressError::store("Query failed", e))
}

// ============================================================================
// Write Operations
// ============================================================================

/// Create a task in the catalog
pub fn create_task(
    conn: &mut SqliteConnection,
    input: CreateTaskInput,
) -> Result<Task, ProgressError> {
    let pillar = validate_task(&input)?;
    let id = input.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = current_timestamp();

    let new_task = NewTask {
        id: &id,
        quest_id: &input.quest_id,
        title: &input.title,
        pillar,
        xp_value: input.xp_value,
        is_required: input.is_required,
        order_index: input.order_index,
        created_at: &now,
    };

    diesel::insert_into(tasks::table)
        .values(&new_task)
        .execute(conn)
        .map_err(|e| ProgressError::store("Insert failed", e))?;

    get_task(conn, &id)?
        .ok_or_else(|| ProgressError::Internal("Failed to retrieve created task".into()))
}

/// Import many tasks in one transaction, skipping ids that already exist
pub fn bulk_create_tasks(
    conn: &mut SqliteConnection,
    inputs: Vec<CreateTaskInput>,
) -> Result<BulkTaskResult, ProgressError> {
    conn.transaction(|conn| {
        let mut inserted = 0u64;
        let mut skipped = 0u64;
        let mut errors = vec![];

        for input in inputs {
            if let Some(ref id) = input.id {
                if get_task(conn, id)?.is_some() {
                    skipped += 1;
                    continue;
                }
            }

            let label = input.id.clone().unwrap_or_else(|| input.title.clone());
            match create_task(conn, input) {
                Ok(_) => inserted += 1,
                Err(e @ ProgressError::InvalidInput(_)) => {
                    errors.push(format!("{}: {}", label, e));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(BulkTaskResult { inserted, skipped, errors })
    })
}

/// Validate input and return the canonical pillar
fn validate_task(input: &CreateTaskInput) -> Result<&'static str, ProgressError> {
    if input.quest_id.is_empty() {
        return Err(ProgressError::InvalidInput("quest_id is required".into()));
    }

    if input.xp_value < 0 {
        return Err(ProgressError::InvalidInput(format!(
            "xp_value must be non-negative, got {}",
            input.xp_value
        )));
    }

    pillars::normalize(&input.pillar).ok_or_else(|| {
        ProgressError::InvalidInput(format!(
            "Invalid pillar: {}. Valid pillars: {:?}",
            input.pillar,
            pillars::ALL
        ))
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Seed one task with an explicit id
    pub fn seed_task(
        conn: &mut SqliteConnection,
        id: &str,
        quest_id: &str,
        pillar: &str,
        xp_value: i64,
        is_required: bool,
    ) -> Task {
        create_task(conn, CreateTaskInput {
            id: Some(id.to_string()),
            quest_id: quest_id.to_string(),
            title: format!("Task {}", id),
            pillar: pillar.to_string(),
            xp_value,
            is_required,
            order_index: 0,
        })
        .expect("seed task")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::seed_task;
    use super::*;
    use crate::db::ProgressDb;

    #[test]
    fn test_create_and_list_tasks() {
        let db = ProgressDb::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        seed_task(&mut conn, "t2", "q1", "stem", 50, true);
        seed_task(&mut conn, "t1", "q1", "art", 100, false);
        seed_task(&mut conn, "other", "q2", "civics", 10, true);

        let listed = list_tasks_for_quest(&mut conn, "q1").unwrap();
        let ids: Vec<&str> = listed.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
        assert_eq!(list_tasks_for_quest(&mut conn, "q2").unwrap().len(), 1);
    }

    #[test]
    fn test_legacy_pillar_is_normalized() {
        let db = ProgressDb::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        let task = seed_task(&mut conn, "t1", "q1", "stem_logic", 25, true);
        assert_eq!(task.pillar, pillars::STEM);
    }

    #[test]
    fn test_invalid_task_rejected() {
        let db = ProgressDb::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        let bad_pillar = create_task(&mut conn, CreateTaskInput {
            id: None,
            quest_id: "q1".into(),
            title: "x".into(),
            pillar: "juggling".into(),
            xp_value: 10,
            is_required: false,
            order_index: 0,
        });
        assert!(matches!(bad_pillar, Err(ProgressError::InvalidInput(_))));

        let negative = create_task(&mut conn, CreateTaskInput {
            id: None,
            quest_id: "q1".into(),
            title: "x".into(),
            pillar: "stem".into(),
            xp_value: -5,
            is_required: false,
            order_index: 0,
        });
        assert!(matches!(negative, Err(ProgressError::InvalidInput(_))));
    }

    #[test]
    fn test_bulk_create_skips_existing() {
        let db = ProgressDb::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        let input = |id: &str, pillar: &str| CreateTaskInput {
            id: Some(id.to_string()),
            quest_id: "q1".into(),
            title: id.to_string(),
            pillar: pillar.to_string(),
            xp_value: 10,
            is_required: true,
            order_index: 0,
        };

        let first =
            bulk_create_tasks(&mut conn, vec![input("a", "stem"), input("b", "art")]).unwrap();
        assert_eq!(first.inserted, 2);

        let second =
            bulk_create_tasks(&mut conn, vec![input("a", "stem"), input("c", "nope")]).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(second.errors.len(), 1);
    }
}
