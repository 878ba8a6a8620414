//! Database schema definitions
//!
//! Two constraints carry the engine's concurrency guarantees and must never
//! be dropped by a migration:
//!
//! - `completions` UNIQUE (user_id, task_id)
//! - `skill_xp_ledger` PRIMARY KEY (user_id, pillar), the upsert target

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use tracing::info;

use crate::error::ProgressError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

#[derive(QueryableByName)]
struct VersionRow {
    #[diesel(sql_type = Integer)]
    version: i32,
}

/// Initialize the database schema
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), ProgressError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32, ProgressError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .map_err(|e| ProgressError::store("Failed to create schema_version table", e))?;

    let row: Option<VersionRow> = diesel::sql_query("SELECT version FROM schema_version LIMIT 1")
        .get_result(conn)
        .optional()
        .map_err(|e| ProgressError::store("Failed to read schema_version", e))?;

    Ok(row.map(|r| r.version).unwrap_or(0))
}

/// Set schema version
fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<(), ProgressError> {
    diesel::sql_query("DELETE FROM schema_version")
        .execute(conn)
        .map_err(|e| ProgressError::store("Failed to clear schema_version", e))?;
    diesel::sql_query("INSERT INTO schema_version (version) VALUES (?)")
        .bind::<Integer, _>(version)
        .execute(conn)
        .map_err(|e| ProgressError::store("Failed to set schema_version", e))?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &mut SqliteConnection) -> Result<(), ProgressError> {
    conn.batch_execute(CATALOG_SCHEMA)
        .map_err(|e| ProgressError::store("Failed to create catalog tables", e))?;

    conn.batch_execute(PROGRESS_SCHEMA)
        .map_err(|e| ProgressError::store("Failed to create progress tables", e))?;

    conn.batch_execute(INDEXES_SCHEMA)
        .map_err(|e| ProgressError::store("Failed to create indexes", e))?;

    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &mut SqliteConnection, _from_version: i32) -> Result<(), ProgressError> {
    // Every statement in v1 is idempotent, so re-running it brings any
    // partially created database up to date.
    create_tables(conn)?;
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Task catalog schema (read-only to the completion engine)
const CATALOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY NOT NULL,
    quest_id TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    pillar TEXT NOT NULL,
    xp_value INTEGER NOT NULL DEFAULT 0 CHECK (xp_value >= 0),
    is_required INTEGER NOT NULL DEFAULT 0,
    order_index INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Enrollment, completion, and XP ledger schema
const PROGRESS_SCHEMA: &str = r#"
-- A user's attempt at a quest; completed_at is written once
CREATE TABLE IF NOT EXISTS enrollments (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    quest_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    is_active INTEGER NOT NULL DEFAULT 1
);

-- One row per (user, task), ever
CREATE TABLE IF NOT EXISTS completions (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    quest_id TEXT NOT NULL,
    task_id TEXT NOT NULL,
    evidence_text TEXT,
    evidence_url TEXT,
    completed_at TEXT NOT NULL,
    xp_awarded INTEGER NOT NULL DEFAULT 0,
    UNIQUE (user_id, task_id),
    FOREIGN KEY (task_id) REFERENCES tasks(id)
);

-- Cumulative XP per (user, pillar)
CREATE TABLE IF NOT EXISTS skill_xp_ledger (
    user_id TEXT NOT NULL,
    pillar TEXT NOT NULL,
    xp_amount INTEGER NOT NULL DEFAULT 0 CHECK (xp_amount >= 0),
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, pillar)
);
"#;

/// Index schema
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_tasks_quest ON tasks(quest_id);
CREATE INDEX IF NOT EXISTS idx_enrollments_user_quest ON enrollments(user_id, quest_id);
CREATE INDEX IF NOT EXISTS idx_completions_user_quest ON completions(user_id, quest_id);
"#;
