//! SQLite database module for quest progress
//!
//! All mutual exclusion between concurrent requests lives in the store
//! itself. Nothing in this crate holds an application-level lock across a
//! request; correctness comes from two store constraints:
//!
//! - `completions` UNIQUE (user_id, task_id), used as insert-as-lock
//! - `UPDATE enrollments ... WHERE completed_at IS NULL`, a compare-and-swap
//!
//! ## Tables
//!
//! - `tasks` - Quest task catalog (read-only to the engine)
//! - `enrollments` - A user's attempt at a quest
//! - `completions` - One row per (user, task)
//! - `skill_xp_ledger` - Cumulative XP per (user, pillar)

pub mod schema;
pub mod diesel_schema;
pub mod models;
pub mod tasks;
pub mod enrollments;
pub mod completions;
pub mod skill_xp;

use std::path::Path;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ProgressError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection PRAGMAs applied whenever the pool hands out a connection
#[derive(Debug, Clone, Copy)]
struct ConnectionPragmas {
    busy_timeout_ms: u64,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionPragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout_ms
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// SQLite database for tasks, enrollments, completions and XP
pub struct ProgressDb {
    pool: DbPool,
}

impl ProgressDb {
    /// Open or create the progress database described by `config`
    pub fn open(config: &Config) -> Result<Self, ProgressError> {
        std::fs::create_dir_all(&config.storage_dir)?;
        Self::open_path(&config.database_path(), config.pool_size, config.busy_timeout_ms)
    }

    /// Open or create a database file with an explicit pool size
    pub fn open_path(
        db_path: &Path,
        pool_size: u32,
        busy_timeout_ms: u64,
    ) -> Result<Self, ProgressError> {
        info!("Opening SQLite database at {:?}", db_path);

        let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(Duration::from_millis(busy_timeout_ms.max(1000) * 2))
            .connection_customizer(Box::new(ConnectionPragmas { busy_timeout_ms }))
            .build(manager)
            .map_err(|e| ProgressError::StoreUnavailable(format!("Failed to open SQLite: {}", e)))?;

        let db = Self { pool };

        // WAL is persistent in the database file, so set it once here
        db.with_conn(|conn| {
            conn.batch_execute("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
                .map_err(|e| ProgressError::store("Failed to set PRAGMA", e))
        })?;

        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    ///
    /// Every SQLite in-memory connection is its own database, so the pool is
    /// capped at a single connection.
    pub fn open_in_memory() -> Result<Self, ProgressError> {
        debug!("Opening in-memory SQLite database");

        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_customizer(Box::new(ConnectionPragmas { busy_timeout_ms: 5000 }))
            .build(manager)
            .map_err(|e| {
                ProgressError::StoreUnavailable(format!("Failed to open in-memory SQLite: {}", e))
            })?;

        let db = Self { pool };
        db.init_schema()?;

        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), ProgressError> {
        self.with_conn(schema::init_schema)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<PooledConn, ProgressError> {
        self.pool.get().map_err(|e| {
            ProgressError::StoreUnavailable(format!("Failed to get connection: {}", e))
        })
    }

    /// Run `f` with one pooled connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ProgressError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, ProgressError>,
    {
        let mut conn = self.conn()?;
        f(&mut *conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, ProgressError> {
        use diesel_schema::{completions, enrollments, skill_xp_ledger, tasks};

        self.with_conn(|conn| {
            let task_count: i64 = tasks::table.count().get_result(conn)?;
            let enrollment_count: i64 = enrollments::table.count().get_result(conn)?;
            let completed_enrollments: i64 = enrollments::table
                .filter(enrollments::completed_at.is_not_null())
                .count()
                .get_result(conn)?;
            let completion_count: i64 = completions::table.count().get_result(conn)?;
            let ledger_rows: i64 = skill_xp_ledger::table.count().get_result(conn)?;

            Ok(DbStats {
                task_count: task_count as u64,
                enrollment_count: enrollment_count as u64,
                completed_enrollments: completed_enrollments as u64,
                completion_count: completion_count as u64,
                ledger_rows: ledger_rows as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DbStats {
    pub task_count: u64,
    pub enrollment_count: u64,
    pub completed_enrollments: u64,
    pub completion_count: u64,
    pub ledger_rows: u64,
}

// Re-exports
pub use completions::InsertOutcome;
pub use enrollments::CompletionTransition;
pub use models::{Completion, Enrollment, SkillXp, Task};
pub use tasks::{BulkTaskResult, CreateTaskInput};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_empty_stats() {
        let db = ProgressDb::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.task_count, 0);
        assert_eq!(stats.completion_count, 0);
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage_dir = dir.path().join("nested");
        config.pool_size = 2;

        let db = ProgressDb::open(&config).unwrap();
        assert!(config.database_path().exists());
        assert_eq!(db.stats().unwrap().ledger_rows, 0);

        // Reopening an initialized database keeps the schema
        drop(db);
        let reopened = ProgressDb::open(&config).unwrap();
        assert_eq!(reopened.stats().unwrap().enrollment_count, 0);
    }
}
