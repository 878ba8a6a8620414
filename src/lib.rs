//! Quest Progress - exactly-once task completion and XP engine
//!
//! Learners enroll in quests made of tasks, complete tasks with evidence,
//! and accumulate XP per skill pillar. This crate owns the part of that
//! flow that must stay correct under duplicate and concurrent requests
//! (retries, double-clicks, several devices).
//!
//! ## Guarantees
//!
//! | Fact | Mechanism |
//! |------|-----------|
//! | One completion per (user, task) | UNIQUE index, insert-as-lock |
//! | XP applied once per grant | upsert with in-store increment |
//! | Completion never without its task XP | insert and grant share one short write transaction |
//! | Quest completes once | `UPDATE ... WHERE completed_at IS NULL` |
//! | Bonus only for the completing caller | bonus follows the conditional update |
//! | Bonus reflects completions at transition | completions re-read with the conditional update |
//!
//! No in-process lock coordinates requests, so the guarantees hold across
//! any number of processes sharing one database.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/quest-progress/
//! ├── progress.db            # SQLite (WAL mode)
//! └── config.toml            # Configuration
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod services;

// Re-exports
pub use config::Config;
pub use db::ProgressDb;
pub use error::ProgressError;
pub use services::{
    CompleteTaskRequest, CompletionResult, CompletionService, EventBus, ProgressEvent,
    QuestProgress, Services,
};
