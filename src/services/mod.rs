//! Service layer for quest-progress
//!
//! Services sit between callers (route handlers, the CLI) and the
//! repositories in `db/`. Each service wraps database operations with:
//! - Input validation
//! - Cross-entity orchestration
//! - Event emission for notifications/analytics
//!
//! ## Architecture
//!
//! ```text
//! Callers (route handlers, CLI)
//!     ↓
//! Service Layer (orchestration)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod events;
pub mod bonus;
pub mod quest_completion;
pub mod completion_service;

// Re-exports
pub use events::{EventBus, EventListener, ProgressEvent};
pub use bonus::{compute_bonus, CompletionBonus};
pub use quest_completion::{check_and_complete, QuestCheck};
pub use completion_service::{
    CompleteTaskRequest, CompletionResult, CompletionService, QuestProgress, ALREADY_COMPLETED,
};

use crate::db::ProgressDb;
use std::sync::Arc;

/// Service container for dependency injection
///
/// Built once at process start and shared by reference with every request
/// handler. It holds no per-request mutable state.
pub struct Services {
    pub completion: Arc<CompletionService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services with shared database
    pub fn new(db: Arc<ProgressDb>) -> Self {
        Self::with_event_capacity(db, 1024)
    }

    /// Create all services with a custom event buffer size
    pub fn with_event_capacity(db: Arc<ProgressDb>, event_capacity: usize) -> Self {
        let events = Arc::new(EventBus::with_capacity(event_capacity));

        Self {
            completion: Arc::new(CompletionService::new(db, events.clone())),
            events,
        }
    }
}
