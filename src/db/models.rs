//! Diesel model definitions for database tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::diesel_schema::*;

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

/// Get current UTC timestamp as ISO 8601 string for SQLite TEXT columns
pub fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

// ============================================================================
// Task Models
// ============================================================================

/// Task row from the quest catalog
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Task {
    pub id: String,
    pub quest_id: String,
    pub title: String,
    pub pillar: String,
    pub xp_value: i64,
    pub is_required: bool,
    pub order_index: i32,
    pub created_at: String,
}

/// New task for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask<'a> {
    pub id: &'a str,
    pub quest_id: &'a str,
    pub title: &'a str,
    pub pillar: &'a str,
    pub xp_value: i64,
    pub is_required: bool,
    pub order_index: i32,
    pub created_at: &'a str,
}

// ============================================================================
// Enrollment Models
// ============================================================================

/// Enrollment row; `completed_at` is None while the quest is active
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = enrollments)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Enrollment {
    pub id: String,
    pub user_id: String,
    pub quest_id: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub is_active: bool,
}

impl Enrollment {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// New enrollment for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = enrollments)]
pub struct NewEnrollment<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub quest_id: &'a str,
    pub started_at: &'a str,
    pub is_active: bool,
}

// ============================================================================
// Completion Models
// ============================================================================

/// Completion row - evidence that a user finished a task
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = completions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Completion {
    pub id: String,
    pub user_id: String,
    pub quest_id: String,
    pub task_id: String,
    pub evidence_text: Option<String>,
    pub evidence_url: Option<String>,
    pub completed_at: String,
    pub xp_awarded: i64,
}

/// New completion for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = completions)]
pub struct NewCompletion<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub quest_id: &'a str,
    pub task_id: &'a str,
    pub evidence_text: Option<&'a str>,
    pub evidence_url: Option<&'a str>,
    pub completed_at: &'a str,
    pub xp_awarded: i64,
}

// ============================================================================
// Skill XP Ledger Models
// ============================================================================

/// Cumulative XP for one (user, pillar)
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = skill_xp_ledger)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SkillXp {
    pub user_id: String,
    pub pillar: String,
    pub xp_amount: i64,
    pub updated_at: String,
}

/// Ledger row for the upsert-increment
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = skill_xp_ledger)]
pub struct NewSkillXp<'a> {
    pub user_id: &'a str,
    pub pillar: &'a str,
    pub xp_amount: i64,
    pub updated_at: &'a str,
}

// ============================================================================
// Pillar Constants
// ============================================================================

/// Skill pillars that XP is tracked against
pub mod pillars {
    pub const STEM: &str = "stem";
    pub const ART: &str = "art";
    pub const COMMUNICATION: &str = "communication";
    pub const WELLNESS: &str = "wellness";
    pub const CIVICS: &str = "civics";

    /// All canonical pillars
    pub const ALL: [&str; 5] = [STEM, ART, COMMUNICATION, WELLNESS, CIVICS];

    /// Check if a pillar is canonical
    pub fn is_valid(pillar: &str) -> bool {
        ALL.contains(&pillar)
    }

    /// Map a canonical or legacy pillar name to its canonical form
    pub fn normalize(pillar: &str) -> Option<&'static str> {
        let key = pillar.trim().to_ascii_lowercase();
        let canonical = match key.as_str() {
            STEM | "stem_logic" | "critical_thinking" => STEM,
            ART | "arts_creativity" | "creativity" => ART,
            COMMUNICATION | "language_communication" => COMMUNICATION,
            WELLNESS | "life_wellness" | "practical_skills" => WELLNESS,
            CIVICS | "society_culture" | "cultural_literacy" => CIVICS,
            _ => return None,
        };
        Some(canonical)
    }
}
