//! XP accumulator over the per-user, per-pillar skill ledger
//!
//! Grants are applied with `INSERT ... ON CONFLICT DO UPDATE SET
//! xp_amount = xp_amount + excluded.xp_amount`, so the addition happens in
//! the store and concurrent grants to the same key never overwrite each
//! other.

use diesel::prelude::*;
use diesel::upsert::excluded;
use tracing::{debug, error};

use super::diesel_schema::skill_xp_ledger;
use super::models::{current_timestamp, pillars, NewSkillXp, SkillXp};
use crate::error::ProgressError;

/// Add `amount` XP to (user, pillar), creating the row if needed
///
/// Returns the ledger total right after this grant. The increment and the
/// read run in one IMMEDIATE transaction, so the total includes this grant
/// and any grant committed before it, but nothing committed after.
pub fn grant_xp(
    conn: &mut SqliteConnection,
    user_id: &str,
    pillar: &str,
    amount: i64,
) -> Result<i64, ProgressError> {
    let total = conn.immediate_transaction(|conn| increment_xp(conn, user_id, pillar, amount))?;

    debug!(user_id, pillar, amount, total, "XP granted");
    Ok(total)
}

/// The grant itself, without a transaction of its own
///
/// Callers must already hold a write transaction so that the returned total
/// is read together with the increment. `grant_xp` is the standalone form;
/// the completion service calls this next to the completion insert.
pub fn increment_xp(
    conn: &mut SqliteConnection,
    user_id: &str,
    pillar: &str,
    amount: i64,
) -> Result<i64, ProgressError> {
    if amount < 0 {
        error!(user_id, pillar, amount, "Refusing negative XP grant");
        return Err(ProgressError::InvariantViolation(format!(
            "negative XP grant of {} for {}/{}",
            amount, user_id, pillar
        )));
    }

    if !pillars::is_valid(pillar) {
        return Err(ProgressError::InvalidInput(format!(
            "Invalid pillar: {}. Valid pillars: {:?}",
            pillar,
            pillars::ALL
        )));
    }

    let now = current_timestamp();

    diesel::insert_into(skill_xp_ledger::table)
        .values(&NewSkillXp {
            user_id,
            pillar,
            xp_amount: amount,
            updated_at: &now,
        })
        .on_conflict((skill_xp_ledger::user_id, skill_xp_ledger::pillar))
        .do_update()
        .set((
            skill_xp_ledger::xp_amount
                .eq(skill_xp_ledger::xp_amount + excluded(skill_xp_ledger::xp_amount)),
            skill_xp_ledger::updated_at.eq(excluded(skill_xp_ledger::updated_at)),
        ))
        .execute(conn)
        .map_err(|e| ProgressError::store("XP upsert failed", e))?;

    let total = skill_xp_ledger::table
        .filter(skill_xp_ledger::user_id.eq(user_id))
        .filter(skill_xp_ledger::pillar.eq(pillar))
        .select(skill_xp_ledger::xp_amount)
        .first::<i64>(conn)
        .map_err(|e| ProgressError::store("Query failed", e))?;

    if total < amount {
        error!(user_id, pillar, amount, total, "Ledger total below applied grant");
        return Err(ProgressError::InvariantViolation(format!(
            "ledger total {} for {}/{} is below grant {}",
            total, user_id, pillar, amount
        )));
    }

    Ok(total)
}

// ============================================================================
// Read Operations
// ============================================================================

/// XP for a (user, pillar); 0 when the user has none yet
pub fn get_xp(
    conn: &mut SqliteConnection,
    user_id: &str,
    pillar: &str,
) -> Result<i64, ProgressError> {
    skill_xp_ledger::table
        .filter(skill_xp_ledger::user_id.eq(user_id))
        .filter(skill_xp_ledger::pillar.eq(pillar))
        .select(skill_xp_ledger::xp_amount)
        .first::<i64>(conn)
        .optional()
        .map(|v| v.unwrap_or(0))
        .map_err(|e| ProgressError::store("Query failed", e))
}

/// Every ledger row for a user, ordered by pillar
pub fn xp_profile(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<SkillXp>, ProgressError> {
    skill_xp_ledger::table
        .filter(skill_xp_ledger::user_id.eq(user_id))
        .order(skill_xp_ledger::pillar.asc())
        .select(SkillXp::as_select())
        .load(conn)
        .map_err(|e| ProgressError::store("Query failed", e))
}

/// Sum of a user's XP across all pillars
pub fn total_xp(conn: &mut SqliteConnection, user_id: &str) -> Result<i64, ProgressError> {
    Ok(xp_profile(conn, user_id)?.iter().map(|row| row.xp_amount).sum())
}
