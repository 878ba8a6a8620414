//! Quest completion bonus calculation
//!
//! Pure functions only: no store access, no side effects.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::db::models::Task;

/// Bonus amounts are rounded up to a multiple of this
pub const BONUS_ROUNDING: i64 = 50;

/// Bonus for completing every task in a quest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionBonus {
    pub bonus_xp: i64,
    /// None only when the quest has no tasks
    pub pillar: Option<String>,
}

/// Sum of xp values across all tasks
pub fn total_task_xp(tasks: &[Task]) -> i64 {
    tasks.iter().map(|t| t.xp_value).sum()
}

/// 50% of `total_xp`, rounded up to the nearest multiple of 50
///
/// `ceil(total * 0.5 / 50) * 50` is `ceil(total / 100) * 50` in integers.
pub fn bonus_amount(total_xp: i64) -> i64 {
    if total_xp <= 0 {
        return 0;
    }
    let units = (total_xp + 2 * BONUS_ROUNDING - 1) / (2 * BONUS_ROUNDING);
    units * BONUS_ROUNDING
}

/// Pillar with the most tasks; ties go to the lexicographically smallest
/// pillar name so the result never depends on task order.
pub fn dominant_pillar(tasks: &[Task]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for task in tasks {
        *counts.entry(task.pillar.as_str()).or_insert(0) += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for (pillar, count) in counts {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((pillar, count)),
        }
    }

    best.map(|(pillar, _)| pillar.to_string())
}

/// Compute the full-completion bonus for a quest's tasks
pub fn compute_bonus(tasks: &[Task]) -> CompletionBonus {
    CompletionBonus {
        bonus_xp: bonus_amount(total_task_xp(tasks)),
        pillar: dominant_pillar(tasks),
    }
}
