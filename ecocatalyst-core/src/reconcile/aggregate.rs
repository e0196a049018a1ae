//! Derived aggregates.
//!
//! Everything here is a pure function of an entity list (or stats record) and
//! a "now" timestamp, so the result is always consistent with the collection
//! it was computed from.

use serde_json::Value;

use crate::clock::{Calendar, DAY_MS, HOUR_MS};
use crate::models::{
    Achievement, FootprintCategory, FootprintEntry, FootprintSummary, LeaderboardEntry, UserStats,
};

/// Divisor used for `averagePerDay`; a month is approximated as 30 days.
pub const DAYS_PER_MONTH: f64 = 30.0;

/// Totals carbon by time window and by category.
///
/// Windows start at the calendar start of today and 7, 30 and 365 days
/// before it; an entry counts when `timestamp >= windowStart`. Categories
/// are summed over the whole list.
pub fn summarize_footprint(
    entries: &[FootprintEntry],
    now: i64,
    calendar: &Calendar,
) -> FootprintSummary {
    let today = calendar.start_of_today(now);
    let week = today - 7 * DAY_MS;
    let month = today - 30 * DAY_MS;
    let year = today - 365 * DAY_MS;

    let mut summary = FootprintSummary::default();
    for entry in entries {
        let amount = entry.carbon_amount;
        *summary.by_category.entry(entry.category).or_insert(0.0) += amount;
        if entry.timestamp >= today {
            summary.daily += amount;
        }
        if entry.timestamp >= week {
            summary.weekly += amount;
        }
        if entry.timestamp >= month {
            summary.monthly += amount;
        }
        if entry.timestamp >= year {
            summary.yearly += amount;
        }
    }
    summary.average_per_day = if summary.monthly > 0.0 {
        summary.monthly / DAYS_PER_MONTH
    } else {
        0.0
    };
    debug_assert_eq!(summary.by_category.len(), FootprintCategory::ALL.len());
    summary
}

/// Result of evaluating one achievement against a user's stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// 0-100
    pub progress: i64,
    pub all_met: bool,
}

/// Averages the per-requirement progress of `achievement`.
///
/// Each requirement contributes `min(100, current / target * 100)`. A rounded
/// average of 100 is only reported when every requirement is met, so an
/// achievement can never look complete without being awarded.
pub fn evaluate_achievement(achievement: &Achievement, stats: &UserStats) -> Evaluation {
    if achievement.requirements.is_empty() {
        return Evaluation {
            progress: 0,
            all_met: false,
        };
    }

    let mut all_met = true;
    let mut total = 0.0;
    for requirement in &achievement.requirements {
        let progress = if requirement.target <= 0.0 {
            100.0
        } else {
            (stats.counter(requirement.kind) / requirement.target * 100.0).min(100.0)
        };
        if progress < 100.0 {
            all_met = false;
        }
        total += progress / achievement.requirements.len() as f64;
    }

    let mut progress = total.round() as i64;
    if !all_met {
        progress = progress.min(99);
    }
    Evaluation { progress, all_met }
}

/// `floor(points / 100) + 1`, never below 1.
pub fn level_for_points(total_points: i64) -> i64 {
    (total_points.div_euclid(100) + 1).max(1)
}

/// Consecutive-day streak after activity moves from `previous` to `next`.
///
/// More than 48 hours apart resets the streak to 1. More than 20 hours apart
/// on a different calendar day extends it. Anything else leaves it alone, so
/// repeated activity on one day never double-counts.
pub fn next_streak(current: i64, previous: i64, next: i64, calendar: &Calendar) -> i64 {
    let gap = next - previous;
    if gap > 48 * HOUR_MS {
        1
    } else if gap > 20 * HOUR_MS && !calendar.same_day(previous, next) {
        current + 1
    } else {
        current
    }
}

/// Builds leaderboard rows from a `userStats` query result, highest points
/// first.
pub fn parse_leaderboard(data: &Value) -> Vec<LeaderboardEntry> {
    let Some(rows) = data.as_object() else {
        return Vec::new();
    };
    let mut entries: Vec<LeaderboardEntry> = rows
        .iter()
        .map(|(user_id, row)| LeaderboardEntry {
            user_id: user_id.clone(),
            display_name: row
                .get("displayName")
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
                .unwrap_or("Anonymous")
                .to_string(),
            photo_url: row
                .get("photoURL")
                .and_then(Value::as_str)
                .map(str::to_string),
            total_points: row.get("totalPoints").and_then(Value::as_i64).unwrap_or(0),
            level: row
                .get("level")
                .and_then(Value::as_i64)
                .filter(|level| *level > 0)
                .unwrap_or(1),
        })
        .collect();
    entries.sort_by(|a, b| b.total_points.cmp(&a.total_points));
    entries
}
