//! Status condition bookkeeping.
//!
//! One condition per type. `upsert` replaces in place or appends, and
//! always restamps `last_transition_time` and `observed_generation`, even
//! when status, reason and message are unchanged. That keeps the timestamp
//! meaning "last evaluated" at the cost of a status write on every pass.

use chrono::{DateTime, Utc};

use alertrule_state::{Condition, ConditionStatus};

pub const READY: &str = "Ready";
pub const AVAILABLE: &str = "Available";
pub const PROGRESSING: &str = "Progressing";
pub const DEGRADED: &str = "Degraded";

pub mod reason {
    pub const RECONCILING: &str = "Reconciling";
    pub const RECONCILED: &str = "Reconciled";
    pub const GENERATION_FAILED: &str = "GenerationFailed";
    pub const ERROR: &str = "Error";
}

/// Desired observation, before stamping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionUpdate {
    pub r#type: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
}

impl ConditionUpdate {
    pub fn new(
        r#type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type: r#type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

pub fn upsert(conditions: &mut Vec<Condition>, update: ConditionUpdate, generation: i64) {
    upsert_at(conditions, update, generation, Utc::now());
}

pub fn upsert_at(
    conditions: &mut Vec<Condition>,
    update: ConditionUpdate,
    generation: i64,
    now: DateTime<Utc>,
) {
    let condition = Condition {
        r#type: update.r#type,
        status: update.status,
        reason: update.reason,
        message: update.message,
        last_transition_time: now,
        observed_generation: generation,
    };
    match conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

pub fn find<'a>(conditions: &'a [Condition], r#type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == r#type)
}

pub fn is_true(conditions: &[Condition], r#type: &str) -> bool {
    find(conditions, r#type).is_some_and(|c| c.status == ConditionStatus::True)
}
