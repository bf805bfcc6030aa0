//! Retention policies and the soft-delete lifecycle.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// When a soft-deleted entity may be physically purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PurgeRule {
    /// Eligible once the minimum retention has elapsed after deletion.
    AfterRetention,
    /// Never eligible (legal hold, batch records).
    Never,
}

/// Minimum retention for one entity category.  Read-only to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub entity_type: String,
    pub min_retention_days: u32,
    #[serde(default = "after_retention")]
    pub purge_rule: PurgeRule,
}

impl RetentionPolicy {
    pub fn retention(&self) -> Duration {
        Duration::days(i64::from(self.min_retention_days))
    }

    /// Earliest purge time for an entity deleted at `deleted_at`, or `None`
    /// when the policy never permits purging.  A retention that runs past
    /// the representable calendar never expires.
    pub fn eligible_at(&self, deleted_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.purge_rule {
            PurgeRule::AfterRetention => deleted_at.checked_add_signed(self.retention()),
            PurgeRule::Never => None,
        }
    }
}

fn after_retention() -> PurgeRule {
    PurgeRule::AfterRetention
}

/// `Active -> SoftDeleted -> (blocked until retention expiry) -> Purged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    SoftDeleted { deleted_at: DateTime<Utc> },
    Purged,
}
