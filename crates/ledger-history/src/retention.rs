//! Soft delete and retention-gated purge.
//!
//! `Active -> SoftDeleted -> (blocked until retention expiry) -> Purged`
//!
//! Soft delete appends a DELETE record; nothing is removed.  Purge is a
//! separately authorized operation that only succeeds once the entity's
//! retention policy allows it.  Entity types without a policy are never
//! eligible.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use ledger_access::AccessOverlay;
use ledger_audit::EventRecorder;
use ledger_contracts::{
    access::{Permission, ANY},
    audit::{AuditAction, AuditRecord},
    entity::EntityKey,
    error::{LedgerError, LedgerResult},
    forensic::ForensicContext,
    mutation::MutationEvent,
    retention::{LifecycleState, RetentionPolicy},
};

/// What a purge removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReceipt {
    pub key: EntityKey,
    pub records_removed: usize,
    /// `entry_hash` of the last record before removal.
    pub final_entry_hash: String,
    pub purged_at: DateTime<Utc>,
    pub purged_by: ForensicContext,
}

pub struct RetentionManager {
    recorder: Arc<EventRecorder>,
    access: Arc<AccessOverlay>,
    policies: HashMap<String, RetentionPolicy>,
}

impl RetentionManager {
    pub fn new(
        recorder: Arc<EventRecorder>,
        access: Arc<AccessOverlay>,
        policies: impl IntoIterator<Item = RetentionPolicy>,
    ) -> Self {
        Self {
            recorder,
            access,
            policies: policies
                .into_iter()
                .map(|p| (p.entity_type.clone(), p))
                .collect(),
        }
    }

    pub fn policy(&self, entity_type: &str) -> Option<&RetentionPolicy> {
        self.policies.get(entity_type)
    }

    /// Append a DELETE record.  User actors need `write` on the entity.
    pub fn mark_deleted(
        &self,
        key: &EntityKey,
        reason_code: &str,
        forensic: ForensicContext,
    ) -> LedgerResult<AuditRecord> {
        if let Some(user_id) = forensic.actor.user_id() {
            self.access
                .require(user_id, &key.entity_type, ANY, Permission::Write)?;
        }
        let event = MutationEvent::new(key.clone(), AuditAction::Delete, forensic)
            .with_reason(reason_code);
        self.recorder.record(event)
    }

    pub fn lifecycle(&self, key: &EntityKey) -> LedgerResult<LifecycleState> {
        let store = self.recorder.store();
        if store.is_purged(key)? {
            return Ok(LifecycleState::Purged);
        }
        let history = store.history(key)?;
        if history.is_empty() {
            return Err(LedgerError::NotFound {
                what: format!("history of {key}"),
            });
        }
        Ok(history
            .iter()
            .find(|r| r.is_deleted)
            .map_or(LifecycleState::Active, |r| LifecycleState::SoftDeleted {
                deleted_at: r.timestamp_utc,
            }))
    }

    /// Earliest purge time, or `None` while the entity is active or its
    /// policy never permits purging.
    pub fn eligible_at(&self, key: &EntityKey) -> LedgerResult<Option<DateTime<Utc>>> {
        match self.lifecycle(key)? {
            LifecycleState::SoftDeleted { deleted_at } => Ok(self
                .policy(&key.entity_type)
                .and_then(|p| p.eligible_at(deleted_at))),
            LifecycleState::Active | LifecycleState::Purged => Ok(None),
        }
    }

    pub fn is_purge_eligible(&self, key: &EntityKey) -> LedgerResult<bool> {
        let now = self.recorder.clock().now();
        Ok(self.eligible_at(key)?.is_some_and(|at| at <= now))
    }

    /// Physically remove the chain of a soft-deleted entity.
    ///
    /// # Errors
    ///
    /// - `Validation` for a non-user actor or an already purged key.
    /// - `PermissionDenied` without `approve` on the entity.
    /// - `RetentionViolation` unless the entity is soft-deleted and its
    ///   retention window has elapsed.
    /// - `IntegrityViolation` if the chain is under review.
    pub fn purge(&self, key: &EntityKey, forensic: ForensicContext) -> LedgerResult<PurgeReceipt> {
        let user_id = forensic
            .actor
            .user_id()
            .ok_or_else(|| LedgerError::validation("purge must be authorized by a user"))?;
        self.access
            .require(user_id, &key.entity_type, ANY, Permission::Approve)?;

        let now = self.recorder.clock().now();
        let refuse = |reason: &str, eligible_at: Option<DateTime<Utc>>| -> LedgerResult<PurgeReceipt> {
            warn!(key = %key, user_id, reason, "purge refused");
            Err(LedgerError::RetentionViolation {
                key: key.clone(),
                reason: reason.to_string(),
                eligible_at,
            })
        };

        match self.lifecycle(key)? {
            LifecycleState::Purged => {
                return Err(LedgerError::validation(format!("{key} is already purged")));
            }
            LifecycleState::Active => return refuse("entity is not soft-deleted", None),
            LifecycleState::SoftDeleted { .. } => match self.eligible_at(key)? {
                None => return refuse("retention policy does not permit purging", None),
                Some(at) if at > now => return refuse("retention window has not elapsed", Some(at)),
                Some(_) => {}
            },
        }

        self.recorder.reviews().ensure_trusted(key)?;

        let store = self.recorder.store();
        let final_entry_hash = store
            .head(key)?
            .map(|h| h.entry_hash)
            .unwrap_or_default();
        let records_removed = store.purge(key)?;

        info!(key = %key, user_id, records_removed, "entity purged");
        Ok(PurgeReceipt {
            key: key.clone(),
            records_removed,
            final_entry_hash,
            purged_at: now,
            purged_by: forensic,
        })
    }
}
