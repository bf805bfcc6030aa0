//! Signed, forward-only rollback.
//!
//! A rollback never rewrites or removes a version.  It appends a ROLLBACK
//! record at `current + 1` whose `new_value` is the reconstructed target
//! state and whose `old_value` is the state being replaced.

use std::{collections::BTreeSet, sync::Arc};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use ledger_access::AccessOverlay;
use ledger_audit::{EventRecorder, LedgerAttachment};
use ledger_contracts::{
    access::{Permission, ANY},
    audit::{AuditAction, AuditRecord},
    entity::EntityKey,
    error::{LedgerError, LedgerResult},
    forensic::ForensicContext,
    mutation::MutationEvent,
};
use ledger_signature::SignatureService;

use crate::reconstruct::{replay, EntityState};

/// A request to restore an earlier version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub key: EntityKey,
    pub target_version: u64,
    /// Signature with meaning `rollback` over the current head record.
    /// Required for regulated entity types.
    pub signature_id: Option<u64>,
    pub reason_code: String,
    pub forensic: ForensicContext,
    /// Version the caller based the request on.
    pub expected_version: Option<u64>,
}

pub struct RollbackManager {
    recorder: Arc<EventRecorder>,
    signatures: Arc<SignatureService>,
    access: Arc<AccessOverlay>,
    signature_max_age: Duration,
}

impl RollbackManager {
    pub fn new(
        recorder: Arc<EventRecorder>,
        signatures: Arc<SignatureService>,
        access: Arc<AccessOverlay>,
        signature_max_age: Duration,
    ) -> Self {
        Self {
            recorder,
            signatures,
            access,
            signature_max_age,
        }
    }

    /// State of `key` as of `at_version`.
    pub fn reconstruct(&self, key: &EntityKey, at_version: u64) -> LedgerResult<EntityState> {
        let history = self.recorder.store().history(key)?;
        replay(key, &history, at_version)
    }

    /// Restore `request.target_version` by appending a ROLLBACK record.
    ///
    /// Checks, in order: request shape, version bounds, soft-delete state,
    /// `rollback` permission on the entity and on each field present in
    /// either snapshot, the rollback signature, and chain integrity.  Nothing is written unless every check passes.
    ///
    /// # Errors
    ///
    /// - `Validation` for a missing reason, a non-user actor, a target
    ///   outside `1..current`, or a soft-deleted entity.
    /// - `VersionConflict` if `expected_version` is stale or another writer
    ///   appends first.
    /// - `PermissionDenied` if the overlay refuses `rollback` or a regulated
    ///   entity lacks an acceptable fresh signature.
    /// - `IntegrityViolation` if the chain fails verification or is under
    ///   review.
    pub fn rollback(&self, request: RollbackRequest) -> LedgerResult<AuditRecord> {
        let RollbackRequest {
            key,
            target_version,
            signature_id,
            reason_code,
            forensic,
            expected_version,
        } = request;

        if reason_code.trim().is_empty() {
            return Err(LedgerError::validation("rollback requires a reason code"));
        }
        let user_id = forensic
            .actor
            .user_id()
            .ok_or_else(|| LedgerError::validation("rollback must be requested by a user"))?;

        let history = self.recorder.store().history(&key)?;
        let Some(head) = history.last() else {
            return Err(LedgerError::NotFound {
                what: format!("history of {key}"),
            });
        };
        let current = head.change_version;

        if let Some(expected) = expected_version.filter(|v| *v != current) {
            return Err(LedgerError::VersionConflict {
                key,
                expected,
                actual: current,
            });
        }
        if target_version == 0 || target_version >= current {
            return Err(LedgerError::validation(format!(
                "rollback target v{target_version} must be below current v{current}"
            )));
        }
        if head.is_deleted {
            return Err(LedgerError::validation(format!(
                "{key} is soft-deleted and cannot be rolled back"
            )));
        }

        self.access
            .require(user_id, &key.entity_type, ANY, Permission::Rollback)?;

        // Field-level denies apply to every field the rollback touches.
        let restored = replay(&key, &history, target_version)?;
        let replaced = replay(&key, &history, current)?;
        for field in touched_fields(&replaced, &restored) {
            self.access
                .require(user_id, &key.entity_type, field, Permission::Rollback)?;
        }

        let regulated = self.recorder.registry().is_regulated(&key.entity_type);
        let signature_id = match signature_id {
            Some(id) => Some(
                self.signatures
                    .accept_rollback_signature(id, user_id, head.id, self.signature_max_age)?
                    .id,
            ),
            None if regulated => {
                warn!(key = %key, user_id, "rollback of regulated entity without signature");
                return Err(LedgerError::denied(format!(
                    "{key} is regulated; rollback requires a fresh rollback signature"
                )));
            }
            None => None,
        };

        self.recorder
            .reviews()
            .require_intact(&key, &history, self.recorder.clock().now())?;

        let event = MutationEvent::new(key.clone(), AuditAction::Rollback, forensic)
            .with_reason(reason_code)
            .expecting(current);
        let record = self.recorder.record_ledger_event(
            event,
            LedgerAttachment {
                signature_id,
                snapshot: Some((replaced.snapshot_json()?, restored.snapshot_json()?)),
            },
        )?;

        info!(
            key = %key,
            from_version = current,
            restored_version = target_version,
            new_version = record.change_version,
            signature_id = ?signature_id,
            "entity rolled back"
        );
        Ok(record)
    }
}

/// Union of the field names in the replaced and restored states.
fn touched_fields<'a>(replaced: &'a EntityState, restored: &'a EntityState) -> BTreeSet<&'a str> {
    replaced
        .fields
        .keys()
        .chain(restored.fields.keys())
        .map(String::as_str)
        .collect()
}
