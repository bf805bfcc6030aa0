//! The event recorder: the single write path into the ledger.
//!
//!   MutationEvent → shape validation → per-key lock → version check
//!   → build candidate → seal → compare-and-swap append
//!
//! The recorder performs format and shape validation only.  Business
//! validation belongs to the entity that emitted the event.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
};

use tracing::{debug, info, warn};

use ledger_contracts::{
    audit::{AuditAction, AuditRecord, Severity},
    entity::EntityKey,
    error::{LedgerError, LedgerResult},
    forensic::Actor,
    mutation::{FieldDiff, MutationEvent},
};
use ledger_core::{
    registry::EntityRegistry,
    traits::{AuditStore, Clock},
};

use crate::{
    chain::{seal, GENESIS_HASH},
    review::ReviewRegistry,
};

/// Longest accepted reason code.
pub const MAX_REASON_LEN: usize = 512;

/// Extra fields only ledger components may attach to a record.
#[derive(Debug, Clone, Default)]
pub struct LedgerAttachment {
    pub signature_id: Option<u64>,
    /// Full-state snapshot `(old, new)` stored instead of field diffs.
    pub snapshot: Option<(String, String)>,
}

/// Short-lived in-process locks keyed by chain.
#[derive(Default)]
struct KeyLocks {
    locks: Mutex<HashMap<EntityKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    fn for_key(&self, key: &EntityKey) -> LedgerResult<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| LedgerError::Storage {
            reason: "key lock table poisoned".to_string(),
        })?;
        Ok(locks.entry(key.clone()).or_default().clone())
    }

    /// Forget `key` unless another writer still holds or awaits its lock.
    fn release(&self, key: &EntityKey, lock: Arc<Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        // One reference in the table plus `lock`.
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(key);
        }
    }

    fn len(&self) -> usize {
        self.locks.lock().map_or(0, |locks| locks.len())
    }
}

/// Assigns versions and seals records.
///
/// Writes to different keys run in parallel; writes to one key are
/// serialized by a per-key lock, and the store's compare-and-swap rejects
/// anything that slipped past it.
pub struct EventRecorder {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    registry: Arc<EntityRegistry>,
    reviews: Arc<ReviewRegistry>,
    locks: KeyLocks,
}

impl EventRecorder {
    pub fn new(
        store: Arc<dyn AuditStore>,
        clock: Arc<dyn Clock>,
        registry: Arc<EntityRegistry>,
        reviews: Arc<ReviewRegistry>,
    ) -> Self {
        Self {
            store,
            clock,
            registry,
            reviews,
            locks: KeyLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn reviews(&self) -> &Arc<ReviewRegistry> {
        &self.reviews
    }

    /// Record a mutation submitted by a business entity.
    ///
    /// # Errors
    ///
    /// - `Validation` for malformed events, reserved actions
    ///   (`SIGN`, `REVOKE_SIGNATURE`, `ROLLBACK`), writes to soft-deleted or
    ///   purged entities, `CREATE` on an existing chain, and anything but
    ///   `CREATE` on an empty one.
    /// - `VersionConflict` when `expected_version` is stale.
    /// - `IntegrityViolation` when the chain is under review.
    pub fn record(&self, event: MutationEvent) -> LedgerResult<AuditRecord> {
        if event.action.is_reserved() {
            return Err(LedgerError::validation(format!(
                "action {} is reserved for ledger components",
                event.action
            )));
        }
        self.commit(event, LedgerAttachment::default())
    }

    /// Record an event emitted by a ledger component (signature service,
    /// rollback manager).  Reserved actions are accepted here.
    pub fn record_ledger_event(
        &self,
        event: MutationEvent,
        attachment: LedgerAttachment,
    ) -> LedgerResult<AuditRecord> {
        self.commit(event, attachment)
    }

    fn commit(&self, event: MutationEvent, attachment: LedgerAttachment) -> LedgerResult<AuditRecord> {
        validate_event(&event, &attachment)?;
        self.registry.check(&event.key)?;

        let key = event.key.clone();
        let key_lock = self.locks.for_key(&key)?;
        let result = self.commit_locked(&key_lock, event, attachment);
        self.locks.release(&key, key_lock);
        result
    }

    /// Number of chains with a writer lock currently allocated.
    pub fn locked_chains(&self) -> usize {
        self.locks.len()
    }

    fn commit_locked(
        &self,
        key_lock: &Mutex<()>,
        event: MutationEvent,
        attachment: LedgerAttachment,
    ) -> LedgerResult<AuditRecord> {
        let _guard = key_lock.lock().map_err(|_| LedgerError::Storage {
            reason: format!("writer lock for {} poisoned", event.key),
        })?;

        self.reviews.ensure_trusted(&event.key)?;

        let head = self.store.head(&event.key)?;
        let current_version = head.as_ref().map_or(0, |h| h.version);

        if let Some(expected) = event.expected_version {
            if expected != current_version {
                warn!(
                    key = %event.key,
                    expected,
                    current_version,
                    "stale expected version"
                );
                return Err(LedgerError::VersionConflict {
                    key: event.key.clone(),
                    expected,
                    actual: current_version,
                });
            }
        }

        let previous = match &head {
            Some(h) => self.store.record(h.record_id)?,
            None => None,
        };
        let previously_deleted = previous.as_ref().is_some_and(|r| r.is_deleted);

        match (event.action, current_version) {
            (action @ (AuditAction::Create | AuditAction::Sign), v) if v > 0 => {
                return Err(LedgerError::validation(format!(
                    "{} already has {v} recorded versions; {action} is only valid first",
                    event.key
                )));
            }
            (AuditAction::Create | AuditAction::Sign, _) => {}
            (action, 0) => {
                return Err(LedgerError::validation(format!(
                    "{} has no history; {action} requires a prior CREATE",
                    event.key
                )));
            }
            _ => {}
        }
        if previously_deleted && event.action != AuditAction::Export {
            return Err(LedgerError::validation(format!(
                "{} is soft-deleted; only EXPORT may be recorded",
                event.key
            )));
        }

        let (field_name, old_value, new_value) = match attachment.snapshot {
            Some((old, new)) => (None, Some(old), Some(new)),
            None => diff_payload(&event.field_diffs)?,
        };

        let mut candidate = AuditRecord {
            id: 0,
            key: event.key.clone(),
            change_version: current_version + 1,
            previous_hash: head
                .as_ref()
                .map_or_else(|| GENESIS_HASH.to_string(), |h| h.entry_hash.clone()),
            entry_hash: String::new(),
            action: event.action,
            field_name,
            old_value,
            new_value,
            reason_code: event.reason_code,
            signature_id: attachment.signature_id,
            forensic: event.forensic,
            timestamp_utc: self.clock.now(),
            is_deleted: previously_deleted || event.action == AuditAction::Delete,
            related_case: event.related_case,
            severity: Severity::for_action(event.action),
        };
        candidate.entry_hash = seal(&candidate)?;

        let stored = self.store.append(candidate)?;

        info!(
            key = %stored.key,
            version = stored.change_version,
            action = %stored.action,
            record_id = stored.id,
            "audit record sealed"
        );
        debug!(entry_hash = %stored.entry_hash, previous_hash = %stored.previous_hash);

        Ok(stored)
    }
}

/// Format and shape checks.  No business rules.
fn validate_event(event: &MutationEvent, attachment: &LedgerAttachment) -> LedgerResult<()> {
    event.key.validate()?;

    match &event.forensic.actor {
        Actor::User { user_id: 0 } => {
            return Err(LedgerError::validation("actor user id must be positive"));
        }
        Actor::System { component } if component.trim().is_empty() => {
            return Err(LedgerError::validation(
                "system actor must name the automated component",
            ));
        }
        _ => {}
    }

    if let Some(reason) = &event.reason_code {
        if reason.trim().is_empty() || reason.len() > MAX_REASON_LEN {
            return Err(LedgerError::validation(format!(
                "reason code must be 1..={MAX_REASON_LEN} bytes"
            )));
        }
    }

    let mut seen = HashSet::new();
    for diff in &event.field_diffs {
        if diff.field.trim().is_empty() {
            return Err(LedgerError::validation("field diff with empty field name"));
        }
        if !seen.insert(diff.field.as_str()) {
            return Err(LedgerError::validation(format!(
                "field '{}' appears more than once",
                diff.field
            )));
        }
    }

    let has_payload = !event.field_diffs.is_empty() || attachment.snapshot.is_some();
    match event.action {
        AuditAction::Create | AuditAction::Update | AuditAction::Rollback if !has_payload => {
            Err(LedgerError::validation(format!(
                "{} requires at least one field change",
                event.action
            )))
        }
        AuditAction::Delete | AuditAction::RevokeSignature if event.reason_code.is_none() => {
            Err(LedgerError::validation(format!(
                "{} requires a reason code",
                event.action
            )))
        }
        _ => Ok(()),
    }
}

/// One diff is stored field-level; several are stored as canonical JSON
/// objects of the changed fields.
fn diff_payload(
    diffs: &[FieldDiff],
) -> LedgerResult<(Option<String>, Option<String>, Option<String>)> {
    match diffs {
        [] => Ok((None, None, None)),
        [single] => Ok((Some(single.field.clone()), single.old.clone(), single.new.clone())),
        many => {
            let old: BTreeMap<&str, Option<&str>> = many
                .iter()
                .map(|d| (d.field.as_str(), d.old.as_deref()))
                .collect();
            let new: BTreeMap<&str, Option<&str>> = many
                .iter()
                .map(|d| (d.field.as_str(), d.new.as_deref()))
                .collect();
            Ok((None, Some(encode_fields(&old)?), Some(encode_fields(&new)?)))
        }
    }
}

fn encode_fields(fields: &BTreeMap<&str, Option<&str>>) -> LedgerResult<String> {
    serde_json::to_string(fields).map_err(|e| LedgerError::Storage {
        reason: format!("failed to encode field map: {e}"),
    })
}
