//! # ledger-history
//!
//! Versioning, rollback, and retention on top of the audit chains.
//!
//! - [`replay`] / [`RollbackManager::reconstruct`] rebuild the state of an
//!   entity at any recorded version.
//! - [`RollbackManager::rollback`] restores an earlier version by appending a
//!   ROLLBACK record; regulated entities need a fresh rollback signature.
//! - [`RetentionManager`] soft-deletes entities and purges them once their
//!   retention policy allows it.

pub mod reconstruct;
pub mod retention;
pub mod rollback;

pub use reconstruct::{replay, EntityState, FieldMap};
pub use retention::{PurgeReceipt, RetentionManager};
pub use rollback::{RollbackManager, RollbackRequest};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use ledger_access::AccessOverlay;
    use ledger_audit::{EventRecorder, InMemoryAuditStore, ReviewRegistry};
    use ledger_contracts::{
        access::{AccessOverride, Effect, Permission},
        audit::AuditAction,
        entity::EntityKey,
        error::LedgerError,
        forensic::{Actor, ForensicContext},
        mutation::{FieldDiff, MutationEvent},
        retention::{LifecycleState, PurgeRule, RetentionPolicy},
        signature::{Credential, SignatureMeaning, SignatureMethod, SignatureRequest},
        verify::ChainStatus,
    };
    use ledger_core::{
        registry::{EntityRegistration, EntityRegistry},
        traits::AuditStore,
        ManualClock,
    };
    use ledger_signature::{InMemorySignatureStore, MethodVerifier, PinVerifier, SignatureService};

    use super::*;

    // ── Helpers ───────────────────────────────────────────────────────────────

    const ACCESS: &str = r#"
        [[grants]]
        id = 1
        role = "maintenance_lead"
        table = "work_orders"
        permissions = ["read", "write", "view-history", "sign", "rollback"]

        [[grants]]
        id = 2
        role = "maintenance_lead"
        table = "shift_notes"
        permissions = ["read", "write", "rollback"]

        [[grants]]
        id = 3
        role = "technician"
        table = "work_orders"
        permissions = ["read", "write"]

        [[grants]]
        id = 4
        role = "qa"
        table = "*"
        permissions = ["read", "approve", "export", "view-history"]

        [[user_roles]]
        user_id = 7
        roles = ["maintenance_lead"]

        [[user_roles]]
        user_id = 8
        roles = ["technician"]

        [[user_roles]]
        user_id = 9
        roles = ["qa"]
    "#;

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryAuditStore>,
        recorder: Arc<EventRecorder>,
        signatures: Arc<SignatureService>,
        access: Arc<AccessOverlay>,
        rollback: RollbackManager,
        retention: RetentionManager,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 20, 7, 30, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(InMemoryAuditStore::new());
        let registry = EntityRegistry::default()
            .register(EntityRegistration::regulated("work_orders", "Work order"))
            .register(EntityRegistration::unregulated("shift_notes", "Shift note"));
        let recorder = Arc::new(EventRecorder::new(
            store.clone(),
            clock.clone(),
            Arc::new(registry),
            Arc::new(ReviewRegistry::new()),
        ));
        let access = Arc::new(AccessOverlay::from_toml_str(ACCESS, clock.clone()).unwrap());
        let verifier = MethodVerifier::new().with(
            SignatureMethod::Pin,
            Arc::new(PinVerifier::new().with_pin(7, "na", "2468").with_pin(8, "cl", "1357")),
        );
        let signatures = Arc::new(SignatureService::new(
            recorder.clone(),
            Arc::new(InMemorySignatureStore::new()),
            Arc::new(verifier),
        ));
        let rollback = RollbackManager::new(
            recorder.clone(),
            signatures.clone(),
            access.clone(),
            Duration::minutes(15),
        );
        let retention = RetentionManager::new(
            recorder.clone(),
            access.clone(),
            vec![
                RetentionPolicy {
                    entity_type: "work_orders".to_string(),
                    min_retention_days: 30,
                    purge_rule: PurgeRule::AfterRetention,
                },
                RetentionPolicy {
                    entity_type: "batch_records".to_string(),
                    min_retention_days: 3650,
                    purge_rule: PurgeRule::Never,
                },
            ],
        );
        Fixture {
            clock,
            store,
            recorder,
            signatures,
            access,
            rollback,
            retention,
        }
    }

    fn user(user_id: u64) -> ForensicContext {
        ForensicContext {
            actor: Actor::User { user_id },
            username_snapshot: format!("user{user_id}"),
            source_ip: "10.20.0.5".to_string(),
            device_info: "tablet".to_string(),
            session_id: "s-9".to_string(),
            geo_location: None,
        }
    }

    fn wo42() -> EntityKey {
        EntityKey::new("work_orders", 42)
    }

    /// v1: CREATE {status, title}; v2: status open -> closed.
    fn seed(f: &Fixture, key: &EntityKey) {
        f.recorder
            .record(
                MutationEvent::new(key.clone(), AuditAction::Create, user(7))
                    .with_diff(FieldDiff::set("status", "open"))
                    .with_diff(FieldDiff::set("title", "Replace gasket")),
            )
            .unwrap();
        f.clock.advance(Duration::minutes(10));
        f.recorder
            .record(
                MutationEvent::new(key.clone(), AuditAction::Update, user(7))
                    .with_diff(FieldDiff::new("status", Some("open"), Some("closed")))
                    .expecting(1),
            )
            .unwrap();
    }

    fn sign_head(f: &Fixture, key: &EntityKey, user_id: u64, pin: &str, meaning: SignatureMeaning) -> u64 {
        let head = f.store.head(key).unwrap().unwrap();
        f.signatures
            .sign(SignatureRequest {
                target_record_id: head.record_id,
                user_id,
                credential: Credential::Pin {
                    pin: pin.to_string(),
                },
                meaning,
                reason_code: format!("{meaning} of {key}"),
                forensic: user(user_id),
            })
            .unwrap()
            .id
    }

    fn request(key: &EntityKey, target_version: u64, signature_id: Option<u64>) -> RollbackRequest {
        RollbackRequest {
            key: key.clone(),
            target_version,
            signature_id,
            reason_code: "closed in error".to_string(),
            forensic: user(7),
            expected_version: None,
        }
    }

    // ── 1. reconstruction ─────────────────────────────────────────────────────

    #[test]
    fn test_reconstruct_replays_diffs_in_order() {
        let f = fixture();
        let key = wo42();
        seed(&f, &key);
        f.recorder
            .record(
                MutationEvent::new(key.clone(), AuditAction::Update, user(7))
                    .with_diff(FieldDiff::new("title", Some("Replace gasket"), None))
                    .with_diff(FieldDiff::set("priority", "high")),
            )
            .unwrap();

        let v1 = f.rollback.reconstruct(&key, 1).unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v1.fields["status"].as_deref(), Some("open"));
        assert_eq!(v1.fields["title"].as_deref(), Some("Replace gasket"));

        let v2 = f.rollback.reconstruct(&key, 2).unwrap();
        assert_eq!(v2.fields["status"].as_deref(), Some("closed"));
        assert_eq!(v2.fields["title"].as_deref(), Some("Replace gasket"));

        let v3 = f.rollback.reconstruct(&key, 3).unwrap();
        assert_eq!(v3.fields["title"], None);
        assert_eq!(v3.fields["priority"].as_deref(), Some("high"));
        assert!(!v3.is_deleted);

        assert_eq!(
            v1.snapshot_json().unwrap(),
            r#"{"status":"open","title":"Replace gasket"}"#
        );
    }

    #[test]
    fn test_reconstruct_bounds() {
        let f = fixture();
        let key = wo42();
        assert!(matches!(
            f.rollback.reconstruct(&key, 1),
            Err(LedgerError::NotFound { .. })
        ));
        seed(&f, &key);
        for v in [0, 3] {
            assert!(matches!(
                f.rollback.reconstruct(&key, v),
                Err(LedgerError::Validation { .. })
            ));
        }
    }

    // ── 2. work order #42 ─────────────────────────────────────────────────────

    #[test]
    fn test_work_order_42_rollback_scenario() {
        let f = fixture();
        let key = wo42();
        seed(&f, &key);

        let closure = sign_head(&f, &key, 7, "2468", SignatureMeaning::Closure);
        assert_eq!(closure, 1);
        assert!(f.signatures.get(closure).unwrap().is_valid());
        assert_eq!(f.store.history(&key).unwrap().len(), 2);

        // No fresh signature.
        assert!(matches!(
            f.rollback.rollback(request(&key, 1, None)),
            Err(LedgerError::PermissionDenied { .. })
        ));
        // The closure signature does not authorize a rollback.
        assert!(matches!(
            f.rollback.rollback(request(&key, 1, Some(closure))),
            Err(LedgerError::PermissionDenied { .. })
        ));
        assert_eq!(f.store.history(&key).unwrap().len(), 2);

        let fresh = sign_head(&f, &key, 7, "2468", SignatureMeaning::Rollback);
        let record = f.rollback.rollback(request(&key, 1, Some(fresh))).unwrap();

        assert_eq!(record.change_version, 3);
        assert_eq!(record.action, AuditAction::Rollback);
        assert_eq!(record.signature_id, Some(fresh));
        assert_eq!(record.field_name, None);
        let v1 = f.rollback.reconstruct(&key, 1).unwrap();
        assert_eq!(record.new_value, Some(v1.snapshot_json().unwrap()));
        assert_eq!(
            record.old_value,
            Some(f.rollback.reconstruct(&key, 2).unwrap().snapshot_json().unwrap())
        );
        assert_eq!(f.rollback.reconstruct(&key, 3).unwrap().fields, v1.fields);

        // The consumed signature no longer targets the head.
        assert!(matches!(
            f.rollback.rollback(request(&key, 2, Some(fresh))),
            Err(LedgerError::PermissionDenied { .. })
        ));
        let versions: Vec<u64> = f
            .store
            .history(&key)
            .unwrap()
            .iter()
            .map(|r| r.change_version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    // ── 3. rollback preconditions ────────────────────────────────────────────

    #[test]
    fn test_rollback_target_must_precede_current() {
        let f = fixture();
        let key = wo42();
        seed(&f, &key);
        for target in [0, 2, 5] {
            assert!(matches!(
                f.rollback.rollback(request(&key, target, None)),
                Err(LedgerError::Validation { .. })
            ));
        }
    }

    #[test]
    fn test_rollback_with_stale_expected_version() {
        let f = fixture();
        let key = wo42();
        seed(&f, &key);
        let mut stale = request(&key, 1, None);
        stale.expected_version = Some(1);
        assert!(matches!(
            f.rollback.rollback(stale),
            Err(LedgerError::VersionConflict { expected: 1, actual: 2, .. })
        ));
    }

    #[test]
    fn test_rollback_respects_field_level_deny() {
        let f = fixture();
        let key = wo42();
        seed(&f, &key);
        f.access
            .add_override(AccessOverride {
                id: 0,
                user_id: 7,
                table: "work_orders".to_string(),
                field: "status".to_string(),
                permission: Permission::Rollback,
                effect: Effect::Deny,
                delegated_by: None,
                expires_at: None,
                is_active: true,
                is_revoked: false,
                reason: Some("status frozen pending deviation".to_string()),
            })
            .unwrap();
        assert!(!f.access.effective(7, "work_orders", "status").unwrap().can_rollback);

        let fresh = sign_head(&f, &key, 7, "2468", SignatureMeaning::Rollback);
        assert!(matches!(
            f.rollback.rollback(request(&key, 1, Some(fresh))),
            Err(LedgerError::PermissionDenied { .. })
        ));
        assert_eq!(f.store.history(&key).unwrap().len(), 2);
        assert_eq!(
            f.rollback.reconstruct(&key, 2).unwrap().fields["status"].as_deref(),
            Some("closed")
        );
    }

    #[test]
    fn test_rollback_requires_permission_and_user() {
        let f = fixture();
        let key = wo42();
        seed(&f, &key);

        // Technician holds a valid rollback signature but no rollback right.
        let sig = sign_head(&f, &key, 8, "1357", SignatureMeaning::Rollback);
        let mut by_technician = request(&key, 1, Some(sig));
        by_technician.forensic = user(8);
        assert!(matches!(
            f.rollback.rollback(by_technician),
            Err(LedgerError::PermissionDenied { .. })
        ));

        // Someone else's signature does not count either.
        assert!(matches!(
            f.rollback.rollback(request(&key, 1, Some(sig))),
            Err(LedgerError::PermissionDenied { .. })
        ));

        let mut by_job = request(&key, 1, None);
        by_job.forensic = ForensicContext::system("nightly-sync");
        assert!(matches!(
            f.rollback.rollback(by_job),
            Err(LedgerError::Validation { .. })
        ));
    }

    #[test]
    fn test_stale_rollback_signature_is_refused() {
        let f = fixture();
        let key = wo42();
        seed(&f, &key);
        let sig = sign_head(&f, &key, 7, "2468", SignatureMeaning::Rollback);
        f.clock.advance(Duration::minutes(20));
        assert!(matches!(
            f.rollback.rollback(request(&key, 1, Some(sig))),
            Err(LedgerError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn test_unregulated_entity_rolls_back_without_signature() {
        let f = fixture();
        let key = EntityKey::new("shift_notes", 3);
        seed(&f, &key);
        let record = f.rollback.rollback(request(&key, 1, None)).unwrap();
        assert_eq!(record.change_version, 3);
        assert_eq!(record.signature_id, None);
    }

    #[test]
    fn test_rollback_refused_while_under_review() {
        let f = fixture();
        let key = EntityKey::new("shift_notes", 4);
        seed(&f, &key);
        f.recorder.reviews().mark_under_review(&key, 2, start());
        assert!(matches!(
            f.rollback.rollback(request(&key, 1, None)),
            Err(LedgerError::IntegrityViolation { .. })
        ));
        assert!(matches!(
            f.recorder.reviews().status(&key),
            ChainStatus::UnderReview { since_version: 2, .. }
        ));
    }

    #[test]
    fn test_soft_deleted_entity_cannot_be_rolled_back() {
        let f = fixture();
        let key = EntityKey::new("shift_notes", 5);
        seed(&f, &key);
        f.retention
            .mark_deleted(&key, "duplicate entry", user(7))
            .unwrap();
        assert!(matches!(
            f.rollback.rollback(request(&key, 1, None)),
            Err(LedgerError::Validation { .. })
        ));
        // Deleted state survives reconstruction.
        assert!(f.rollback.reconstruct(&key, 3).unwrap().is_deleted);
    }

    // ── 4. retention ──────────────────────────────────────────────────────────

    #[test]
    fn test_soft_delete_then_purge_after_retention() {
        let f = fixture();
        let key = wo42();
        seed(&f, &key);

        assert_eq!(f.retention.lifecycle(&key).unwrap(), LifecycleState::Active);
        let delete = f
            .retention
            .mark_deleted(&key, "cancelled by planner", user(7))
            .unwrap();
        assert!(delete.is_deleted);
        let deleted_at = delete.timestamp_utc;
        assert_eq!(
            f.retention.lifecycle(&key).unwrap(),
            LifecycleState::SoftDeleted { deleted_at }
        );

        // Early purge fails and names the eligibility date.
        match f.retention.purge(&key, user(9)) {
            Err(LedgerError::RetentionViolation { eligible_at, .. }) => {
                assert_eq!(eligible_at, Some(deleted_at + Duration::days(30)));
            }
            other => panic!("expected RetentionViolation, got {other:?}"),
        }
        assert!(!f.retention.is_purge_eligible(&key).unwrap());
        assert_eq!(f.store.history(&key).unwrap().len(), 3);

        f.clock.advance(Duration::days(31));
        assert!(f.retention.is_purge_eligible(&key).unwrap());

        // Eligibility does not bypass the approve right.
        assert!(matches!(
            f.retention.purge(&key, user(7)),
            Err(LedgerError::PermissionDenied { .. })
        ));

        let receipt = f.retention.purge(&key, user(9)).unwrap();
        assert_eq!(receipt.records_removed, 3);
        assert_eq!(receipt.final_entry_hash, delete.entry_hash);
        assert_eq!(f.retention.lifecycle(&key).unwrap(), LifecycleState::Purged);
        assert!(f.store.history(&key).unwrap().is_empty());
        assert!(matches!(
            f.retention.purge(&key, user(9)),
            Err(LedgerError::Validation { .. })
        ));
    }

    #[test]
    fn test_purge_refused_for_active_and_held_entities() {
        let f = fixture();
        let active = wo42();
        seed(&f, &active);
        assert!(matches!(
            f.retention.purge(&active, user(9)),
            Err(LedgerError::RetentionViolation { eligible_at: None, .. })
        ));

        let held = EntityKey::new("batch_records", 1);
        seed(&f, &held);
        f.retention
            .mark_deleted(&held, "entered in error", ForensicContext::system("batch-import"))
            .unwrap();
        f.clock.advance(Duration::days(10_000));
        assert!(!f.retention.is_purge_eligible(&held).unwrap());
        assert!(matches!(
            f.retention.purge(&held, user(9)),
            Err(LedgerError::RetentionViolation { eligible_at: None, .. })
        ));
    }

    #[test]
    fn test_soft_delete_is_sticky_and_needs_write() {
        let f = fixture();
        let key = wo42();
        seed(&f, &key);

        assert!(matches!(
            f.retention.mark_deleted(&key, "no", user(9)),
            Err(LedgerError::PermissionDenied { .. })
        ));
        f.retention.mark_deleted(&key, "obsolete", user(8)).unwrap();
        assert!(matches!(
            f.retention.mark_deleted(&key, "again", user(8)),
            Err(LedgerError::Validation { .. })
        ));
        assert!(matches!(
            f.retention.lifecycle(&EntityKey::new("work_orders", 404)),
            Err(LedgerError::NotFound { .. })
        ));
    }
}
