//! # ledger-audit
//!
//! Immutable, append-only, SHA-256 hash-chained audit records for the GMP
//! ledger.
//!
//! ## Overview
//!
//! Every business mutation becomes an `AuditRecord` sealed onto the chain of
//! its `(entity_type, entity_id)`.  Each record commits to the previous one
//! through `previous_hash`; editing any stored byte breaks the chain and is
//! reported by `verify_range` with the first offending version.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledger_audit::{EventRecorder, InMemoryAuditStore, ReviewRegistry};
//!
//! let store = Arc::new(InMemoryAuditStore::new());
//! let recorder = EventRecorder::new(store.clone(), clock, registry, reviews);
//! let record = recorder.record(event)?;
//! assert!(verify_chain(&store.history(&record.key)?)?.ok);
//! ```

pub mod chain;
pub mod checkpoint;
pub mod memory;
pub mod recorder;
pub mod review;

pub use chain::{canonical_encode, seal, verify_chain, verify_range, GENESIS_HASH};
pub use checkpoint::{CheckpointReport, CheckpointWriter};
pub use memory::InMemoryAuditStore;
pub use recorder::{EventRecorder, LedgerAttachment};
pub use review::ReviewRegistry;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use chrono::{Duration, TimeZone, Utc};

    use ledger_contracts::{
        audit::AuditAction,
        entity::EntityKey,
        error::LedgerError,
        forensic::{Actor, ForensicContext},
        mutation::{FieldDiff, MutationEvent},
        verify::ChainStatus,
    };
    use ledger_core::{
        registry::EntityRegistry,
        traits::{AuditStore, Clock},
        ManualClock,
    };

    use super::*;

    // ── Helpers ───────────────────────────────────────────────────────────────

    struct Fixture {
        store: Arc<InMemoryAuditStore>,
        clock: Arc<ManualClock>,
        reviews: Arc<ReviewRegistry>,
        recorder: EventRecorder,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryAuditStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 10, 9, 0, 0).unwrap(),
        ));
        let reviews = Arc::new(ReviewRegistry::new());
        let recorder = EventRecorder::new(
            store.clone(),
            clock.clone(),
            Arc::new(EntityRegistry::default()),
            reviews.clone(),
        );
        Fixture {
            store,
            clock,
            reviews,
            recorder,
        }
    }

    fn technician() -> ForensicContext {
        ForensicContext {
            actor: Actor::User { user_id: 7 },
            username_snapshot: "mkovac".to_string(),
            source_ip: "10.0.0.4".to_string(),
            device_info: "YasGMP/4.2".to_string(),
            session_id: "s-1".to_string(),
            geo_location: None,
        }
    }

    fn work_order(id: u64) -> EntityKey {
        EntityKey::new("work_orders", id)
    }

    fn create(key: &EntityKey) -> MutationEvent {
        MutationEvent::new(key.clone(), AuditAction::Create, technician())
            .with_diff(FieldDiff::set("status", "open"))
            .with_diff(FieldDiff::set("title", "Replace gasket"))
    }

    fn update(key: &EntityKey, old: &str, new: &str) -> MutationEvent {
        MutationEvent::new(key.clone(), AuditAction::Update, technician())
            .with_diff(FieldDiff::new("status", Some(old), Some(new)))
    }

    /// Record CREATE plus `updates` status changes, advancing the clock
    /// between writes.
    fn seed(f: &Fixture, key: &EntityKey, updates: usize) {
        f.recorder.record(create(key)).unwrap();
        for i in 0..updates {
            f.clock.advance(Duration::minutes(5));
            f.recorder
                .record(update(key, &format!("s{i}"), &format!("s{}", i + 1)))
                .unwrap();
        }
    }

    // ── Chain integrity ───────────────────────────────────────────────────────

    /// Sequential writes produce a valid chain linked from genesis.
    #[test]
    fn test_hash_chain_integrity() {
        let f = fixture();
        let key = work_order(42);
        seed(&f, &key, 2);

        let history = f.store.history(&key).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].previous_hash, GENESIS_HASH);
        assert_eq!(history[1].previous_hash, history[0].entry_hash);
        assert!(verify_chain(&history).unwrap().ok);
    }

    /// Versions are exactly 1..N with no gaps or duplicates.
    #[test]
    fn test_versions_are_gapless() {
        let f = fixture();
        let key = work_order(1);
        seed(&f, &key, 4);

        let versions: Vec<u64> = f
            .store
            .history(&key)
            .unwrap()
            .iter()
            .map(|r| r.change_version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
    }

    /// Sealing is a pure function of the record's hashed fields.
    #[test]
    fn test_seal_is_reproducible() {
        let f = fixture();
        let key = work_order(5);
        seed(&f, &key, 1);

        for record in f.store.history(&key).unwrap() {
            assert_eq!(seal(&record).unwrap(), record.entry_hash);
        }
    }

    /// Editing a stored value in place is reported at the edited version.
    #[test]
    fn test_tamper_detection_reports_first_violation() {
        let f = fixture();
        let key = work_order(42);
        seed(&f, &key, 3);

        {
            let chains = f.store.chains.read().unwrap();
            let mut records = chains.get(&key).unwrap().lock().unwrap();
            records[1].new_value = Some("closed".to_string());
        }

        let history = f.store.history(&key).unwrap();
        let result = verify_chain(&history).unwrap();
        assert!(!result.ok);
        assert_eq!(result.first_violation_version, Some(2));

        // A range that ends before the edit is still intact.
        assert!(verify_range(&history, 1, 1).unwrap().ok);
        // A range that starts after it verifies against the stored linkage.
        assert!(verify_range(&history, 3, 4).unwrap().ok);
    }

    /// Rewriting a record together with its hash still breaks the next link.
    #[test]
    fn test_rehashed_tamper_breaks_linkage() {
        let f = fixture();
        let key = work_order(43);
        seed(&f, &key, 2);

        {
            let chains = f.store.chains.read().unwrap();
            let mut records = chains.get(&key).unwrap().lock().unwrap();
            records[0].old_value = Some("forged".to_string());
            records[0].entry_hash = seal(&records[0]).unwrap();
        }

        let result = verify_chain(&f.store.history(&key).unwrap()).unwrap();
        assert_eq!(result.first_violation_version, Some(2));
    }

    #[test]
    fn test_verify_range_bounds() {
        let f = fixture();
        let key = work_order(8);
        seed(&f, &key, 1);
        let history = f.store.history(&key).unwrap();

        for (from, to) in [(0, 1), (2, 1), (1, 3)] {
            assert!(matches!(
                verify_range(&history, from, to),
                Err(LedgerError::Validation { .. })
            ));
        }
        assert!(verify_chain(&[]).unwrap().ok);
    }

    // ── Recorder ──────────────────────────────────────────────────────────────

    #[test]
    fn test_multi_field_create_stores_canonical_objects() {
        let f = fixture();
        let record = f.recorder.record(create(&work_order(2))).unwrap();

        assert_eq!(record.change_version, 1);
        assert_eq!(record.field_name, None);
        assert_eq!(
            record.new_value.as_deref(),
            Some(r#"{"status":"open","title":"Replace gasket"}"#)
        );
        assert_eq!(record.old_value.as_deref(), Some(r#"{"status":null,"title":null}"#));
    }

    #[test]
    fn test_single_field_update_is_field_level() {
        let f = fixture();
        let key = work_order(3);
        seed(&f, &key, 0);
        let record = f.recorder.record(update(&key, "open", "in_progress")).unwrap();

        assert_eq!(record.field_name.as_deref(), Some("status"));
        assert_eq!(record.old_value.as_deref(), Some("open"));
        assert_eq!(record.new_value.as_deref(), Some("in_progress"));
    }

    #[test]
    fn test_shape_validation() {
        let f = fixture();
        let key = work_order(4);

        // Reserved actions are not accepted from business entities.
        let rollback = MutationEvent::new(key.clone(), AuditAction::Rollback, technician())
            .with_diff(FieldDiff::set("status", "open"));
        assert!(matches!(f.recorder.record(rollback), Err(LedgerError::Validation { .. })));

        // UPDATE before CREATE.
        assert!(matches!(
            f.recorder.record(update(&key, "a", "b")),
            Err(LedgerError::Validation { .. })
        ));

        // Zero id.
        assert!(matches!(
            f.recorder.record(create(&work_order(0))),
            Err(LedgerError::Validation { .. })
        ));

        // Duplicate field.
        let dup = MutationEvent::new(key.clone(), AuditAction::Create, technician())
            .with_diff(FieldDiff::set("status", "open"))
            .with_diff(FieldDiff::set("status", "closed"));
        assert!(matches!(f.recorder.record(dup), Err(LedgerError::Validation { .. })));

        // Unattributed human actor.
        let mut anonymous = create(&key);
        anonymous.forensic.actor = Actor::User { user_id: 0 };
        assert!(matches!(f.recorder.record(anonymous), Err(LedgerError::Validation { .. })));

        // Second CREATE.
        f.recorder.record(create(&key)).unwrap();
        assert!(matches!(f.recorder.record(create(&key)), Err(LedgerError::Validation { .. })));

        // DELETE needs a reason.
        let delete = MutationEvent::new(key.clone(), AuditAction::Delete, technician());
        assert!(matches!(f.recorder.record(delete), Err(LedgerError::Validation { .. })));

        // Nothing but the single CREATE was written.
        assert_eq!(f.store.history(&key).unwrap().len(), 1);
    }

    #[test]
    fn test_system_actor_is_accepted() {
        let f = fixture();
        let event = MutationEvent::new(
            work_order(11),
            AuditAction::Create,
            ForensicContext::system("pm-scheduler"),
        )
        .with_diff(FieldDiff::set("status", "planned"));
        let record = f.recorder.record(event).unwrap();
        assert_eq!(record.actor_user_id(), None);
    }

    #[test]
    fn test_stale_expected_version_conflicts() {
        let f = fixture();
        let key = work_order(9);
        seed(&f, &key, 1);

        let err = f
            .recorder
            .record(update(&key, "s0", "s1").expecting(1))
            .unwrap_err();
        match err {
            LedgerError::VersionConflict { expected, actual, .. } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected VersionConflict, got {other:?}"),
        }

        let ok = f.recorder.record(update(&key, "s1", "s2").expecting(2)).unwrap();
        assert_eq!(ok.change_version, 3);
    }

    /// Two writers that both read version 3: exactly one produces version 4.
    #[test]
    fn test_concurrent_writers_one_wins() {
        let f = fixture();
        let key = work_order(42);
        seed(&f, &key, 2);

        let barrier = Barrier::new(2);
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = ["approved", "rejected"]
                .into_iter()
                .map(|status| {
                    let recorder = &f.recorder;
                    let barrier = &barrier;
                    let key = key.clone();
                    s.spawn(move || {
                        barrier.wait();
                        recorder.record(update(&key, "s2", status).expecting(3))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let wins: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::VersionConflict { .. })))
            .count();
        assert_eq!(wins.len(), 1);
        assert_eq!(wins[0].change_version, 4);
        assert_eq!(conflicts, 1);
        assert!(verify_chain(&f.store.history(&key).unwrap()).unwrap().ok);
        assert_eq!(f.recorder.locked_chains(), 0);
    }

    /// Many entities written in parallel each get their own gapless chain.
    #[test]
    fn test_parallel_entities_are_independent() {
        let f = fixture();
        std::thread::scope(|s| {
            for id in 1..=8 {
                let recorder = &f.recorder;
                s.spawn(move || {
                    let key = work_order(id);
                    recorder.record(create(&key)).unwrap();
                    for i in 0..5 {
                        recorder
                            .record(update(&key, &i.to_string(), &(i + 1).to_string()))
                            .unwrap();
                    }
                });
            }
        });

        for id in 1..=8 {
            let history = f.store.history(&work_order(id)).unwrap();
            assert_eq!(history.len(), 6);
            assert!(verify_chain(&history).unwrap().ok);
        }
        assert_eq!(f.store.record_count(), 48);
        assert_eq!(f.recorder.locked_chains(), 0);
    }

    /// Writer locks are released once no writer holds them, including after
    /// a refused write.
    #[test]
    fn test_writer_locks_do_not_accumulate() {
        let f = fixture();
        for id in 1..=20 {
            seed(&f, &work_order(id), 1);
        }
        assert!(matches!(
            f.recorder.record(update(&work_order(99), "a", "b")),
            Err(LedgerError::Validation { .. })
        ));
        assert_eq!(f.recorder.locked_chains(), 0);
    }

    #[test]
    fn test_store_compare_and_swap_rejects_stale_candidate() {
        let f = fixture();
        let key = work_order(12);
        seed(&f, &key, 1);

        let mut stale = f.store.history(&key).unwrap()[1].clone();
        stale.new_value = Some("other".to_string());
        stale.entry_hash = seal(&stale).unwrap();
        assert!(matches!(
            f.store.append(stale),
            Err(LedgerError::VersionConflict { .. })
        ));
    }

    #[test]
    fn test_soft_deleted_entity_only_accepts_export() {
        let f = fixture();
        let key = work_order(13);
        seed(&f, &key, 0);

        let delete = MutationEvent::new(key.clone(), AuditAction::Delete, technician())
            .with_reason("duplicate entry");
        let deleted = f.recorder.record(delete).unwrap();
        assert!(deleted.is_deleted);

        assert!(matches!(
            f.recorder.record(update(&key, "open", "closed")),
            Err(LedgerError::Validation { .. })
        ));
        let export = f
            .recorder
            .record(MutationEvent::new(key.clone(), AuditAction::Export, technician()))
            .unwrap();
        assert!(export.is_deleted, "soft-delete marker is sticky");
    }

    // ── Review freeze ─────────────────────────────────────────────────────────

    #[test]
    fn test_under_review_chain_refuses_writes() {
        let f = fixture();
        let key = work_order(14);
        seed(&f, &key, 1);

        f.reviews.mark_under_review(&key, 2, f.clock.now());
        f.reviews.mark_under_review(&key, 5, f.clock.now());
        assert!(matches!(
            f.reviews.status(&key),
            ChainStatus::UnderReview { since_version: 2, .. }
        ));

        assert!(matches!(
            f.recorder.record(update(&key, "s1", "s2")),
            Err(LedgerError::IntegrityViolation { version: 2, .. })
        ));
        // Other chains are unaffected.
        assert!(f.recorder.record(create(&work_order(15))).is_ok());
        assert_eq!(f.reviews.under_review().len(), 1);
    }

    #[test]
    fn test_failed_verification_flags_chain() {
        let f = fixture();
        let key = work_order(16);
        seed(&f, &key, 2);

        let history = f.store.history(&key).unwrap();
        assert!(f.reviews.require_intact(&key, &history, f.clock.now()).is_ok());
        assert_eq!(f.reviews.status(&key), ChainStatus::Trusted);

        {
            let chains = f.store.chains.read().unwrap();
            let mut records = chains.get(&key).unwrap().lock().unwrap();
            records[2].old_value = Some("s0".to_string());
        }

        let history = f.store.history(&key).unwrap();
        let result = f.reviews.verify_and_flag(&key, &history, f.clock.now()).unwrap();
        assert_eq!(result.first_violation_version, Some(3));
        assert!(matches!(
            f.reviews.require_intact(&key, &history, f.clock.now()),
            Err(LedgerError::IntegrityViolation { version: 3, .. })
        ));
        assert!(matches!(
            f.reviews.status(&key),
            ChainStatus::UnderReview { since_version: 3, .. }
        ));
    }

    // ── Purge ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_purged_key_accepts_no_records() {
        let f = fixture();
        let key = work_order(16);
        seed(&f, &key, 1);
        let first_id = f.store.history(&key).unwrap()[0].id;

        assert_eq!(f.store.purge(&key).unwrap(), 2);
        assert!(f.store.is_purged(&key).unwrap());
        assert!(f.store.history(&key).unwrap().is_empty());
        assert!(f.store.record(first_id).unwrap().is_none());
        assert!(matches!(
            f.recorder.record(create(&key)),
            Err(LedgerError::Validation { .. })
        ));
    }

    // ── Checkpoints ───────────────────────────────────────────────────────────

    #[test]
    fn test_checkpoint_commits_to_heads_and_links() {
        let f = fixture();
        seed(&f, &work_order(1), 1);
        seed(&f, &work_order(2), 0);
        let writer = CheckpointWriter::new(f.store.clone(), f.clock.clone());

        let first = writer.write().unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(first.previous_hash, GENESIS_HASH);
        assert_eq!(first.heads.len(), 2);
        assert!(first.heads[0].key < first.heads[1].key);

        f.clock.advance(Duration::hours(1));
        f.recorder.record(update(&work_order(2), "open", "closed")).unwrap();
        let second = writer.write().unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(second.previous_hash, first.checkpoint_hash);

        // Appending after a checkpoint does not invalidate it.
        assert!(writer.verify(&first).unwrap().ok());
        assert!(writer.verify_latest().unwrap().unwrap().ok());
    }

    #[test]
    fn test_checkpoint_detects_rewritten_head() {
        let f = fixture();
        let key = work_order(3);
        seed(&f, &key, 1);
        let writer = CheckpointWriter::new(f.store.clone(), f.clock.clone());
        let checkpoint = writer.write().unwrap();

        {
            let chains = f.store.chains.read().unwrap();
            let mut records = chains.get(&key).unwrap().lock().unwrap();
            records[1].entry_hash = "f".repeat(64);
        }

        let report = writer.verify(&checkpoint).unwrap();
        assert!(report.hash_ok);
        assert_eq!(report.mismatched, vec![key]);
        assert!(!report.ok());

        let mut forged = checkpoint.clone();
        forged.heads.clear();
        assert!(!writer.verify(&forged).unwrap().hash_ok);
    }
}
