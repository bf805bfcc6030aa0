//! Scenario 2: Two technicians, one version
//!
//! Two tablets submit an update to work order 77 based on the same version.
//! Exactly one write lands; the other gets a retryable version conflict,
//! re-reads the head, and resubmits.

use std::{
    sync::{Arc, Barrier},
    thread,
};

use ledger_audit::InMemoryAuditStore;
use ledger_contracts::{
    audit::AuditAction,
    entity::EntityKey,
    error::{LedgerError, LedgerResult},
    mutation::{FieldDiff, MutationEvent},
};
use ledger_core::{ManualClock, TracingAlertSink};

use crate::fixtures::{open_ledger, open_work_order, shift_start, user, verdict, LEAD, TECHNICIAN};

pub fn run_scenario() -> LedgerResult<()> {
    println!("=== Scenario 2: Concurrent Writers ===");
    println!();

    let clock = Arc::new(ManualClock::new(shift_start()));
    let ledger = open_ledger(
        Arc::new(InMemoryAuditStore::new()),
        clock,
        Arc::new(TracingAlertSink),
    )?;
    let key = EntityKey::new("work_orders", 77);
    open_work_order(&ledger, &key)?;
    println!("  Work order 77 at v1; two tablets submit against v1");

    let barrier = Barrier::new(2);
    let results = thread::scope(|s| {
        let handles: Vec<_> = [(TECHNICIAN, "in_progress"), (LEAD, "on_hold")]
            .into_iter()
            .map(|(user_id, status)| {
                let (ledger, barrier, key) = (&ledger, &barrier, key.clone());
                s.spawn(move || {
                    barrier.wait();
                    let outcome = ledger.record(
                        MutationEvent::new(key, AuditAction::Update, user(user_id))
                            .with_diff(FieldDiff::new("status", Some("open"), Some(status)))
                            .expecting(1),
                    );
                    (user_id, status, outcome)
                })
            })
            .collect();
        handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .collect::<Vec<_>>()
    });

    for (user_id, status, outcome) in results {
        match outcome {
            Ok(record) => {
                println!("  user {user_id} -> {status:<12} WRITTEN as v{}", record.change_version);
            }
            Err(e @ LedgerError::VersionConflict { .. }) => {
                println!("  user {user_id} -> {status:<12} CONFLICT ({e})");
                let head = ledger.get_history(&key)?.len() as u64;
                let retried = ledger.record(
                    MutationEvent::new(key.clone(), AuditAction::Update, user(user_id))
                        .with_diff(FieldDiff::set("status", status))
                        .with_reason("resubmitted after conflict")
                        .expecting(head),
                )?;
                println!("  user {user_id} -> {status:<12} RETRIED, written as v{}", retried.change_version);
            }
            Err(e) => return Err(e),
        }
    }

    let result = ledger.verify_entity(&key)?;
    println!();
    println!(
        "  Chain integrity:        {} ({} record(s))",
        verdict(result.ok),
        result.records_checked
    );
    ledger.close()?;
    println!();
    println!("  Scenario 2 complete.");
    println!();

    Ok(())
}
