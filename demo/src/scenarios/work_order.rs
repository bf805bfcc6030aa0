//! Scenario 1: Work order closed in error
//!
//! Work order 42 is opened, closed, and closure-signed by the maintenance
//! lead.  The closure turns out to be a mistake:
//!   1. Rollback without a signature is refused (regulated entity)
//!   2. The closure signature cannot stand in for a rollback approval
//!   3. A fresh rollback signature restores v1 as a new v3
//!   4. Re-using that signature is refused
//!   5. QA exports the verified history

use std::sync::Arc;

use chrono::Duration;

use ledger_audit::InMemoryAuditStore;
use ledger_contracts::{
    audit::AuditAction,
    entity::EntityKey,
    error::LedgerResult,
    mutation::{FieldDiff, MutationEvent},
    signature::SignatureMeaning,
};
use ledger_core::{ManualClock, TracingAlertSink};
use ledger_history::RollbackRequest;
use ledger_runtime::ExportFormat;

use crate::fixtures::{
    open_ledger, open_work_order, shift_start, sign_head, user, verdict, LEAD, LEAD_PIN, QA,
};

pub fn run_scenario() -> LedgerResult<()> {
    println!("=== Scenario 1: Work Order Closed In Error ===");
    println!();

    let clock = Arc::new(ManualClock::new(shift_start()));
    let ledger = open_ledger(
        Arc::new(InMemoryAuditStore::new()),
        clock.clone(),
        Arc::new(TracingAlertSink),
    )?;
    let key = EntityKey::new("work_orders", 42);

    // ── Build the history ────────────────────────────────────────────────────

    let v1 = open_work_order(&ledger, &key)?;
    println!("  v{} CREATE   status=open            hash {}", v1.change_version, &v1.entry_hash[..12]);

    clock.advance(Duration::minutes(95));
    let v2 = ledger.record(
        MutationEvent::new(key.clone(), AuditAction::Update, user(LEAD))
            .with_diff(FieldDiff::new("status", Some("open"), Some("closed")))
            .expecting(1),
    )?;
    println!("  v{} UPDATE   status=open -> closed  hash {}", v2.change_version, &v2.entry_hash[..12]);

    let closure = sign_head(&ledger, &key, LEAD, LEAD_PIN, SignatureMeaning::Closure)?;
    println!("  Closure signature #{closure} bound to v2");
    println!();

    // ── Rollback attempts ────────────────────────────────────────────────────

    let request = |signature_id: Option<u64>| RollbackRequest {
        key: key.clone(),
        target_version: 1,
        signature_id,
        reason_code: "closed in error; gasket not replaced".to_string(),
        forensic: user(LEAD),
        expected_version: Some(2),
    };

    match ledger.rollback(request(None)) {
        Ok(_) => println!("  Unsigned rollback:      ACCEPTED (unexpected)"),
        Err(e) => println!("  Unsigned rollback:      REFUSED ({e})"),
    }
    match ledger.rollback(request(Some(closure))) {
        Ok(_) => println!("  Closure as approval:    ACCEPTED (unexpected)"),
        Err(e) => println!("  Closure as approval:    REFUSED ({e})"),
    }

    clock.advance(Duration::minutes(3));
    let approval = sign_head(&ledger, &key, LEAD, LEAD_PIN, SignatureMeaning::Rollback)?;
    let v3 = ledger.rollback(request(Some(approval)))?;
    println!(
        "  Signed rollback:        v{} {} (signature #{approval})",
        v3.change_version, v3.action
    );

    match ledger.rollback(RollbackRequest {
        expected_version: Some(3),
        ..request(Some(approval))
    }) {
        Ok(_) => println!("  Signature replay:       ACCEPTED (unexpected)"),
        Err(e) => println!("  Signature replay:       REFUSED ({e})"),
    }
    println!();

    let restored = ledger.reconstruct(&key, 3)?;
    println!("  State at v3:            {}", restored.snapshot_json()?);

    // ── Export for the auditor ───────────────────────────────────────────────

    clock.advance(Duration::hours(2));
    let export = ledger.export_history(&key, ExportFormat::Pdf, user(QA))?;
    println!(
        "  Export ({}):           {} row(s), chain {}, recorded as v{}",
        export.format.as_str(),
        export.rows.len(),
        verdict(export.verification.ok),
        export.export_record.change_version
    );

    let checkpoint = ledger.close()?;
    println!("  Closing checkpoint:     #{} over {} chain(s)", checkpoint.sequence, checkpoint.heads.len());
    println!();
    println!("  Scenario 1 complete.");
    println!();

    Ok(())
}
