//! Scenario 4: Retention and purge
//!
//! A shift note and a batch record are soft-deleted.  The shift note becomes
//! purgeable after its 30-day retention; the batch record never does.

use std::sync::Arc;

use chrono::Duration;

use ledger_audit::InMemoryAuditStore;
use ledger_contracts::{
    audit::AuditAction,
    entity::EntityKey,
    error::LedgerResult,
    mutation::{FieldDiff, MutationEvent},
    retention::LifecycleState,
};
use ledger_core::{ManualClock, TracingAlertSink};

use crate::fixtures::{open_ledger, shift_start, system, user, verdict, LEAD, QA};

fn describe(state: LifecycleState) -> String {
    match state {
        LifecycleState::Active => "active".to_string(),
        LifecycleState::SoftDeleted { deleted_at } => {
            format!("soft-deleted at {}", deleted_at.format("%Y-%m-%d %H:%M"))
        }
        LifecycleState::Purged => "purged".to_string(),
    }
}

pub fn run_scenario() -> LedgerResult<()> {
    println!("=== Scenario 4: Retention And Purge ===");
    println!();

    let clock = Arc::new(ManualClock::new(shift_start()));
    let ledger = open_ledger(
        Arc::new(InMemoryAuditStore::new()),
        clock.clone(),
        Arc::new(TracingAlertSink),
    )?;

    let note = EntityKey::new("shift_notes", 5);
    let batch = EntityKey::new("batch_records", 11);

    ledger.record(
        MutationEvent::new(note.clone(), AuditAction::Create, user(LEAD))
            .with_diff(FieldDiff::set("text", "Line 2 idle, waiting for parts")),
    )?;
    ledger.record(
        MutationEvent::new(batch.clone(), AuditAction::Create, system("mes-import"))
            .with_diff(FieldDiff::set("lot", "B-2026-114")),
    )?;

    ledger.mark_deleted(&note, "duplicate entry", user(LEAD))?;
    ledger.mark_deleted(&batch, "imported twice", system("mes-import"))?;
    println!("  {note}: {}", describe(ledger.lifecycle(&note)?));
    println!("  {batch}: {}", describe(ledger.lifecycle(&batch)?));
    println!();

    match ledger.purge(&note, user(QA)) {
        Ok(_) => println!("  Day 0 purge of {note}:   ACCEPTED (unexpected)"),
        Err(e) => println!("  Day 0 purge of {note}:   REFUSED ({e})"),
    }
    ledger.checkpoint()?;

    clock.advance(Duration::days(31));
    println!("  31 days later:");
    println!("    {note} eligible: {}", ledger.is_purge_eligible(&note)?);
    println!("    {batch} eligible: {}", ledger.is_purge_eligible(&batch)?);

    let receipt = ledger.purge(&note, user(QA))?;
    println!(
        "    Purged {}: {} record(s), final hash {}",
        receipt.key,
        receipt.records_removed,
        &receipt.final_entry_hash[..12]
    );
    match ledger.purge(&batch, user(QA)) {
        Ok(_) => println!("    Purge of {batch}: ACCEPTED (unexpected)"),
        Err(e) => println!("    Purge of {batch}: REFUSED ({e})"),
    }
    println!("    {note}: {}", describe(ledger.lifecycle(&note)?));

    let report = ledger.verify_checkpoint()?;
    println!(
        "    Checkpoint after purge: {}",
        verdict(report.is_some_and(|r| r.ok()))
    );

    ledger.close()?;
    println!();
    println!("  Scenario 4 complete.");
    println!();

    Ok(())
}
