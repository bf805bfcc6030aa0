//! Scenario 3: Someone edits the database
//!
//! A calibration result is quietly changed from FAIL to PASS directly in
//! storage.  The ledger:
//!   1. Reports the first broken version on verification
//!   2. Raises an integrity alert and places the chain under review
//!   3. Keeps the history readable but refuses new writes
//!   4. Catches a re-sealed edit at restart through the global checkpoint

use std::sync::{Arc, Mutex};

use chrono::Duration;

use ledger_audit::{seal, InMemoryAuditStore};
use ledger_contracts::{
    audit::{AuditAction, AuditRecord},
    entity::EntityKey,
    error::LedgerResult,
    mutation::{FieldDiff, MutationEvent},
    verify::{ChainHead, ChainStatus, Checkpoint},
};
use ledger_core::{traits::AuditStore, ManualClock, RecordingAlertSink};

use crate::fixtures::{open_ledger, shift_start, user, verdict, TECHNICIAN};

// ── Tamperable store ──────────────────────────────────────────────────────────

/// An `InMemoryAuditStore` whose reads can be edited after the fact, the way
/// a direct SQL `UPDATE` would edit a real table.
#[derive(Default)]
struct TamperableStore {
    inner: InMemoryAuditStore,
    edit: Mutex<Option<Edit>>,
}

struct Edit {
    key: EntityKey,
    version: u64,
    new_value: String,
    /// Recompute `entry_hash` so the edited record verifies on its own.
    reseal: bool,
}

impl TamperableStore {
    fn overwrite(&self, edit: Edit) {
        if let Ok(mut slot) = self.edit.lock() {
            *slot = Some(edit);
        }
    }

    fn apply(&self, record: &mut AuditRecord) -> LedgerResult<()> {
        let Ok(slot) = self.edit.lock() else {
            return Ok(());
        };
        if let Some(edit) = slot.as_ref() {
            if record.key == edit.key && record.change_version == edit.version {
                record.new_value = Some(edit.new_value.clone());
                if edit.reseal {
                    record.entry_hash = seal(record)?;
                }
            }
        }
        Ok(())
    }
}

impl AuditStore for TamperableStore {
    fn head(&self, key: &EntityKey) -> LedgerResult<Option<ChainHead>> {
        self.inner.head(key)
    }

    fn append(&self, record: AuditRecord) -> LedgerResult<AuditRecord> {
        self.inner.append(record)
    }

    fn history(&self, key: &EntityKey) -> LedgerResult<Vec<AuditRecord>> {
        let mut history = self.inner.history(key)?;
        for record in &mut history {
            self.apply(record)?;
        }
        Ok(history)
    }

    fn record(&self, id: u64) -> LedgerResult<Option<AuditRecord>> {
        let mut record = self.inner.record(id)?;
        if let Some(r) = record.as_mut() {
            self.apply(r)?;
        }
        Ok(record)
    }

    fn heads(&self) -> LedgerResult<Vec<ChainHead>> {
        self.inner.heads()
    }

    fn purge(&self, key: &EntityKey) -> LedgerResult<usize> {
        self.inner.purge(key)
    }

    fn is_purged(&self, key: &EntityKey) -> LedgerResult<bool> {
        self.inner.is_purged(key)
    }

    fn append_checkpoint(&self, checkpoint: Checkpoint) -> LedgerResult<()> {
        self.inner.append_checkpoint(checkpoint)
    }

    fn latest_checkpoint(&self) -> LedgerResult<Option<Checkpoint>> {
        self.inner.latest_checkpoint()
    }
}

// ── Scenario runner ───────────────────────────────────────────────────────────

pub fn run_scenario() -> LedgerResult<()> {
    println!("=== Scenario 3: Tampered Calibration Result ===");
    println!();

    let clock = Arc::new(ManualClock::new(shift_start()));
    let store = Arc::new(TamperableStore::default());
    let alerts = Arc::new(RecordingAlertSink::default());
    let ledger = open_ledger(store.clone(), clock.clone(), alerts.clone())?;
    let key = EntityKey::new("calibrations", 310);

    ledger.record(
        MutationEvent::new(key.clone(), AuditAction::Create, user(TECHNICIAN))
            .with_diff(FieldDiff::set("instrument", "PT-100 probe 4"))
            .with_diff(FieldDiff::set("result", "pending")),
    )?;
    clock.advance(Duration::minutes(40));
    ledger.record(
        MutationEvent::new(key.clone(), AuditAction::Update, user(TECHNICIAN))
            .with_diff(FieldDiff::new("result", Some("pending"), Some("FAIL")))
            .expecting(1),
    )?;
    let checkpoint = ledger.checkpoint()?;
    println!("  Calibration 310: v1 CREATE, v2 result=FAIL; checkpoint #{}", checkpoint.sequence);

    store.overwrite(Edit {
        key: key.clone(),
        version: 2,
        new_value: "PASS".to_string(),
        reseal: false,
    });
    println!("  Storage edited: v2 result FAIL -> PASS");
    println!();

    // ── Detection ────────────────────────────────────────────────────────────

    let result = ledger.verify_chain(&key, 1, 2)?;
    println!(
        "  Chain verification:     {} (first violation at v{})",
        verdict(result.ok),
        result.first_violation_version.unwrap_or(0)
    );
    for alert in alerts.alerts() {
        println!("  Alert raised:           {}", alert.detail);
    }
    if let ChainStatus::UnderReview { since_version, .. } = ledger.chain_status(&key) {
        println!("  Chain status:           UNDER REVIEW since v{since_version}");
    }

    println!("  History still readable: {} record(s)", ledger.get_history(&key)?.len());
    match ledger.record(
        MutationEvent::new(key.clone(), AuditAction::Update, user(TECHNICIAN))
            .with_diff(FieldDiff::set("result", "PASS")),
    ) {
        Ok(_) => println!("  New write:              ACCEPTED (unexpected)"),
        Err(e) => println!("  New write:              REFUSED ({e})"),
    }
    println!();

    // ── Restart ──────────────────────────────────────────────────────────────

    // A careful forger re-seals v2 so it verifies on its own.  v2 is the
    // head, so nothing later in the chain links to it; only the checkpoint
    // still remembers the original hash.
    ledger.close()?;
    store.overwrite(Edit {
        key: key.clone(),
        version: 2,
        new_value: "PASS".to_string(),
        reseal: true,
    });
    println!("  Storage re-sealed:      v2 hash recomputed after the edit");
    match open_ledger(store.clone(), clock, alerts.clone()) {
        Ok(_) => println!("  Reopen:                 ACCEPTED (unexpected)"),
        Err(e) => println!("  Reopen:                 REFUSED ({e})"),
    }
    println!("  Alerts raised in total: {}", alerts.alerts().len());

    println!();
    println!("  Scenario 3 complete.");
    println!();

    Ok(())
}
