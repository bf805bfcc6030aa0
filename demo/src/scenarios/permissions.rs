//! Scenario 5: Delegated signing rights
//!
//! The maintenance lead goes on leave and delegates work order signing to a
//! technician for one week.  Every permission change is itself recorded on
//! the `user_permissions` chain.

use std::sync::Arc;

use chrono::Duration;

use ledger_audit::InMemoryAuditStore;
use ledger_contracts::{
    access::{AccessOverride, Effect, Permission, PermissionSet, ANY},
    entity::{EntityKey, USER_OVERRIDE_ENTITY_TYPE},
    error::LedgerResult,
    signature::SignatureMeaning,
};
use ledger_core::{ManualClock, TracingAlertSink};

use crate::fixtures::{
    open_ledger, open_work_order, shift_start, sign_head, user, ADMIN, LEAD, TECHNICIAN,
    TECHNICIAN_PIN,
};

fn rights(set: &PermissionSet) -> String {
    Permission::ALL
        .iter()
        .filter(|p| set.allows(**p))
        .map(Permission::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn run_scenario() -> LedgerResult<()> {
    println!("=== Scenario 5: Delegated Signing Rights ===");
    println!();

    let clock = Arc::new(ManualClock::new(shift_start()));
    let ledger = open_ledger(
        Arc::new(InMemoryAuditStore::new()),
        clock.clone(),
        Arc::new(TracingAlertSink),
    )?;
    let key = EntityKey::new("work_orders", 108);
    open_work_order(&ledger, &key)?;

    let before = ledger.effective(TECHNICIAN, "work_orders", ANY)?;
    println!("  Technician on work_orders:  [{}]", rights(&before));
    match sign_head(&ledger, &key, TECHNICIAN, TECHNICIAN_PIN, SignatureMeaning::Approval) {
        Ok(_) => println!("  Technician signs:           ACCEPTED (unexpected)"),
        Err(e) => println!("  Technician signs:           REFUSED ({e})"),
    }

    match ledger.add_override(delegation(), user(LEAD)) {
        Ok(_) => println!("  Lead self-grants delegation: ACCEPTED (unexpected)"),
        Err(e) => println!("  Lead self-grants delegation: REFUSED ({e})"),
    }

    let ov = ledger.add_override(delegation(), user(ADMIN))?;
    let chain = EntityKey::new(USER_OVERRIDE_ENTITY_TYPE, ov.id);
    println!("  Administrator adds override #{} ({} record(s) on {chain})", ov.id, ledger.get_history(&chain)?.len());

    let during = ledger.effective(TECHNICIAN, "work_orders", ANY)?;
    println!("  Technician on work_orders:  [{}]", rights(&during));
    let signature = sign_head(&ledger, &key, TECHNICIAN, TECHNICIAN_PIN, SignatureMeaning::Approval)?;
    println!("  Technician signs:           signature #{signature}");

    // Resolution is pinned per request: the cache keeps answering with the
    // rights in force when it was created.
    let mut cache = ledger.permission_cache();
    let cached = cache.effective(TECHNICIAN, "work_orders", "cost")?;
    println!("  Technician on cost field:   [{}]", rights(&cached));
    drop(cache);

    clock.advance(Duration::days(8));
    let after = ledger.effective(TECHNICIAN, "work_orders", ANY)?;
    println!("  After expiry:               [{}]", rights(&after));

    ledger.revoke_override(ov.id, "lead returned early", user(ADMIN))?;
    println!(
        "  Override revoked:           {} record(s) on {chain}",
        ledger.get_history(&chain)?.len()
    );

    ledger.close()?;
    println!();
    println!("  Scenario 5 complete.");
    println!();

    Ok(())
}

fn delegation() -> AccessOverride {
    AccessOverride {
        id: 0,
        user_id: TECHNICIAN,
        table: "work_orders".to_string(),
        field: ANY.to_string(),
        permission: Permission::Sign,
        effect: Effect::Grant,
        delegated_by: Some(LEAD),
        expires_at: Some(shift_start() + Duration::days(7)),
        is_active: true,
        is_revoked: false,
        reason: Some("lead on leave".to_string()),
    }
}
