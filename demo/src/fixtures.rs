//! Shared wiring for the demo scenarios: a manual clock, the sample
//! configuration, PIN credentials, and forensic contexts for the cast.
//!
//!   1  Ana Horvat      access administrator
//!   7  Nikola Babic    maintenance lead
//!   8  Cvita Lovric    technician
//!   9  Marta Juric     QA officer

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use ledger_contracts::{
    audit::{AuditAction, AuditRecord},
    entity::EntityKey,
    error::{LedgerError, LedgerResult},
    forensic::ForensicContext,
    mutation::{FieldDiff, MutationEvent},
    signature::{Credential, SignatureMeaning, SignatureMethod, SignatureRequest},
};
use ledger_core::{
    capture,
    traits::{AlertSink, AuditStore},
    ManualClock, RequestOrigin,
};
use ledger_runtime::{Ledger, LedgerBuilder, LedgerConfig, SAMPLE_CONFIG};
use ledger_signature::{MethodVerifier, PinVerifier};

pub const ADMIN: u64 = 1;
pub const LEAD: u64 = 7;
pub const TECHNICIAN: u64 = 8;
pub const QA: u64 = 9;

pub const LEAD_PIN: &str = "2468";
pub const TECHNICIAN_PIN: &str = "1357";

pub fn shift_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 20, 6, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn verifiers() -> MethodVerifier {
    MethodVerifier::new().with(
        SignatureMethod::Pin,
        Arc::new(
            PinVerifier::new()
                .with_pin(LEAD, "nb-salt", LEAD_PIN)
                .with_pin(TECHNICIAN, "cl-salt", TECHNICIAN_PIN),
        ),
    )
}

/// Open a ledger over `store` using the sample configuration.
pub fn open_ledger(
    store: Arc<dyn AuditStore>,
    clock: Arc<ManualClock>,
    alerts: Arc<dyn AlertSink>,
) -> LedgerResult<Ledger> {
    let config = LedgerConfig::from_toml_str(SAMPLE_CONFIG)?;
    LedgerBuilder::new(config)
        .with_store(store)
        .with_clock(clock)
        .with_alert_sink(alerts)
        .with_verifier(Arc::new(verifiers()))
        .open()
}

fn username(user_id: u64) -> &'static str {
    match user_id {
        ADMIN => "ahorvat",
        LEAD => "nbabic",
        TECHNICIAN => "clovric",
        QA => "mjuric",
        _ => "guest",
    }
}

/// Forensic context of a user working from the shop-floor tablet.
pub fn user(user_id: u64) -> ForensicContext {
    capture(&RequestOrigin {
        user_id: Some(user_id),
        username: Some(username(user_id).to_string()),
        remote_addr: Some("10.20.4.17:50122".to_string()),
        user_agent: Some("YasGMP Tablet/4.2".to_string()),
        os_description: Some("Android 14".to_string()),
        session_id: Some(format!("shift-{user_id}")),
        ..RequestOrigin::default()
    })
}

/// Forensic context of an automated job.
pub fn system(component: &str) -> ForensicContext {
    capture(&RequestOrigin {
        system_component: Some(component.to_string()),
        remote_addr: Some("127.0.0.1:9000".to_string()),
        ..RequestOrigin::default()
    })
}

/// v1: CREATE {status, title, cost}.
pub fn open_work_order(ledger: &Ledger, key: &EntityKey) -> LedgerResult<AuditRecord> {
    ledger.record(
        MutationEvent::new(key.clone(), AuditAction::Create, user(LEAD))
            .with_diff(FieldDiff::set("status", "open"))
            .with_diff(FieldDiff::set("title", "Replace filler nozzle gasket"))
            .with_diff(FieldDiff::set("cost", "120.00")),
    )
}

/// Sign the current head record of `key`.
pub fn sign_head(
    ledger: &Ledger,
    key: &EntityKey,
    user_id: u64,
    pin: &str,
    meaning: SignatureMeaning,
) -> LedgerResult<u64> {
    let head = ledger
        .get_history(key)?
        .pop()
        .ok_or_else(|| LedgerError::NotFound {
            what: format!("history of {key}"),
        })?;
    let event = ledger.sign(SignatureRequest {
        target_record_id: head.id,
        user_id,
        credential: Credential::Pin {
            pin: pin.to_string(),
        },
        meaning,
        reason_code: format!("{meaning} of {key} v{}", head.change_version),
        forensic: user(user_id),
    })?;
    Ok(event.id)
}

pub fn verdict(ok: bool) -> &'static str {
    if ok {
        "VERIFIED"
    } else {
        "FAILED"
    }
}
