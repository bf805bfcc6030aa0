//! Hash-chain primitives: sealing and chain integrity verification.
//!
//! Each chain is keyed by `(entity_type, entity_id)`.  Hash input layout
//! (bytes, in order):
//!   1. previous_hash as UTF-8 bytes (64 ASCII hex chars)
//!   2. canonical JSON of the record without `id`, `entry_hash`,
//!      `previous_hash` and `timestamp_utc`
//!   3. timestamp_utc as RFC 3339 with nanoseconds and a `Z` suffix
//!
//! The canonical form is produced by serializing a borrowed struct whose
//! field order is fixed by declaration, so the encoding never depends on map
//! iteration order or formatting.

use chrono::SecondsFormat;
use serde::Serialize;
use sha2::{Digest, Sha256};

use ledger_contracts::{
    audit::{AuditAction, AuditRecord, RelatedCase, Severity},
    error::{LedgerError, LedgerResult},
    forensic::ForensicContext,
    verify::VerificationResult,
};

/// The `previous_hash` of version 1 in every chain.
///
/// 64 hex zeros, a value that is never the SHA-256 of real data.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Serialize)]
struct CanonicalRecord<'a> {
    entity_type: &'a str,
    entity_id: u64,
    change_version: u64,
    action: AuditAction,
    field_name: Option<&'a str>,
    old_value: Option<&'a str>,
    new_value: Option<&'a str>,
    reason_code: Option<&'a str>,
    signature_id: Option<u64>,
    forensic: &'a ForensicContext,
    is_deleted: bool,
    related_case: Option<&'a RelatedCase>,
    severity: Severity,
}

/// Deterministic, whitespace-free encoding of the hashed record fields.
pub fn canonical_encode(record: &AuditRecord) -> LedgerResult<Vec<u8>> {
    let canonical = CanonicalRecord {
        entity_type: &record.key.entity_type,
        entity_id: record.key.entity_id,
        change_version: record.change_version,
        action: record.action,
        field_name: record.field_name.as_deref(),
        old_value: record.old_value.as_deref(),
        new_value: record.new_value.as_deref(),
        reason_code: record.reason_code.as_deref(),
        signature_id: record.signature_id,
        forensic: &record.forensic,
        is_deleted: record.is_deleted,
        related_case: record.related_case.as_ref(),
        severity: record.severity,
    };
    serde_json::to_vec(&canonical).map_err(|e| LedgerError::Storage {
        reason: format!("failed to encode record for hashing: {e}"),
    })
}

/// Compute the entry hash of `candidate` from its own fields.
///
/// `candidate.previous_hash` must already be set.  The stored
/// `entry_hash` (if any) is ignored.  Returns lowercase hex.
pub fn seal(candidate: &AuditRecord) -> LedgerResult<String> {
    let encoded = canonical_encode(candidate)?;
    let timestamp = candidate
        .timestamp_utc
        .to_rfc3339_opts(SecondsFormat::Nanos, true);

    let mut hasher = Sha256::new();
    hasher.update(candidate.previous_hash.as_bytes());
    hasher.update(&encoded);
    hasher.update(timestamp.as_bytes());

    Ok(hex::encode(hasher.finalize()))
}

/// Verify versions `from..=to` of a full chain history.
///
/// `records` must be the complete history in store order.  For every record
/// in range three rules are checked:
///
/// 1. **Position**: `change_version` equals its 1-based position.
/// 2. **Linkage**: `previous_hash` equals the prior record's `entry_hash`
///    (or `GENESIS_HASH` for version 1).
/// 3. **Content**: `entry_hash` equals the hash recomputed by [`seal`].
///
/// Stops at the first failing record and reports its version.  Nothing is
/// repaired.
pub fn verify_range(records: &[AuditRecord], from: u64, to: u64) -> LedgerResult<VerificationResult> {
    let len = records.len() as u64;
    if from == 0 || from > to || to > len {
        return Err(LedgerError::validation(format!(
            "verification range {from}..={to} is outside the chain (1..={len})"
        )));
    }

    let start = (from - 1) as usize;
    let mut expected_prev = if start == 0 {
        GENESIS_HASH.to_string()
    } else {
        records[start - 1].entry_hash.clone()
    };

    let mut checked = 0;
    for (offset, record) in records[start..to as usize].iter().enumerate() {
        let expected_version = from + offset as u64;
        checked += 1;

        if record.change_version != expected_version
            || record.previous_hash != expected_prev
            || seal(record)? != record.entry_hash
        {
            return Ok(VerificationResult::violated(expected_version, checked));
        }

        expected_prev = record.entry_hash.clone();
    }

    Ok(VerificationResult::intact(checked))
}

/// Verify a whole chain.  An empty chain is valid.
pub fn verify_chain(records: &[AuditRecord]) -> LedgerResult<VerificationResult> {
    if records.is_empty() {
        return Ok(VerificationResult::intact(0));
    }
    verify_range(records, 1, records.len() as u64)
}
