//! Historical state reconstruction.
//!
//! Replays records `1..=at_version` of one chain:
//!
//! | record shape                         | effect                          |
//! |--------------------------------------|---------------------------------|
//! | `field_name = Some(f)`               | set or clear field `f`          |
//! | `field_name = None`, JSON object     | merge the changed fields        |
//! | `ROLLBACK`                           | replace state with the snapshot |
//! | `DELETE`                             | mark the state deleted          |
//! | `SIGN`, `REVOKE_SIGNATURE`, `EXPORT` | version only                    |
//!
//! No record is modified.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ledger_contracts::{
    audit::{AuditAction, AuditRecord},
    entity::EntityKey,
    error::{LedgerError, LedgerResult},
};

/// Field values of one entity as of one version.  A `None` value is a field
/// explicitly cleared to null.
pub type FieldMap = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    pub key: EntityKey,
    pub version: u64,
    pub fields: FieldMap,
    pub is_deleted: bool,
}

impl EntityState {
    fn empty(key: EntityKey) -> Self {
        Self {
            key,
            version: 0,
            fields: FieldMap::new(),
            is_deleted: false,
        }
    }

    /// Canonical JSON of `fields`; keys are sorted.
    pub fn snapshot_json(&self) -> LedgerResult<String> {
        serde_json::to_string(&self.fields).map_err(|e| LedgerError::Storage {
            reason: format!("failed to encode state snapshot: {e}"),
        })
    }

    fn apply(&mut self, record: &AuditRecord) -> LedgerResult<()> {
        match record.action {
            AuditAction::Sign | AuditAction::RevokeSignature | AuditAction::Export => {}
            AuditAction::Rollback => {
                self.fields = parse_fields(record, record.new_value.as_deref())?;
            }
            AuditAction::Create | AuditAction::Update | AuditAction::Delete => {
                match &record.field_name {
                    Some(field) => {
                        self.fields.insert(field.clone(), record.new_value.clone());
                    }
                    None if record.new_value.is_some() => {
                        let changed = parse_fields(record, record.new_value.as_deref())?;
                        self.fields.extend(changed);
                    }
                    None => {}
                }
            }
        }
        self.version = record.change_version;
        self.is_deleted = record.is_deleted;
        Ok(())
    }
}

fn parse_fields(record: &AuditRecord, json: Option<&str>) -> LedgerResult<FieldMap> {
    let json = json.ok_or_else(|| {
        LedgerError::validation(format!(
            "{} v{} has no state payload",
            record.key, record.change_version
        ))
    })?;
    serde_json::from_str(json).map_err(|e| {
        LedgerError::validation(format!(
            "{} v{} payload is not a field object: {e}",
            record.key, record.change_version
        ))
    })
}

/// Rebuild the state of `key` at `at_version` from its version-ordered
/// history.
///
/// # Errors
///
/// - `NotFound` if the chain is empty.
/// - `Validation` if `at_version` is outside `1..=current`.
pub fn replay(key: &EntityKey, records: &[AuditRecord], at_version: u64) -> LedgerResult<EntityState> {
    let current = records.len() as u64;
    if current == 0 {
        return Err(LedgerError::NotFound {
            what: format!("history of {key}"),
        });
    }
    if at_version == 0 || at_version > current {
        return Err(LedgerError::validation(format!(
            "{key} has versions 1..={current}; cannot reconstruct v{at_version}"
        )));
    }

    let mut state = EntityState::empty(key.clone());
    for record in records.iter().take(at_version as usize) {
        state.apply(record)?;
    }
    Ok(state)
}
