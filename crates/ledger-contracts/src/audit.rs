//! The immutable audit record and its closed vocabularies.
//!
//! `AuditRecord` is the atomic unit of history.  Once sealed by the hash
//! chain engine it is never mutated; corrections are new records.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    entity::EntityKey,
    error::LedgerError,
    forensic::{Actor, ForensicContext},
};

/// What a record did to its entity.
///
/// Serialized as SCREAMING_SNAKE_CASE so stored rows keep the column values
/// regulators already know (`CREATE`, `REVOKE_SIGNATURE`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Sign,
    RevokeSignature,
    Rollback,
    Export,
}

impl AuditAction {
    pub const ALL: [AuditAction; 7] = [
        AuditAction::Create,
        AuditAction::Update,
        AuditAction::Delete,
        AuditAction::Sign,
        AuditAction::RevokeSignature,
        AuditAction::Rollback,
        AuditAction::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Sign => "SIGN",
            AuditAction::RevokeSignature => "REVOKE_SIGNATURE",
            AuditAction::Rollback => "ROLLBACK",
            AuditAction::Export => "EXPORT",
        }
    }

    /// Actions only ledger components may emit.  Business entities never
    /// submit these directly.
    pub fn is_reserved(&self) -> bool {
        matches!(
            self,
            AuditAction::Sign | AuditAction::RevokeSignature | AuditAction::Rollback
        )
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = LedgerError;

    /// Accepts the canonical upper-case names, case-insensitively, with `-`
    /// or `_` separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        AuditAction::ALL
            .into_iter()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| LedgerError::validation(format!("unknown audit action '{s}'")))
    }
}

/// Alert level stored with each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Audit,
    Warning,
    Critical,
}

impl Severity {
    /// Default severity for an action.
    pub fn for_action(action: AuditAction) -> Self {
        match action {
            AuditAction::Create | AuditAction::Update | AuditAction::Export => Severity::Info,
            AuditAction::Sign => Severity::Audit,
            AuditAction::Delete => Severity::Warning,
            AuditAction::RevokeSignature | AuditAction::Rollback => Severity::Critical,
        }
    }
}

/// Remediation workflow a mutation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseType {
    Capa,
    Incident,
    Deviation,
    ChangeControl,
}

/// Link from a mutation to the CAPA / incident that motivated it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedCase {
    pub case_id: u64,
    pub case_type: CaseType,
}

/// One sealed, immutable entry in an entity's hash chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Store-assigned, monotonic across the whole ledger.  Not part of the
    /// entry hash.
    pub id: u64,
    pub key: EntityKey,
    /// 1-based, gapless within `key`.
    pub change_version: u64,
    pub previous_hash: String,
    pub entry_hash: String,

    pub action: AuditAction,
    pub field_name: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub reason_code: Option<String>,
    /// Back-reference to a `SignatureEvent` by id only.
    pub signature_id: Option<u64>,

    pub forensic: ForensicContext,
    pub timestamp_utc: DateTime<Utc>,

    pub is_deleted: bool,
    pub related_case: Option<RelatedCase>,
    pub severity: Severity,
}

impl AuditRecord {
    /// The acting user, if a human performed the action.
    pub fn actor_user_id(&self) -> Option<u64> {
        self.forensic.actor.user_id()
    }
}

/// Flat row shape used by relational persistence and regulator exports.
///
/// Column names mirror the audit tables shared by every business module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRow {
    pub id: u64,
    pub table_name: String,
    pub record_id: u64,
    pub field_name: Option<String>,
    pub action: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub digital_signature: Option<String>,
    pub entry_hash: String,
    pub previous_hash: String,
    pub change_version: u64,
    pub is_deleted: bool,
    pub user_id: Option<u64>,
    pub username: String,
    pub source_ip: String,
    pub device_info: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<&AuditRecord> for AuditRow {
    fn from(record: &AuditRecord) -> Self {
        let username = match &record.forensic.actor {
            Actor::User { .. } => record.forensic.username_snapshot.clone(),
            Actor::System { component } => format!("system:{component}"),
        };
        Self {
            id: record.id,
            table_name: record.key.entity_type.clone(),
            record_id: record.key.entity_id,
            field_name: record.field_name.clone(),
            action: record.action.as_str().to_string(),
            old_value: record.old_value.clone(),
            new_value: record.new_value.clone(),
            digital_signature: record.signature_id.map(|id| id.to_string()),
            entry_hash: record.entry_hash.clone(),
            previous_hash: record.previous_hash.clone(),
            change_version: record.change_version,
            is_deleted: record.is_deleted,
            user_id: record.actor_user_id(),
            username,
            source_ip: record.forensic.source_ip.clone(),
            device_info: record.forensic.device_info.clone(),
            session_id: record.forensic.session_id.clone(),
            created_at: record.timestamp_utc,
        }
    }
}
