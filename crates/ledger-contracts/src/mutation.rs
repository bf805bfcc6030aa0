//! The ingestion contract consumed from business entities.

use serde::{Deserialize, Serialize};

use crate::{
    audit::{AuditAction, RelatedCase},
    entity::EntityKey,
    forensic::ForensicContext,
};

/// A single field change.  `None` means the field was absent or null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

impl FieldDiff {
    pub fn new(field: impl Into<String>, old: Option<&str>, new: Option<&str>) -> Self {
        Self {
            field: field.into(),
            old: old.map(str::to_string),
            new: new.map(str::to_string),
        }
    }

    /// A field set for the first time.
    pub fn set(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            old: None,
            new: Some(value.into()),
        }
    }
}

/// A normalized mutation submitted to the event recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationEvent {
    pub key: EntityKey,
    pub action: AuditAction,
    pub field_diffs: Vec<FieldDiff>,
    pub reason_code: Option<String>,
    pub forensic: ForensicContext,
    /// Last version the caller observed.  When present the append only
    /// succeeds if it is still the chain head (compare-and-swap).
    pub expected_version: Option<u64>,
    pub related_case: Option<RelatedCase>,
}

impl MutationEvent {
    pub fn new(key: EntityKey, action: AuditAction, forensic: ForensicContext) -> Self {
        Self {
            key,
            action,
            field_diffs: Vec::new(),
            reason_code: None,
            forensic,
            expected_version: None,
            related_case: None,
        }
    }

    pub fn with_diff(mut self, diff: FieldDiff) -> Self {
        self.field_diffs.push(diff);
        self
    }

    pub fn with_reason(mut self, reason_code: impl Into<String>) -> Self {
        self.reason_code = Some(reason_code.into());
        self
    }

    pub fn expecting(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn for_case(mut self, case: RelatedCase) -> Self {
        self.related_case = Some(case);
        self
    }
}
