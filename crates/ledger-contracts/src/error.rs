//! Error taxonomy for the audit ledger.
//!
//! All fallible ledger operations return `LedgerResult<T>`.  Variants carry
//! enough context for the caller to decide whether to fix the request, retry,
//! or escalate to compliance operators.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::entity::EntityKey;

/// The unified error type for the audit ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed input.  The caller must fix the request before resubmitting.
    #[error("validation error: {reason}")]
    Validation { reason: String },

    /// A concurrent writer appended to the same chain first.
    ///
    /// Nothing was written; the caller re-reads the history and retries.
    #[error("version conflict on {key}: expected version {expected}, current is {actual}")]
    VersionConflict {
        key: EntityKey,
        expected: u64,
        actual: u64,
    },

    /// A stored record no longer reproduces its hash, or the chain is
    /// under review after such a finding.
    ///
    /// Fatal for the affected chain segment.  Never retried automatically.
    #[error("integrity violation on {key} at version {version}: {reason}")]
    IntegrityViolation {
        key: EntityKey,
        version: u64,
        reason: String,
    },

    /// Credential rejected, certificate expired, or external verifier
    /// unreachable.  The signing flow may be retried.
    #[error("signature error: {reason}")]
    Signature { reason: String },

    /// A purge was attempted before the retention window elapsed.
    #[error("retention violation on {key}: {reason}")]
    RetentionViolation {
        key: EntityKey,
        reason: String,
        eligible_at: Option<DateTime<Utc>>,
    },

    /// The access overlay or signature gate refused the request.
    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// A referenced record, signature, or grant does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The backing store failed to read or write.
    #[error("storage error: {reason}")]
    Storage { reason: String },

    /// A configuration document is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },
}

impl LedgerError {
    /// Convenience constructor for `Validation`.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for `PermissionDenied`.
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for `Signature`.
    pub fn signature(reason: impl Into<String>) -> Self {
        Self::Signature {
            reason: reason.into(),
        }
    }

    /// True when resubmitting the same request can succeed without any
    /// change in authorization or data.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::Signature { .. })
    }
}

/// Convenience alias used throughout the ledger crates.
pub type LedgerResult<T> = Result<T, LedgerError>;
