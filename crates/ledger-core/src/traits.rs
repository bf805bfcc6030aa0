//! Trait seams between the ledger and its collaborators.
//!
//! - `AuditStore`        : append-only record storage (trusted sink)
//! - `SignatureStore`    : signature event storage
//! - `CredentialVerifier`: PIN / certificate / biometric checks, possibly
//!   backed by external PKI
//! - `AlertSink`         : out-of-band compliance alerts
//! - `Clock`             : the single source of timestamps
//!
//! Components depend on these traits only, so a relational backend can
//! replace the in-memory reference implementations without touching the
//! recorder, chain engine, or managers.

use chrono::{DateTime, Utc};

use ledger_contracts::{
    audit::AuditRecord,
    entity::EntityKey,
    error::LedgerResult,
    signature::{Credential, SignatureEvent},
    verify::{ChainHead, Checkpoint},
};

use crate::alert::IntegrityAlert;

/// Append-only storage for sealed audit records.
///
/// Only the event recorder calls `append`; no other component writes
/// records directly.
pub trait AuditStore: Send + Sync {
    /// Current tail of the chain for `key`, or `None` if it has no records.
    fn head(&self, key: &EntityKey) -> LedgerResult<Option<ChainHead>>;

    /// Append a sealed record and return it with its store-assigned id.
    ///
    /// This is the compare-and-swap point: implementations must reject the
    /// record with `VersionConflict` unless `record.change_version` is
    /// exactly one past the current head and `record.previous_hash` equals
    /// the head's `entry_hash`.  A rejected append writes nothing.
    fn append(&self, record: AuditRecord) -> LedgerResult<AuditRecord>;

    /// Every record for `key` in version order.
    fn history(&self, key: &EntityKey) -> LedgerResult<Vec<AuditRecord>>;

    /// Look up a single record by its id.
    fn record(&self, id: u64) -> LedgerResult<Option<AuditRecord>>;

    /// A snapshot of every chain head, sorted by key.
    fn heads(&self) -> LedgerResult<Vec<ChainHead>>;

    /// Physically remove every record for `key`.  Returns the number of
    /// records removed.  Callers must have established purge eligibility.
    fn purge(&self, key: &EntityKey) -> LedgerResult<usize>;

    /// True once `key` has been purged.  Purged keys accept no new records.
    fn is_purged(&self, key: &EntityKey) -> LedgerResult<bool>;

    /// Persist a global checkpoint.
    fn append_checkpoint(&self, checkpoint: Checkpoint) -> LedgerResult<()>;

    /// The most recent checkpoint, if any.
    fn latest_checkpoint(&self) -> LedgerResult<Option<Checkpoint>>;
}

/// Storage for signature events.
///
/// Signature hashes are write-once.  The only permitted mutation is the
/// status flip performed by `mark_revoked`.
pub trait SignatureStore: Send + Sync {
    /// Reserve the next signature id.  An abandoned signing flow leaves a gap.
    fn next_id(&self) -> LedgerResult<u64>;

    fn insert(&self, event: SignatureEvent) -> LedgerResult<()>;

    fn get(&self, id: u64) -> LedgerResult<Option<SignatureEvent>>;

    /// Set `status = revoked` and stamp the revocation fields.
    ///
    /// Returns the updated event.  Fails with `Validation` if the signature
    /// is already revoked.
    fn mark_revoked(
        &self,
        id: u64,
        revoked_at: DateTime<Utc>,
        reason: &str,
    ) -> LedgerResult<SignatureEvent>;

    /// All signatures bound to one audit record, in id order.
    fn for_record(&self, record_id: u64) -> LedgerResult<Vec<SignatureEvent>>;
}

/// Checks the credential presented with a signing request.
///
/// Implementations backed by an external verifier must fail closed:
/// unreachable or timed out is `LedgerError::Signature`, never success.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, user_id: u64, credential: &Credential, at: DateTime<Utc>) -> LedgerResult<()>;
}

/// Receives integrity alerts for compliance operators.
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: &IntegrityAlert);
}

/// Time source for every ledger timestamp.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
