//! The signature service.
//!
//! Signing flow:
//!
//!   load target record → chain trusted? → verify credential
//!   → reserve id → compute hash → SIGN record → store event
//!
//! SIGN and REVOKE_SIGNATURE records are chained under
//! `("digital_signatures", signature_id)`, so signing never consumes a
//! version of the signed entity.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use ledger_audit::{EventRecorder, LedgerAttachment};
use ledger_contracts::{
    audit::{AuditAction, AuditRecord},
    entity::{EntityKey, SIGNATURE_ENTITY_TYPE},
    error::{LedgerError, LedgerResult},
    forensic::ForensicContext,
    mutation::{FieldDiff, MutationEvent},
    signature::{SignatureEvent, SignatureMeaning, SignatureMethod, SignatureRequest, SignatureStatus},
};
use ledger_core::traits::{AuditStore, CredentialVerifier, SignatureStore};

/// Hex SHA-256 over `user_id | signed_at | target entry hash | method`.
///
/// The signing time is encoded as RFC 3339 with nanoseconds so the hash can
/// be recomputed exactly from stored values.
pub fn signature_hash(
    user_id: u64,
    signed_at: DateTime<Utc>,
    target_entry_hash: &str,
    method: SignatureMethod,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(signed_at.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
    hasher.update(b"|");
    hasher.update(target_entry_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(method.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

/// Key of the chain holding a signature's lifecycle records.
pub fn signature_chain_key(signature_id: u64) -> EntityKey {
    EntityKey::new(SIGNATURE_ENTITY_TYPE, signature_id)
}

pub struct SignatureService {
    recorder: Arc<EventRecorder>,
    signatures: Arc<dyn SignatureStore>,
    verifier: Arc<dyn CredentialVerifier>,
}

impl SignatureService {
    pub fn new(
        recorder: Arc<EventRecorder>,
        signatures: Arc<dyn SignatureStore>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            recorder,
            signatures,
            verifier,
        }
    }

    fn store(&self) -> &Arc<dyn AuditStore> {
        self.recorder.store()
    }

    fn target(&self, record_id: u64) -> LedgerResult<AuditRecord> {
        self.store()
            .record(record_id)?
            .ok_or_else(|| LedgerError::NotFound {
                what: format!("audit record {record_id}"),
            })
    }

    /// Sign one sealed audit record.
    ///
    /// # Errors
    ///
    /// - `Validation` if the request is malformed, the acting user differs
    ///   from the signer, or the target entity is soft-deleted.
    /// - `NotFound` if the target record does not exist.
    /// - `IntegrityViolation` if the target's chain is under review.
    /// - `Signature` if the credential is rejected or cannot be verified.
    pub fn sign(&self, request: SignatureRequest) -> LedgerResult<SignatureEvent> {
        if request.user_id == 0 || request.reason_code.trim().is_empty() {
            return Err(LedgerError::validation(
                "a signature needs a signer and a reason code",
            ));
        }
        if request.forensic.actor.user_id() != Some(request.user_id) {
            return Err(LedgerError::validation(format!(
                "user {} cannot sign on behalf of {:?}",
                request.user_id, request.forensic.actor
            )));
        }

        let target = self.target(request.target_record_id)?;
        self.recorder.reviews().ensure_trusted(&target.key)?;
        if let Some(head) = self.store().head(&target.key)? {
            let deleted = self
                .store()
                .record(head.record_id)?
                .is_some_and(|r| r.is_deleted);
            if deleted {
                return Err(LedgerError::validation(format!(
                    "{} is soft-deleted and cannot be signed",
                    target.key
                )));
            }
        }

        let signed_at = self.recorder.clock().now();
        let method = request.credential.method();
        if let Err(e) = self
            .verifier
            .verify(request.user_id, &request.credential, signed_at)
        {
            warn!(user_id = request.user_id, method = %method, error = %e, "signature credential rejected");
            return Err(e);
        }

        let id = self.signatures.next_id()?;
        let hash = signature_hash(request.user_id, signed_at, &target.entry_hash, method);

        let event = MutationEvent::new(signature_chain_key(id), AuditAction::Sign, request.forensic)
            .with_diff(FieldDiff::set("target_record_id", target.id.to_string()))
            .with_diff(FieldDiff::set("target", target.key.to_string()))
            .with_diff(FieldDiff::set("signature_hash", hash.clone()))
            .with_diff(FieldDiff::set("method", method.as_str()))
            .with_diff(FieldDiff::set("meaning", request.meaning.as_str()))
            .with_reason(request.reason_code.clone());
        self.recorder.record_ledger_event(
            event,
            LedgerAttachment {
                signature_id: Some(id),
                snapshot: None,
            },
        )?;

        let signature = SignatureEvent {
            id,
            target_record_id: target.id,
            user_id: request.user_id,
            method,
            meaning: request.meaning,
            signature_hash: hash,
            reason_code: request.reason_code,
            status: SignatureStatus::Valid,
            signed_at_utc: signed_at,
            revoked_at_utc: None,
            revocation_reason: None,
        };
        self.signatures.insert(signature.clone())?;

        info!(
            signature_id = id,
            target_record_id = target.id,
            target = %target.key,
            user_id = signature.user_id,
            meaning = %signature.meaning,
            "record signed"
        );
        Ok(signature)
    }

    /// Revoke a signature.
    ///
    /// Appends exactly one REVOKE_SIGNATURE record to the signature's chain
    /// and flips its status.  The stored hash is left untouched.
    pub fn revoke(
        &self,
        signature_id: u64,
        reason: &str,
        forensic: ForensicContext,
    ) -> LedgerResult<AuditRecord> {
        if reason.trim().is_empty() {
            return Err(LedgerError::validation("revocation requires a reason"));
        }
        let signature = self.get(signature_id)?;
        if !signature.is_valid() {
            return Err(LedgerError::validation(format!(
                "signature {signature_id} is already revoked"
            )));
        }

        let event = MutationEvent::new(
            signature_chain_key(signature_id),
            AuditAction::RevokeSignature,
            forensic,
        )
        .with_diff(FieldDiff::new("status", Some("valid"), Some("revoked")))
        .with_reason(reason);
        let record = self.recorder.record_ledger_event(
            event,
            LedgerAttachment {
                signature_id: Some(signature_id),
                snapshot: None,
            },
        )?;

        self.signatures
            .mark_revoked(signature_id, record.timestamp_utc, reason)?;
        info!(signature_id, record_id = record.id, "signature revoked");
        Ok(record)
    }

    pub fn get(&self, signature_id: u64) -> LedgerResult<SignatureEvent> {
        self.signatures
            .get(signature_id)?
            .ok_or_else(|| LedgerError::NotFound {
                what: format!("signature {signature_id}"),
            })
    }

    /// True if the signature is valid and its hash still matches the target
    /// record.  A revoked signature or a missing target yields `false`.
    pub fn verify_signature(&self, signature_id: u64) -> LedgerResult<bool> {
        let signature = self.get(signature_id)?;
        if !signature.is_valid() {
            return Ok(false);
        }
        let Some(target) = self.store().record(signature.target_record_id)? else {
            return Ok(false);
        };
        let expected = signature_hash(
            signature.user_id,
            signature.signed_at_utc,
            &target.entry_hash,
            signature.method,
        );
        Ok(expected == signature.signature_hash)
    }

    /// Every signature bound to `record_id`, revoked ones included.
    pub fn signatures_for(&self, record_id: u64) -> LedgerResult<Vec<SignatureEvent>> {
        self.signatures.for_record(record_id)
    }

    /// Accept `signature_id` as authorization for a rollback of the record
    /// `head_record_id`.
    ///
    /// The signature must be valid, carry the rollback meaning, be made by
    /// `user_id` on exactly that record, be no older than `max_age`, and
    /// still verify.  Any failure is `PermissionDenied`.
    ///
    /// A consumed signature cannot be replayed: the rollback moves the head,
    /// so the signature no longer targets the current record.
    pub fn accept_rollback_signature(
        &self,
        signature_id: u64,
        user_id: u64,
        head_record_id: u64,
        max_age: Duration,
    ) -> LedgerResult<SignatureEvent> {
        let deny = |why: &str| LedgerError::denied(format!("signature {signature_id} {why}"));

        let signature = match self.signatures.get(signature_id)? {
            Some(s) => s,
            None => return Err(deny("does not exist")),
        };
        if !signature.is_valid() {
            return Err(deny("is revoked"));
        }
        if signature.meaning != SignatureMeaning::Rollback {
            return Err(deny("was not given for a rollback"));
        }
        if signature.user_id != user_id {
            return Err(deny("belongs to another user"));
        }
        if signature.target_record_id != head_record_id {
            return Err(deny("does not sign the current version"));
        }
        let age = self.recorder.clock().now() - signature.signed_at_utc;
        if age > max_age {
            return Err(deny("is too old"));
        }
        if !self.verify_signature(signature_id)? {
            return Err(deny("no longer matches its record"));
        }
        Ok(signature)
    }
}
