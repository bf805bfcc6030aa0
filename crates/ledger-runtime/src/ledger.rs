//! The ledger service facade.
//!
//! `Ledger` is the single entry point collaborators use.  It is built once at
//! process start by `LedgerBuilder::open`, which verifies the most recent
//! global checkpoint, and shut down by `Ledger::close`, which writes a final
//! one.  Instances are passed explicitly; there is no global ledger.
//!
//! Every operation that detects tampering places the chain under review and
//! raises an `IntegrityAlert` before returning.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use ledger_access::{AccessOverlay, PermissionCache};
use ledger_audit::{
    verify_range, CheckpointReport, CheckpointWriter, EventRecorder, InMemoryAuditStore,
    ReviewRegistry,
};
use ledger_contracts::{
    access::{AccessGrant, AccessOverride, Effect, Permission, PermissionSet, ANY},
    audit::{AuditAction, AuditRecord, AuditRow},
    entity::{EntityKey, ROLE_GRANT_ENTITY_TYPE, SIGNATURE_ENTITY_TYPE, USER_OVERRIDE_ENTITY_TYPE},
    error::{LedgerError, LedgerResult},
    forensic::ForensicContext,
    mutation::{FieldDiff, MutationEvent},
    retention::LifecycleState,
    signature::{SignatureEvent, SignatureRequest},
    verify::{ChainStatus, Checkpoint, VerificationResult},
};
use ledger_core::{
    alert::{IntegrityAlert, TracingAlertSink},
    clock::SystemClock,
    registry::{EntityRegistration, EntityRegistry},
    traits::{AlertSink, AuditStore, Clock, CredentialVerifier, SignatureStore},
};
use ledger_history::{
    EntityState, PurgeReceipt, RetentionManager, RollbackManager, RollbackRequest,
};
use ledger_signature::{InMemorySignatureStore, MethodVerifier, SignatureService, TimeoutVerifier};

use crate::config::LedgerConfig;

/// Entity type used in errors about the checkpoint sequence itself.
const CHECKPOINT_ENTITY_TYPE: &str = "ledger_checkpoints";

// ── Builder ──────────────────────────────────────────────────────────────────

/// Wires collaborators into a `Ledger`.
///
/// Anything not supplied falls back to the in-memory store, the system
/// clock, the tracing alert sink, and a verifier that rejects every
/// credential.
pub struct LedgerBuilder {
    config: LedgerConfig,
    store: Option<Arc<dyn AuditStore>>,
    signature_store: Option<Arc<dyn SignatureStore>>,
    verifier: Option<Arc<dyn CredentialVerifier>>,
    clock: Option<Arc<dyn Clock>>,
    alerts: Option<Arc<dyn AlertSink>>,
    registrations: Vec<EntityRegistration>,
}

impl LedgerBuilder {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            store: None,
            signature_store: None,
            verifier: None,
            clock: None,
            alerts: None,
            registrations: Vec::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_signature_store(mut self, store: Arc<dyn SignatureStore>) -> Self {
        self.signature_store = Some(store);
        self
    }

    /// The verifier is wrapped in a `TimeoutVerifier` using
    /// `signature.verifier_timeout_ms`.
    pub fn with_verifier(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Register an entity type in addition to the `[[entities]]` entries,
    /// typically to attach an existence lookup.
    pub fn register(mut self, registration: EntityRegistration) -> Self {
        self.registrations.push(registration);
        self
    }

    /// Build the ledger and verify the most recent checkpoint.
    ///
    /// # Errors
    ///
    /// `IntegrityViolation` if the latest checkpoint no longer matches the
    /// store.  An alert is raised for every mismatched chain.
    pub fn open(self) -> LedgerResult<Ledger> {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryAuditStore::new()));
        let signature_store = self
            .signature_store
            .unwrap_or_else(|| Arc::new(InMemorySignatureStore::new()));
        let verifier = self
            .verifier
            .unwrap_or_else(|| Arc::new(MethodVerifier::new()));
        let alerts = self
            .alerts
            .unwrap_or_else(|| Arc::new(TracingAlertSink));

        let mut registry = EntityRegistry::default()
            .strict(config.ledger.strict_entity_types)
            .register(EntityRegistration::unregulated(
                SIGNATURE_ENTITY_TYPE,
                "Digital signature",
            ))
            .register(EntityRegistration::unregulated(
                ROLE_GRANT_ENTITY_TYPE,
                "Role permission",
            ))
            .register(EntityRegistration::unregulated(
                USER_OVERRIDE_ENTITY_TYPE,
                "User permission",
            ));
        for entry in &config.entities {
            registry = registry.register(entry.into());
        }
        for registration in self.registrations {
            registry = registry.register(registration);
        }

        let recorder = Arc::new(EventRecorder::new(
            store.clone(),
            clock.clone(),
            Arc::new(registry),
            Arc::new(ReviewRegistry::new()),
        ));
        let access = Arc::new(AccessOverlay::new(config.access.clone(), clock.clone()));
        let signatures = Arc::new(SignatureService::new(
            recorder.clone(),
            signature_store,
            Arc::new(TimeoutVerifier::new(verifier, config.verifier_timeout())),
        ));
        let rollback = RollbackManager::new(
            recorder.clone(),
            signatures.clone(),
            access.clone(),
            config.rollback_signature_max_age()?,
        );
        let retention = RetentionManager::new(
            recorder.clone(),
            access.clone(),
            config.retention.clone(),
        );
        let checkpoints = CheckpointWriter::new(store, clock);

        let ledger = Ledger {
            config,
            recorder,
            access,
            signatures,
            rollback,
            retention,
            checkpoints,
            alerts,
            admin: Mutex::new(()),
        };

        if let Some(report) = ledger.verify_checkpoint()? {
            if !report.ok() {
                let key = report.mismatched.first().cloned().unwrap_or_else(|| {
                    EntityKey::new(CHECKPOINT_ENTITY_TYPE, report.sequence)
                });
                let version = match ledger.recorder.reviews().status(&key) {
                    ChainStatus::UnderReview { since_version, .. } => since_version,
                    ChainStatus::Trusted => 0,
                };
                return Err(LedgerError::IntegrityViolation {
                    key,
                    version,
                    reason: format!(
                        "checkpoint {} does not match the store ({} chain(s) diverged)",
                        report.sequence,
                        report.mismatched.len()
                    ),
                });
            }
        }

        info!(
            strict = ledger.config.ledger.strict_entity_types,
            retention_policies = ledger.config.retention.len(),
            "ledger opened"
        );
        Ok(ledger)
    }
}

// ── Export ───────────────────────────────────────────────────────────────────

/// Target format requested by the report generator.  The ledger records the
/// request; rendering happens outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Csv,
    Pdf,
    Json,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Json => "json",
        }
    }
}

/// A verified history handed to a report generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryExport {
    pub key: EntityKey,
    pub format: ExportFormat,
    /// Rows as they stood before the export was recorded.
    pub rows: Vec<AuditRow>,
    pub verification: VerificationResult,
    /// The EXPORT record appended for this request.
    pub export_record: AuditRecord,
}

// ── Ledger ───────────────────────────────────────────────────────────────────

pub struct Ledger {
    config: LedgerConfig,
    recorder: Arc<EventRecorder>,
    access: Arc<AccessOverlay>,
    signatures: Arc<SignatureService>,
    rollback: RollbackManager,
    retention: RetentionManager,
    checkpoints: CheckpointWriter,
    alerts: Arc<dyn AlertSink>,
    /// Serializes permission administration.
    admin: Mutex<()>,
}

impl Ledger {
    pub fn builder(config: LedgerConfig) -> LedgerBuilder {
        LedgerBuilder::new(config)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn store(&self) -> &Arc<dyn AuditStore> {
        self.recorder.store()
    }

    fn raise(&self, key: Option<&EntityKey>, version: Option<u64>, detail: impl Into<String>) {
        self.alerts.raise(&IntegrityAlert {
            key: key.cloned(),
            first_violation_version: version,
            detected_at: self.recorder.clock().now(),
            detail: detail.into(),
        });
    }

    /// Verify a full chain, flagging and alerting on a violation.
    fn check_chain(&self, key: &EntityKey, records: &[AuditRecord]) -> LedgerResult<VerificationResult> {
        let now = self.recorder.clock().now();
        let result = self.recorder.reviews().verify_and_flag(key, records, now)?;
        if let Some(version) = result.first_violation_version {
            self.raise(
                Some(key),
                Some(version),
                "stored record no longer reproduces its hash",
            );
        }
        Ok(result)
    }

    /// The history of `key`, guaranteed intact.
    fn verified_history(&self, key: &EntityKey) -> LedgerResult<(Vec<AuditRecord>, VerificationResult)> {
        let history = self.store().history(key)?;
        let result = self.check_chain(key, &history)?;
        match result.first_violation_version {
            None => Ok((history, result)),
            Some(version) => Err(LedgerError::IntegrityViolation {
                key: key.clone(),
                version,
                reason: "chain failed verification".to_string(),
            }),
        }
    }

    fn acting_user(forensic: &ForensicContext, operation: &str) -> LedgerResult<u64> {
        forensic
            .actor
            .user_id()
            .ok_or_else(|| LedgerError::validation(format!("{operation} must be requested by a user")))
    }

    // ── Recording and reads ──────────────────────────────────────────────────

    /// Record a business mutation.
    pub fn record(&self, event: MutationEvent) -> LedgerResult<AuditRecord> {
        self.recorder.record(event)
    }

    /// Every record for `key` in version order.  Chains under review stay
    /// readable.
    pub fn get_history(&self, key: &EntityKey) -> LedgerResult<Vec<AuditRecord>> {
        self.store().history(key)
    }

    /// The history in persisted row layout.
    pub fn history_rows(&self, key: &EntityKey) -> LedgerResult<Vec<AuditRow>> {
        Ok(self.get_history(key)?.iter().map(AuditRow::from).collect())
    }

    /// Re-hash versions `from..=to` of `key`.
    ///
    /// A violation is reported as `ok = false`, places the chain under
    /// review, and raises an alert.
    pub fn verify_chain(&self, key: &EntityKey, from: u64, to: u64) -> LedgerResult<VerificationResult> {
        let history = self.store().history(key)?;
        let result = verify_range(&history, from, to)?;
        if let Some(version) = result.first_violation_version {
            self.recorder
                .reviews()
                .mark_under_review(key, version, self.recorder.clock().now());
            self.raise(
                Some(key),
                Some(version),
                format!("verification of v{from}..=v{to} failed"),
            );
        }
        Ok(result)
    }

    /// Verify every version of `key`.  An empty chain is intact.
    pub fn verify_entity(&self, key: &EntityKey) -> LedgerResult<VerificationResult> {
        let history = self.store().history(key)?;
        self.check_chain(key, &history)
    }

    pub fn chain_status(&self, key: &EntityKey) -> ChainStatus {
        self.recorder.reviews().status(key)
    }

    pub fn under_review(&self) -> Vec<(EntityKey, ChainStatus)> {
        self.recorder.reviews().under_review()
    }

    // ── Signatures ───────────────────────────────────────────────────────────

    /// Sign a record.  The signer needs `sign` on the target's entity type,
    /// and the target's chain must verify.
    pub fn sign(&self, request: SignatureRequest) -> LedgerResult<SignatureEvent> {
        let target = self
            .store()
            .record(request.target_record_id)?
            .ok_or_else(|| LedgerError::NotFound {
                what: format!("audit record {}", request.target_record_id),
            })?;
        self.access
            .require(request.user_id, &target.key.entity_type, ANY, Permission::Sign)?;
        self.verified_history(&target.key)?;
        self.signatures.sign(request)
    }

    /// Revoke a signature.  Signers may revoke their own signatures; anyone
    /// else needs `approve` on the signed entity's type.
    pub fn revoke(
        &self,
        signature_id: u64,
        reason: &str,
        forensic: ForensicContext,
    ) -> LedgerResult<AuditRecord> {
        let user_id = Self::acting_user(&forensic, "signature revocation")?;
        let signature = self.signatures.get(signature_id)?;
        if signature.user_id != user_id {
            let target = self
                .store()
                .record(signature.target_record_id)?
                .ok_or_else(|| {
                    LedgerError::denied(format!(
                        "signature {signature_id} targets a purged record; only its signer may revoke it"
                    ))
                })?;
            self.access
                .require(user_id, &target.key.entity_type, ANY, Permission::Approve)?;
        }
        self.signatures.revoke(signature_id, reason, forensic)
    }

    pub fn signature(&self, signature_id: u64) -> LedgerResult<SignatureEvent> {
        self.signatures.get(signature_id)
    }

    pub fn verify_signature(&self, signature_id: u64) -> LedgerResult<bool> {
        self.signatures.verify_signature(signature_id)
    }

    pub fn signatures_for(&self, record_id: u64) -> LedgerResult<Vec<SignatureEvent>> {
        self.signatures.signatures_for(record_id)
    }

    // ── Versioning ───────────────────────────────────────────────────────────

    pub fn reconstruct(&self, key: &EntityKey, at_version: u64) -> LedgerResult<EntityState> {
        self.rollback.reconstruct(key, at_version)
    }

    pub fn rollback(&self, request: RollbackRequest) -> LedgerResult<AuditRecord> {
        self.verified_history(&request.key)?;
        self.rollback.rollback(request)
    }

    // ── Retention ────────────────────────────────────────────────────────────

    pub fn mark_deleted(
        &self,
        key: &EntityKey,
        reason_code: &str,
        forensic: ForensicContext,
    ) -> LedgerResult<AuditRecord> {
        self.retention.mark_deleted(key, reason_code, forensic)
    }

    pub fn lifecycle(&self, key: &EntityKey) -> LedgerResult<LifecycleState> {
        self.retention.lifecycle(key)
    }

    pub fn is_purge_eligible(&self, key: &EntityKey) -> LedgerResult<bool> {
        self.retention.is_purge_eligible(key)
    }

    pub fn purge(&self, key: &EntityKey, forensic: ForensicContext) -> LedgerResult<PurgeReceipt> {
        self.retention.purge(key, forensic)
    }

    // ── Access ───────────────────────────────────────────────────────────────

    pub fn effective(&self, user_id: u64, table: &str, field: &str) -> LedgerResult<PermissionSet> {
        self.access.effective(user_id, table, field)
    }

    /// A cache for one request.  Resolutions are pinned to the time the
    /// cache was created.
    pub fn permission_cache(&self) -> PermissionCache<'_> {
        PermissionCache::new(&self.access)
    }

    fn admin_lock(&self) -> LedgerResult<MutexGuard<'_, ()>> {
        self.admin.lock().map_err(|_| LedgerError::Storage {
            reason: "permission administration lock poisoned".to_string(),
        })
    }

    /// Users need `approve` on the permission table; system provisioning
    /// jobs are accepted.
    fn require_admin(&self, forensic: &ForensicContext, table: &str) -> LedgerResult<()> {
        match forensic.actor.user_id() {
            Some(user_id) => self.access.require(user_id, table, ANY, Permission::Approve),
            None => Ok(()),
        }
    }

    /// Add a role grant and record it on `("role_permissions", id)`.
    pub fn add_grant(&self, grant: AccessGrant, forensic: ForensicContext) -> LedgerResult<AccessGrant> {
        let _guard = self.admin_lock()?;
        self.require_admin(&forensic, ROLE_GRANT_ENTITY_TYPE)?;
        let grant = self.access.prepare_grant(grant)?;

        let permissions: Vec<&str> = grant.permissions.iter().map(Permission::as_str).collect();
        let mut event = MutationEvent::new(
            EntityKey::new(ROLE_GRANT_ENTITY_TYPE, grant.id),
            AuditAction::Create,
            forensic,
        )
        .with_diff(FieldDiff::set("role", grant.role.as_str()))
        .with_diff(FieldDiff::set("table", grant.table.as_str()))
        .with_diff(FieldDiff::set("field", grant.field.as_str()))
        .with_diff(FieldDiff::set("permissions", permissions.join(",")));
        if let Some(expires_at) = grant.expires_at {
            event = event.with_diff(FieldDiff::set("expires_at", expires_at.to_rfc3339()));
        }
        self.recorder.record(event)?;

        self.access.add_grant(grant)
    }

    /// Add a user override or delegation and record it on
    /// `("user_permissions", id)`.
    pub fn add_override(
        &self,
        ov: AccessOverride,
        forensic: ForensicContext,
    ) -> LedgerResult<AccessOverride> {
        let _guard = self.admin_lock()?;
        self.require_admin(&forensic, USER_OVERRIDE_ENTITY_TYPE)?;
        let ov = self.access.prepare_override(ov)?;

        let effect = match ov.effect {
            Effect::Grant => "grant",
            Effect::Deny => "deny",
        };
        let mut event = MutationEvent::new(
            EntityKey::new(USER_OVERRIDE_ENTITY_TYPE, ov.id),
            AuditAction::Create,
            forensic,
        )
        .with_diff(FieldDiff::set("user_id", ov.user_id.to_string()))
        .with_diff(FieldDiff::set("table", ov.table.as_str()))
        .with_diff(FieldDiff::set("field", ov.field.as_str()))
        .with_diff(FieldDiff::set("permission", ov.permission.as_str()))
        .with_diff(FieldDiff::set("effect", effect));
        if let Some(delegator) = ov.delegated_by {
            event = event.with_diff(FieldDiff::set("delegated_by", delegator.to_string()));
        }
        if let Some(expires_at) = ov.expires_at {
            event = event.with_diff(FieldDiff::set("expires_at", expires_at.to_rfc3339()));
        }
        if let Some(reason) = &ov.reason {
            event = event.with_reason(reason.as_str());
        }
        self.recorder.record(event)?;

        self.access.add_override(ov)
    }

    /// Revoke an override and record the change on its chain.
    pub fn revoke_override(
        &self,
        id: u64,
        reason: &str,
        forensic: ForensicContext,
    ) -> LedgerResult<AccessOverride> {
        let _guard = self.admin_lock()?;
        self.require_admin(&forensic, USER_OVERRIDE_ENTITY_TYPE)?;
        self.access.revocable_override(id)?;

        // Overrides provisioned from configuration have no chain yet.
        let key = EntityKey::new(USER_OVERRIDE_ENTITY_TYPE, id);
        let action = match self.store().head(&key)? {
            Some(_) => AuditAction::Update,
            None => AuditAction::Create,
        };
        let event = MutationEvent::new(key, action, forensic)
        .with_diff(FieldDiff::new("is_revoked", Some("false"), Some("true")))
        .with_reason(reason);
        self.recorder.record(event)?;

        self.access.revoke_override(id)
    }

    // ── Export ───────────────────────────────────────────────────────────────

    /// Hand a verified history to a report generator and record the export
    /// on the entity's chain.  Soft-deleted entities can be exported.
    pub fn export_history(
        &self,
        key: &EntityKey,
        format: ExportFormat,
        forensic: ForensicContext,
    ) -> LedgerResult<HistoryExport> {
        let user_id = Self::acting_user(&forensic, "export")?;
        self.access
            .require(user_id, &key.entity_type, ANY, Permission::Export)?;

        let (history, verification) = self.verified_history(key)?;
        if history.is_empty() {
            return Err(LedgerError::NotFound {
                what: format!("history of {key}"),
            });
        }

        let event = MutationEvent::new(key.clone(), AuditAction::Export, forensic)
            .with_diff(FieldDiff::set("format", format.as_str()))
            .with_diff(FieldDiff::set("records", history.len().to_string()));
        let export_record = self.recorder.record(event)?;

        info!(key = %key, user_id, format = format.as_str(), records = history.len(), "history exported");
        Ok(HistoryExport {
            key: key.clone(),
            format,
            rows: history.iter().map(AuditRow::from).collect(),
            verification,
            export_record,
        })
    }

    // ── Checkpoints and lifecycle ────────────────────────────────────────────

    /// Write a global checkpoint over every chain head.
    pub fn checkpoint(&self) -> LedgerResult<Checkpoint> {
        self.checkpoints.write()
    }

    /// Verify the latest checkpoint.  Diverged chains are re-verified,
    /// placed under review, and alerted on.
    pub fn verify_checkpoint(&self) -> LedgerResult<Option<CheckpointReport>> {
        let Some(report) = self.checkpoints.verify_latest()? else {
            return Ok(None);
        };
        if report.ok() {
            return Ok(Some(report));
        }

        error!(
            sequence = report.sequence,
            hash_ok = report.hash_ok,
            mismatched = report.mismatched.len(),
            "checkpoint verification failed"
        );
        if !report.hash_ok {
            self.raise(
                None,
                None,
                format!("checkpoint {} no longer reproduces its hash", report.sequence),
            );
        }
        for key in &report.mismatched {
            let history = self.store().history(key)?;
            let result = self.check_chain(key, &history)?;
            if result.ok {
                // Internally consistent but not what was checkpointed: the
                // whole chain is suspect.
                self.recorder
                    .reviews()
                    .mark_under_review(key, 1, self.recorder.clock().now());
                self.raise(
                    Some(key),
                    Some(1),
                    format!("chain head diverged from checkpoint {}", report.sequence),
                );
            }
        }
        Ok(Some(report))
    }

    /// Shut down: write a final checkpoint and consume the ledger.
    pub fn close(self) -> LedgerResult<Checkpoint> {
        let checkpoint = self.checkpoints.write()?;
        info!(sequence = checkpoint.sequence, "ledger closed");
        Ok(checkpoint)
    }
}
