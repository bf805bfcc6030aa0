//! Trust state of each chain.
//!
//! When verification finds a violation, the chain is marked under review.
//! Reads continue; the recorder refuses further writes with
//! `IntegrityViolation`.  Only the earliest violation is kept, and nothing in
//! the ledger clears the mark.

use std::{collections::HashMap, sync::RwLock};

use chrono::{DateTime, Utc};
use tracing::warn;

use ledger_contracts::{
    audit::AuditRecord,
    entity::EntityKey,
    error::{LedgerError, LedgerResult},
    verify::{ChainStatus, VerificationResult},
};

use crate::chain::verify_chain;

#[derive(Debug, Default)]
pub struct ReviewRegistry {
    chains: RwLock<HashMap<EntityKey, ChainStatus>>,
}

impl ReviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, key: &EntityKey) -> ChainStatus {
        self.chains
            .read()
            .ok()
            .and_then(|chains| chains.get(key).cloned())
            .unwrap_or(ChainStatus::Trusted)
    }

    /// Mark `key` as under review from `version` onward.
    ///
    /// A later finding at a higher version does not move the mark forward.
    pub fn mark_under_review(&self, key: &EntityKey, version: u64, at: DateTime<Utc>) {
        let Ok(mut chains) = self.chains.write() else {
            return;
        };
        let entry = chains.entry(key.clone()).or_insert(ChainStatus::Trusted);
        let earlier = match entry {
            ChainStatus::UnderReview { since_version, .. } => version < *since_version,
            ChainStatus::Trusted => true,
        };
        if earlier {
            warn!(key = %key, since_version = version, "chain placed under review");
            *entry = ChainStatus::UnderReview {
                since_version: version,
                detected_at: at,
            };
        }
    }

    /// Fail with `IntegrityViolation` if `key` is under review.
    pub fn ensure_trusted(&self, key: &EntityKey) -> LedgerResult<()> {
        match self.status(key) {
            ChainStatus::Trusted => Ok(()),
            ChainStatus::UnderReview { since_version, .. } => Err(LedgerError::IntegrityViolation {
                key: key.clone(),
                version: since_version,
                reason: "chain is under compliance review; writes are frozen".to_string(),
            }),
        }
    }

    /// Every chain currently under review, sorted by key.
    pub fn under_review(&self) -> Vec<(EntityKey, ChainStatus)> {
        let mut chains: Vec<_> = self
            .chains
            .read()
            .map(|chains| {
                chains
                    .iter()
                    .filter(|(_, status)| matches!(status, ChainStatus::UnderReview { .. }))
                    .map(|(k, s)| (k.clone(), s.clone()))
                    .collect()
            })
            .unwrap_or_default();
        chains.sort_by(|a, b| a.0.cmp(&b.0));
        chains
    }

    /// Verify `records` as the full chain of `key`.  A violation places the
    /// chain under review from the first offending version.
    pub fn verify_and_flag(
        &self,
        key: &EntityKey,
        records: &[AuditRecord],
        at: DateTime<Utc>,
    ) -> LedgerResult<VerificationResult> {
        let result = verify_chain(records)?;
        if let Some(version) = result.first_violation_version {
            self.mark_under_review(key, version, at);
        }
        Ok(result)
    }

    /// Like `verify_and_flag`, but a violation is returned as
    /// `IntegrityViolation`.
    pub fn require_intact(
        &self,
        key: &EntityKey,
        records: &[AuditRecord],
        at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        match self.verify_and_flag(key, records, at)?.first_violation_version {
            None => Ok(()),
            Some(version) => Err(LedgerError::IntegrityViolation {
                key: key.clone(),
                version,
                reason: "stored record no longer reproduces its hash".to_string(),
            }),
        }
    }
}
