//! Global checkpoints over every chain head.
//!
//! A checkpoint commits to a sorted snapshot of all chain heads and to the
//! previous checkpoint, giving cross-entity tamper evidence on top of the
//! independent per-entity chains.  Checkpoint writing is single-writer and
//! only reads chain heads, so entity writes never wait on it.
//!
//! Hash input layout (bytes, in order):
//!   1. previous_hash as UTF-8 bytes
//!   2. sequence as 8-byte little-endian
//!   3. created_at as RFC 3339 with nanoseconds
//!   4. canonical JSON of the sorted heads

use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use ledger_contracts::{
    entity::EntityKey,
    error::{LedgerError, LedgerResult},
    verify::{ChainHead, Checkpoint},
};
use ledger_core::traits::{AuditStore, Clock};

use crate::chain::GENESIS_HASH;

/// Compute the hash of a checkpoint from its parts.
pub fn hash_checkpoint(
    previous_hash: &str,
    sequence: u64,
    created_at: DateTime<Utc>,
    heads: &[ChainHead],
) -> LedgerResult<String> {
    let heads_json = serde_json::to_vec(heads).map_err(|e| LedgerError::Storage {
        reason: format!("failed to encode checkpoint heads: {e}"),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(created_at.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
    hasher.update(&heads_json);

    Ok(hex::encode(hasher.finalize()))
}

/// Outcome of checking a checkpoint against the live store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointReport {
    pub sequence: u64,
    /// The checkpoint's own hash reproduces.
    pub hash_ok: bool,
    /// Chains whose committed head no longer matches the stored record.
    pub mismatched: Vec<EntityKey>,
}

impl CheckpointReport {
    pub fn ok(&self) -> bool {
        self.hash_ok && self.mismatched.is_empty()
    }
}

/// Single writer of global checkpoints.
pub struct CheckpointWriter {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl CheckpointWriter {
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Snapshot every chain head and append a new checkpoint.
    pub fn write(&self) -> LedgerResult<Checkpoint> {
        let _guard = self.write_lock.lock().map_err(|_| LedgerError::Storage {
            reason: "checkpoint writer lock poisoned".to_string(),
        })?;

        let previous = self.store.latest_checkpoint()?;
        let (sequence, previous_hash) = previous
            .map(|cp| (cp.sequence + 1, cp.checkpoint_hash))
            .unwrap_or((1, GENESIS_HASH.to_string()));

        let heads = self.store.heads()?;
        let created_at = self.clock.now();
        let checkpoint_hash = hash_checkpoint(&previous_hash, sequence, created_at, &heads)?;

        let checkpoint = Checkpoint {
            id: Uuid::new_v4(),
            sequence,
            created_at,
            heads,
            previous_hash,
            checkpoint_hash,
        };
        self.store.append_checkpoint(checkpoint.clone())?;

        info!(
            sequence,
            chains = checkpoint.heads.len(),
            checkpoint_hash = %checkpoint.checkpoint_hash,
            "global checkpoint written"
        );
        Ok(checkpoint)
    }

    /// Check a checkpoint's hash and that every committed head still matches
    /// the stored record.  Purged chains are skipped.
    pub fn verify(&self, checkpoint: &Checkpoint) -> LedgerResult<CheckpointReport> {
        let recomputed = hash_checkpoint(
            &checkpoint.previous_hash,
            checkpoint.sequence,
            checkpoint.created_at,
            &checkpoint.heads,
        )?;

        let mut mismatched = Vec::new();
        for head in &checkpoint.heads {
            if self.store.is_purged(&head.key)? {
                continue;
            }
            let history = self.store.history(&head.key)?;
            let matches = history
                .get((head.version as usize).wrapping_sub(1))
                .is_some_and(|r| r.change_version == head.version && r.entry_hash == head.entry_hash);
            if !matches {
                warn!(key = %head.key, version = head.version, "checkpoint head mismatch");
                mismatched.push(head.key.clone());
            }
        }

        Ok(CheckpointReport {
            sequence: checkpoint.sequence,
            hash_ok: recomputed == checkpoint.checkpoint_hash,
            mismatched,
        })
    }

    /// Verify the most recent checkpoint, if there is one.
    pub fn verify_latest(&self) -> LedgerResult<Option<CheckpointReport>> {
        match self.store.latest_checkpoint()? {
            Some(checkpoint) => self.verify(&checkpoint).map(Some),
            None => Ok(None),
        }
    }
}
