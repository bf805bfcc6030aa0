//! Chain verification results and global checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityKey;

/// Outcome of re-hashing a range of one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub ok: bool,
    /// First version whose stored hash or linkage did not reproduce.
    pub first_violation_version: Option<u64>,
    /// Number of records inspected before stopping.
    pub records_checked: u64,
}

impl VerificationResult {
    pub fn intact(records_checked: u64) -> Self {
        Self {
            ok: true,
            first_violation_version: None,
            records_checked,
        }
    }

    pub fn violated(version: u64, records_checked: u64) -> Self {
        Self {
            ok: false,
            first_violation_version: Some(version),
            records_checked,
        }
    }
}

/// Trust state of one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainStatus {
    Trusted,
    /// An integrity violation was detected.  Reads continue; writes are
    /// refused until compliance review concludes.
    UnderReview {
        since_version: u64,
        detected_at: DateTime<Utc>,
    },
}

/// The tail of one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub key: EntityKey,
    pub version: u64,
    pub record_id: u64,
    pub entry_hash: String,
}

/// Periodic cross-chain commitment over every chain head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    /// 1-based position in the checkpoint sequence.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    /// Sorted by key.
    pub heads: Vec<ChainHead>,
    pub previous_hash: String,
    pub checkpoint_hash: String,
}
