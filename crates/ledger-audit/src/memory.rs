//! In-memory implementation of `AuditStore`.
//!
//! `InMemoryAuditStore` is the reference implementation of the `AuditStore`
//! trait.  Each chain lives behind its own `Mutex`, so appends to different
//! entities proceed in parallel while appends to the same entity are
//! serialized through the compare-and-swap check in `append()`.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, RwLock,
    },
};

use tracing::{debug, info};

use ledger_contracts::{
    audit::AuditRecord,
    entity::EntityKey,
    error::{LedgerError, LedgerResult},
    verify::{ChainHead, Checkpoint},
};
use ledger_core::traits::AuditStore;

use crate::chain::GENESIS_HASH;

/// Records of one chain, in version order.
pub(crate) type Chain = Arc<Mutex<Vec<AuditRecord>>>;

/// An in-memory, append-only audit store.
///
/// # Thread safety
///
/// The chain map is behind an `RwLock` that is only write-locked to create a
/// new chain or purge one.  Record appends take the write lock of a single
/// chain's `Mutex`.
#[derive(Default)]
pub struct InMemoryAuditStore {
    pub(crate) chains: RwLock<HashMap<EntityKey, Chain>>,
    /// record id -> (key, version)
    index: RwLock<HashMap<u64, (EntityKey, u64)>>,
    purged: RwLock<HashSet<EntityKey>>,
    checkpoints: Mutex<Vec<Checkpoint>>,
    last_id: AtomicU64,
}

fn poisoned(what: &str) -> LedgerError {
    LedgerError::Storage {
        reason: format!("{what} lock poisoned"),
    }
}

fn lock_chain(chain: &Chain) -> LedgerResult<MutexGuard<'_, Vec<AuditRecord>>> {
    chain.lock().map_err(|_| poisoned("chain"))
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn chain(&self, key: &EntityKey) -> LedgerResult<Option<Chain>> {
        let chains = self.chains.read().map_err(|_| poisoned("chain map"))?;
        Ok(chains.get(key).cloned())
    }

    fn chain_or_create(&self, key: &EntityKey) -> LedgerResult<Chain> {
        if let Some(chain) = self.chain(key)? {
            return Ok(chain);
        }
        let mut chains = self.chains.write().map_err(|_| poisoned("chain map"))?;
        Ok(chains.entry(key.clone()).or_default().clone())
    }

    fn head_of(key: &EntityKey, records: &[AuditRecord]) -> Option<ChainHead> {
        records.last().map(|r| ChainHead {
            key: key.clone(),
            version: r.change_version,
            record_id: r.id,
            entry_hash: r.entry_hash.clone(),
        })
    }

    /// Total number of records across all chains.
    pub fn record_count(&self) -> usize {
        self.index.read().map(|index| index.len()).unwrap_or(0)
    }
}

impl AuditStore for InMemoryAuditStore {
    fn head(&self, key: &EntityKey) -> LedgerResult<Option<ChainHead>> {
        match self.chain(key)? {
            Some(chain) => Ok(Self::head_of(key, &lock_chain(&chain)?)),
            None => Ok(None),
        }
    }

    /// Compare-and-swap append.
    ///
    /// Under the chain's lock, checks that the candidate's version and
    /// `previous_hash` extend the current tail, assigns the next record id,
    /// and pushes.  On any mismatch nothing is written.
    fn append(&self, mut record: AuditRecord) -> LedgerResult<AuditRecord> {
        if self.is_purged(&record.key)? {
            return Err(LedgerError::validation(format!(
                "{} has been purged and accepts no new records",
                record.key
            )));
        }

        let chain = self.chain_or_create(&record.key)?;
        let mut records = lock_chain(&chain)?;

        let (current_version, current_hash) = records
            .last()
            .map(|r| (r.change_version, r.entry_hash.as_str()))
            .unwrap_or((0, GENESIS_HASH));

        if record.change_version != current_version + 1 || record.previous_hash != current_hash {
            debug!(
                key = %record.key,
                candidate_version = record.change_version,
                current_version,
                "append rejected by compare-and-swap"
            );
            return Err(LedgerError::VersionConflict {
                key: record.key.clone(),
                expected: record.change_version.saturating_sub(1),
                actual: current_version,
            });
        }

        record.id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.index
            .write()
            .map_err(|_| poisoned("record index"))?
            .insert(record.id, (record.key.clone(), record.change_version));
        records.push(record.clone());

        Ok(record)
    }

    fn history(&self, key: &EntityKey) -> LedgerResult<Vec<AuditRecord>> {
        match self.chain(key)? {
            Some(chain) => Ok(lock_chain(&chain)?.clone()),
            None => Ok(Vec::new()),
        }
    }

    fn record(&self, id: u64) -> LedgerResult<Option<AuditRecord>> {
        let location = self
            .index
            .read()
            .map_err(|_| poisoned("record index"))?
            .get(&id)
            .cloned();
        let Some((key, version)) = location else {
            return Ok(None);
        };
        let Some(chain) = self.chain(&key)? else {
            return Ok(None);
        };
        let records = lock_chain(&chain)?;
        Ok(records.get((version - 1) as usize).cloned())
    }

    fn heads(&self) -> LedgerResult<Vec<ChainHead>> {
        let snapshot: Vec<(EntityKey, Chain)> = self
            .chains
            .read()
            .map_err(|_| poisoned("chain map"))?
            .iter()
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect();

        let mut heads = Vec::with_capacity(snapshot.len());
        for (key, chain) in snapshot {
            if let Some(head) = Self::head_of(&key, &lock_chain(&chain)?) {
                heads.push(head);
            }
        }
        heads.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(heads)
    }

    fn purge(&self, key: &EntityKey) -> LedgerResult<usize> {
        let removed = self
            .chains
            .write()
            .map_err(|_| poisoned("chain map"))?
            .remove(key);
        self.purged
            .write()
            .map_err(|_| poisoned("purge set"))?
            .insert(key.clone());

        let count = match removed {
            Some(chain) => {
                let records = lock_chain(&chain)?;
                let mut index = self.index.write().map_err(|_| poisoned("record index"))?;
                for record in records.iter() {
                    index.remove(&record.id);
                }
                records.len()
            }
            None => 0,
        };

        info!(key = %key, records = count, "chain purged");
        Ok(count)
    }

    fn is_purged(&self, key: &EntityKey) -> LedgerResult<bool> {
        Ok(self
            .purged
            .read()
            .map_err(|_| poisoned("purge set"))?
            .contains(key))
    }

    fn append_checkpoint(&self, checkpoint: Checkpoint) -> LedgerResult<()> {
        let mut checkpoints = self.checkpoints.lock().map_err(|_| poisoned("checkpoint"))?;
        let expected = checkpoints.len() as u64 + 1;
        if checkpoint.sequence != expected {
            return Err(LedgerError::Storage {
                reason: format!(
                    "checkpoint sequence {} does not follow {}",
                    checkpoint.sequence,
                    expected - 1
                ),
            });
        }
        checkpoints.push(checkpoint);
        Ok(())
    }

    fn latest_checkpoint(&self) -> LedgerResult<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .lock()
            .map_err(|_| poisoned("checkpoint"))?
            .last()
            .cloned())
    }
}
