//! In-memory `SignatureStore`.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
};

use chrono::{DateTime, Utc};

use ledger_contracts::{
    error::{LedgerError, LedgerResult},
    signature::{SignatureEvent, SignatureStatus},
};
use ledger_core::traits::SignatureStore;

#[derive(Debug, Default)]
pub struct InMemorySignatureStore {
    events: Mutex<BTreeMap<u64, SignatureEvent>>,
    last_id: AtomicU64,
}

impl InMemorySignatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn events(&self) -> LedgerResult<MutexGuard<'_, BTreeMap<u64, SignatureEvent>>> {
        self.events.lock().map_err(|_| LedgerError::Storage {
            reason: "signature store lock poisoned".to_string(),
        })
    }
}

impl SignatureStore for InMemorySignatureStore {
    fn next_id(&self) -> LedgerResult<u64> {
        Ok(self.last_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn insert(&self, event: SignatureEvent) -> LedgerResult<()> {
        let mut events = self.events()?;
        if events.contains_key(&event.id) {
            return Err(LedgerError::Storage {
                reason: format!("signature {} already stored", event.id),
            });
        }
        events.insert(event.id, event);
        Ok(())
    }

    fn get(&self, id: u64) -> LedgerResult<Option<SignatureEvent>> {
        Ok(self.events()?.get(&id).cloned())
    }

    fn mark_revoked(
        &self,
        id: u64,
        revoked_at: DateTime<Utc>,
        reason: &str,
    ) -> LedgerResult<SignatureEvent> {
        let mut events = self.events()?;
        let event = events.get_mut(&id).ok_or_else(|| LedgerError::NotFound {
            what: format!("signature {id}"),
        })?;
        if event.status == SignatureStatus::Revoked {
            return Err(LedgerError::validation(format!(
                "signature {id} is already revoked"
            )));
        }
        event.status = SignatureStatus::Revoked;
        event.revoked_at_utc = Some(revoked_at);
        event.revocation_reason = Some(reason.to_string());
        Ok(event.clone())
    }

    fn for_record(&self, record_id: u64) -> LedgerResult<Vec<SignatureEvent>> {
        Ok(self
            .events()?
            .values()
            .filter(|e| e.target_record_id == record_id)
            .cloned()
            .collect())
    }
}
