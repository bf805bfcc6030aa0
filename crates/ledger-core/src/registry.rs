//! Registration of business entity types.
//!
//! Each business module registers the entity types it owns, whether they are
//! regulated (rollback requires a fresh signature), and optionally a lookup
//! that tells the ledger whether an id exists.  The ledger never dereferences
//! the entity itself.

use std::{collections::HashMap, fmt, sync::Arc};

use tracing::debug;

use ledger_contracts::{
    entity::EntityKey,
    error::{LedgerError, LedgerResult},
};

/// Existence lookup supplied by the owning module.
pub type EntityLookup = Arc<dyn Fn(u64) -> bool + Send + Sync>;

/// One registered entity type.
#[derive(Clone)]
pub struct EntityRegistration {
    pub entity_type: String,
    pub label: String,
    pub regulated: bool,
    pub lookup: Option<EntityLookup>,
}

impl EntityRegistration {
    pub fn regulated(entity_type: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            label: label.into(),
            regulated: true,
            lookup: None,
        }
    }

    pub fn unregulated(entity_type: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            regulated: false,
            ..Self::regulated(entity_type, label)
        }
    }

    pub fn with_lookup(mut self, lookup: impl Fn(u64) -> bool + Send + Sync + 'static) -> Self {
        self.lookup = Some(Arc::new(lookup));
        self
    }
}

impl fmt::Debug for EntityRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistration")
            .field("entity_type", &self.entity_type)
            .field("label", &self.label)
            .field("regulated", &self.regulated)
            .field("lookup", &self.lookup.is_some())
            .finish()
    }
}

/// Immutable after construction; built once at process start.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entries: HashMap<String, EntityRegistration>,
    strict: bool,
}

impl EntityRegistry {
    /// In strict mode, keys whose type was never registered are rejected.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn register(mut self, registration: EntityRegistration) -> Self {
        debug!(
            entity_type = %registration.entity_type,
            regulated = registration.regulated,
            "entity type registered"
        );
        self.entries
            .insert(registration.entity_type.clone(), registration);
        self
    }

    pub fn get(&self, entity_type: &str) -> Option<&EntityRegistration> {
        self.entries.get(entity_type)
    }

    /// Unregistered types are treated as regulated.
    pub fn is_regulated(&self, entity_type: &str) -> bool {
        self.get(entity_type).map_or(true, |r| r.regulated)
    }

    /// Validate that `key` refers to an entity the ledger may record.
    pub fn check(&self, key: &EntityKey) -> LedgerResult<()> {
        match self.get(&key.entity_type) {
            Some(registration) => match &registration.lookup {
                Some(lookup) if !lookup(key.entity_id) => Err(LedgerError::validation(format!(
                    "{} {} does not exist in its owning module",
                    registration.label, key.entity_id
                ))),
                _ => Ok(()),
            },
            None if self.strict => Err(LedgerError::validation(format!(
                "entity type '{}' is not registered",
                key.entity_type
            ))),
            None => Ok(()),
        }
    }
}
