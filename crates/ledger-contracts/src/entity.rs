//! Polymorphic references from the ledger into business entities.
//!
//! The ledger never owns or dereferences a business entity.  It only holds
//! the `(entity_type, entity_id)` pair, which doubles as the key of the
//! entity's hash chain.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Weak reference to one business entity, e.g. `("work_orders", 42)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// Discriminator naming the owning table or module.
    pub entity_type: String,
    /// Positive identifier within that type.
    pub entity_id: u64,
}

impl EntityKey {
    /// Build a key without validation.  Use [`EntityKey::parse`] at ingestion
    /// boundaries.
    pub fn new(entity_type: impl Into<String>, entity_id: u64) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
        }
    }

    /// Build a key and validate its shape.
    pub fn parse(entity_type: &str, entity_id: u64) -> LedgerResult<Self> {
        let key = Self::new(entity_type.trim(), entity_id);
        key.validate()?;
        Ok(key)
    }

    /// Check that the type is a non-empty identifier and the id is positive.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.entity_type.is_empty() {
            return Err(LedgerError::validation("entity type must not be empty"));
        }
        if !self
            .entity_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(LedgerError::validation(format!(
                "entity type '{}' contains characters outside [A-Za-z0-9_.-]",
                self.entity_type
            )));
        }
        if self.entity_id == 0 {
            return Err(LedgerError::validation(format!(
                "entity id for '{}' must be positive",
                self.entity_type
            )));
        }
        Ok(())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.entity_id)
    }
}

/// Entity type under which signature lifecycle records are chained.
pub const SIGNATURE_ENTITY_TYPE: &str = "digital_signatures";

/// Entity type under which role grant changes are chained.
pub const ROLE_GRANT_ENTITY_TYPE: &str = "role_permissions";

/// Entity type under which user override changes are chained.
pub const USER_OVERRIDE_ENTITY_TYPE: &str = "user_permissions";
