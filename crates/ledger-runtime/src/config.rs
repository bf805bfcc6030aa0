//! Ledger configuration.
//!
//! Example:
//! ```toml
//! [ledger]
//! strict_entity_types = true
//!
//! [signature]
//! verifier_timeout_ms = 3000
//! rollback_signature_max_age_secs = 900
//!
//! [[entities]]
//! entity_type = "work_orders"
//! label = "Work order"
//!
//! [[entities]]
//! entity_type = "shift_notes"
//! label = "Shift note"
//! regulated = false
//!
//! [[retention]]
//! entity_type = "work_orders"
//! min_retention_days = 3650
//!
//! [[access.grants]]
//! id = 1
//! role = "qa"
//! table = "*"
//! permissions = ["read", "approve", "export", "view-history"]
//! ```

use std::{collections::HashSet, path::Path, time::Duration as StdDuration};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use ledger_access::AccessConfig;
use ledger_contracts::{
    error::{LedgerError, LedgerResult},
    retention::RetentionPolicy,
};
use ledger_core::registry::EntityRegistration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSection {
    /// Reject entity types that were never registered.
    #[serde(default)]
    pub strict_entity_types: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSection {
    /// Deadline for one credential check.
    #[serde(default = "default_verifier_timeout_ms")]
    pub verifier_timeout_ms: u64,
    /// How old a rollback signature may be when the rollback is requested.
    #[serde(default = "default_rollback_signature_max_age_secs")]
    pub rollback_signature_max_age_secs: u64,
}

impl Default for SignatureSection {
    fn default() -> Self {
        Self {
            verifier_timeout_ms: default_verifier_timeout_ms(),
            rollback_signature_max_age_secs: default_rollback_signature_max_age_secs(),
        }
    }
}

fn default_verifier_timeout_ms() -> u64 {
    5_000
}

fn default_rollback_signature_max_age_secs() -> u64 {
    900
}

/// A rollback signature older than a day is never fresh.
const MAX_ROLLBACK_SIGNATURE_AGE_SECS: u64 = 86_400;

/// One `[[entities]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeConfig {
    pub entity_type: String,
    pub label: String,
    #[serde(default = "regulated_by_default")]
    pub regulated: bool,
}

fn regulated_by_default() -> bool {
    true
}

impl From<&EntityTypeConfig> for EntityRegistration {
    fn from(entry: &EntityTypeConfig) -> Self {
        if entry.regulated {
            EntityRegistration::regulated(&entry.entity_type, &entry.label)
        } else {
            EntityRegistration::unregulated(&entry.entity_type, &entry.label)
        }
    }
}

/// The top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub ledger: LedgerSection,
    #[serde(default)]
    pub signature: SignatureSection,
    #[serde(default)]
    pub entities: Vec<EntityTypeConfig>,
    #[serde(default)]
    pub retention: Vec<RetentionPolicy>,
    #[serde(default)]
    pub access: AccessConfig,
}

impl LedgerConfig {
    /// Parse and validate a configuration document.
    pub fn from_toml_str(s: &str) -> LedgerResult<Self> {
        let config: LedgerConfig = toml::from_str(s).map_err(|e| LedgerError::Config {
            reason: format!("failed to parse ledger TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> LedgerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| LedgerError::Config {
            reason: format!("failed to read ledger config '{}': {e}", path.display()),
        })?;
        Self::from_toml_str(&contents)
    }

    fn validate(&self) -> LedgerResult<()> {
        if self.signature.verifier_timeout_ms == 0 {
            return Err(LedgerError::Config {
                reason: "signature.verifier_timeout_ms must be positive".to_string(),
            });
        }
        let max_age = self.signature.rollback_signature_max_age_secs;
        if max_age == 0 || max_age > MAX_ROLLBACK_SIGNATURE_AGE_SECS {
            return Err(LedgerError::Config {
                reason: format!(
                    "signature.rollback_signature_max_age_secs must be within 1..={MAX_ROLLBACK_SIGNATURE_AGE_SECS}"
                ),
            });
        }
        let mut seen = HashSet::new();
        for policy in &self.retention {
            if !seen.insert(policy.entity_type.as_str()) {
                return Err(LedgerError::Config {
                    reason: format!(
                        "retention policy for '{}' is defined twice",
                        policy.entity_type
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn verifier_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.signature.verifier_timeout_ms)
    }

    pub fn rollback_signature_max_age(&self) -> LedgerResult<Duration> {
        let secs = self.signature.rollback_signature_max_age_secs;
        i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| LedgerError::Config {
                reason: format!("signature.rollback_signature_max_age_secs = {secs} is out of range"),
            })
    }
}
