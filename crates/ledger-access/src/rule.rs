//! Access configuration schema.
//!
//! An `AccessConfig` is deserialized from TOML and holds role grants, the
//! roles each user holds, and user-specific overrides (including
//! delegations).  Timestamps are RFC 3339 strings.
//!
//! Example:
//! ```toml
//! [[grants]]
//! id = 1
//! role = "maintenance_lead"
//! table = "work_orders"
//! permissions = ["read", "write", "view-history", "sign", "rollback"]
//!
//! [[user_roles]]
//! user_id = 7
//! roles = ["maintenance_lead"]
//!
//! [[overrides]]
//! id = 1
//! user_id = 7
//! table = "work_orders"
//! field = "cost"
//! permission = "write"
//! effect = "deny"
//! expires_at = "2026-12-31T00:00:00Z"
//! ```

use serde::{Deserialize, Serialize};

use ledger_contracts::access::{AccessGrant, AccessOverride, ANY};

/// Roles held by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoles {
    pub user_id: u64,
    pub roles: Vec<String>,
}

/// The top-level access document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub grants: Vec<AccessGrant>,
    #[serde(default)]
    pub user_roles: Vec<UserRoles>,
    #[serde(default)]
    pub overrides: Vec<AccessOverride>,
}

impl AccessConfig {
    pub fn roles_of(&self, user_id: u64) -> impl Iterator<Item = &str> {
        self.user_roles
            .iter()
            .filter(move |ur| ur.user_id == user_id)
            .flat_map(|ur| ur.roles.iter().map(String::as_str))
    }
}

/// `"*"` matches anything; otherwise exact, case-sensitive.
pub fn pattern_matches(pattern: &str, value: &str) -> bool {
    pattern == ANY || pattern == value
}

/// True if a grant or override scoped to `(table, field)` applies to a query
/// on `(query_table, query_field)`.
///
/// A field-specific entry never applies to a whole-table query
/// (`query_field == "*"`).
pub fn scope_matches(table: &str, field: &str, query_table: &str, query_field: &str) -> bool {
    pattern_matches(table, query_table) && pattern_matches(field, query_field)
}
