//! Permission grants, overrides, and the effective permission set.
//!
//! Grants and overrides are deserialized from TOML by `ledger-access`.  Both
//! carry activity flags and an optional expiry; only currently active entries
//! take part in resolution.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wildcard accepted in the `table` and `field` columns of grants.
pub const ANY: &str = "*";

/// One right the overlay can resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    Read,
    Write,
    Approve,
    Export,
    ViewHistory,
    Sign,
    Rollback,
}

impl Permission {
    pub const ALL: [Permission; 7] = [
        Permission::Read,
        Permission::Write,
        Permission::Approve,
        Permission::Export,
        Permission::ViewHistory,
        Permission::Sign,
        Permission::Rollback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Approve => "approve",
            Permission::Export => "export",
            Permission::ViewHistory => "view-history",
            Permission::Sign => "sign",
            Permission::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effective rights of one user on one table field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub can_read: bool,
    pub can_write: bool,
    pub can_approve: bool,
    pub can_export: bool,
    pub can_view_history: bool,
    pub can_sign: bool,
    pub can_rollback: bool,
}

impl PermissionSet {
    pub fn allows(&self, permission: Permission) -> bool {
        match permission {
            Permission::Read => self.can_read,
            Permission::Write => self.can_write,
            Permission::Approve => self.can_approve,
            Permission::Export => self.can_export,
            Permission::ViewHistory => self.can_view_history,
            Permission::Sign => self.can_sign,
            Permission::Rollback => self.can_rollback,
        }
    }

    pub fn set(&mut self, permission: Permission, value: bool) {
        let slot = match permission {
            Permission::Read => &mut self.can_read,
            Permission::Write => &mut self.can_write,
            Permission::Approve => &mut self.can_approve,
            Permission::Export => &mut self.can_export,
            Permission::ViewHistory => &mut self.can_view_history,
            Permission::Sign => &mut self.can_sign,
            Permission::Rollback => &mut self.can_rollback,
        };
        *slot = value;
    }
}

/// Whether an override adds or removes a right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Effect {
    Grant,
    Deny,
}

/// Role-based grant of one or more permissions on a table field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub id: u64,
    pub role: String,
    /// Table name or `"*"`.
    pub table: String,
    /// Field name or `"*"` for the whole table.
    #[serde(default = "any")]
    pub field: String,
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "active")]
    pub is_active: bool,
    #[serde(default)]
    pub is_revoked: bool,
}

/// User-specific grant or denial, optionally delegated by another user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessOverride {
    pub id: u64,
    pub user_id: u64,
    pub table: String,
    #[serde(default = "any")]
    pub field: String,
    pub permission: Permission,
    pub effect: Effect,
    /// Set when the override is a delegation from another user.
    #[serde(default)]
    pub delegated_by: Option<u64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "active")]
    pub is_active: bool,
    #[serde(default)]
    pub is_revoked: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Shared activity rule: active, not revoked, not expired at `now`.
pub fn currently_active(
    is_active: bool,
    is_revoked: bool,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    is_active && !is_revoked && expires_at.map_or(true, |at| at > now)
}

impl AccessGrant {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        currently_active(self.is_active, self.is_revoked, self.expires_at, now)
    }
}

impl AccessOverride {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        currently_active(self.is_active, self.is_revoked, self.expires_at, now)
    }
}

fn any() -> String {
    ANY.to_string()
}

fn active() -> bool {
    true
}
