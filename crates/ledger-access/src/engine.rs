//! Effective permission resolution.
//!
//! Resolution algorithm for `(user, table, field)`:
//!
//! 1. Union every currently active role grant for the user's roles whose
//!    scope matches.
//! 2. Apply the user's own active overrides: `grant` adds the permission,
//!    `deny` marks it denied.
//! 3. Apply active delegations the same way, except a delegated `grant` only
//!    takes effect if the delegator holds that permission through their own
//!    roles.
//! 4. Clear every denied permission.  An explicit deny at any override level
//!    wins over any grant.
//!
//! The result is never stored.  Use `PermissionCache` to reuse resolutions
//! within one request.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{Arc, RwLock, RwLockReadGuard},
};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use ledger_contracts::{
    access::{AccessGrant, AccessOverride, Effect, Permission, PermissionSet},
    error::{LedgerError, LedgerResult},
};
use ledger_core::traits::Clock;

use crate::rule::{scope_matches, AccessConfig, UserRoles};

/// The access overlay, loaded from TOML and updated through audited
/// administration calls.
pub struct AccessOverlay {
    config: RwLock<AccessConfig>,
    clock: Arc<dyn Clock>,
}

impl AccessOverlay {
    pub fn new(config: AccessConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: RwLock::new(config),
            clock,
        }
    }

    /// Parse `s` as TOML and build an overlay.
    ///
    /// Returns `LedgerError::Config` if the TOML is malformed or does not
    /// match the `AccessConfig` schema.
    pub fn from_toml_str(s: &str, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
        let config: AccessConfig = toml::from_str(s).map_err(|e| LedgerError::Config {
            reason: format!("failed to parse access TOML: {e}"),
        })?;
        Ok(Self::new(config, clock))
    }

    /// Read the file at `path` and parse it as an access document.
    pub fn from_file(path: &Path, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| LedgerError::Config {
            reason: format!("failed to read access file '{}': {e}", path.display()),
        })?;
        Self::from_toml_str(&contents, clock)
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, AccessConfig>> {
        self.config.read().map_err(|_| LedgerError::Storage {
            reason: "access config lock poisoned".to_string(),
        })
    }

    fn update<T>(&self, f: impl FnOnce(&mut AccessConfig) -> LedgerResult<T>) -> LedgerResult<T> {
        let mut config = self.config.write().map_err(|_| LedgerError::Storage {
            reason: "access config lock poisoned".to_string(),
        })?;
        f(&mut config)
    }

    pub fn snapshot(&self) -> LedgerResult<AccessConfig> {
        Ok(self.read()?.clone())
    }

    /// Effective permissions at the current time.
    pub fn effective(&self, user_id: u64, table: &str, field: &str) -> LedgerResult<PermissionSet> {
        self.effective_at(user_id, table, field, self.clock.now())
    }

    /// Effective permissions at `now`.
    pub fn effective_at(
        &self,
        user_id: u64,
        table: &str,
        field: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<PermissionSet> {
        let config = self.read()?;
        let mut set = role_rights(&config, user_id, table, field, now);
        let mut denied = HashSet::new();

        let active_overrides = config
            .overrides
            .iter()
            .filter(|o| o.user_id == user_id && o.is_active_at(now))
            .filter(|o| scope_matches(&o.table, &o.field, table, field));

        for ov in active_overrides {
            match (ov.effect, ov.delegated_by) {
                (Effect::Deny, _) => {
                    denied.insert(ov.permission);
                }
                (Effect::Grant, None) => set.set(ov.permission, true),
                (Effect::Grant, Some(delegator)) => {
                    let delegator_rights = role_rights(&config, delegator, table, field, now);
                    if delegator_rights.allows(ov.permission) {
                        set.set(ov.permission, true);
                    } else {
                        debug!(
                            override_id = ov.id,
                            delegator,
                            permission = ?ov.permission,
                            "delegation exceeds delegator's own rights; ignored"
                        );
                    }
                }
            }
        }

        for permission in denied {
            set.set(permission, false);
        }

        debug!(user_id, table, field, permissions = ?set, "effective permissions resolved");
        Ok(set)
    }

    /// Fail with `PermissionDenied` unless `user_id` holds `permission`.
    pub fn require(
        &self,
        user_id: u64,
        table: &str,
        field: &str,
        permission: Permission,
    ) -> LedgerResult<()> {
        if self.effective(user_id, table, field)?.allows(permission) {
            return Ok(());
        }
        warn!(user_id, table, field, permission = %permission, "access denied");
        Err(LedgerError::denied(format!(
            "user {user_id} lacks {permission} on {table}.{field}"
        )))
    }

    /// Validate a role grant against the current configuration and assign
    /// its id without applying it.  An id of 0 becomes the next free id.
    pub fn prepare_grant(&self, grant: AccessGrant) -> LedgerResult<AccessGrant> {
        let config = self.read()?;
        check_grant(&config, grant)
    }

    /// Add a role grant.  An id of 0 is replaced by the next free id.
    pub fn add_grant(&self, grant: AccessGrant) -> LedgerResult<AccessGrant> {
        self.update(|config| {
            let grant = check_grant(config, grant)?;
            config.grants.push(grant.clone());
            info!(grant_id = grant.id, role = %grant.role, table = %grant.table, "role grant added");
            Ok(grant)
        })
    }

    /// Validate a user override and assign its id without applying it.
    pub fn prepare_override(&self, ov: AccessOverride) -> LedgerResult<AccessOverride> {
        let config = self.read()?;
        check_override(&config, ov)
    }

    /// Add a user override or delegation.  An id of 0 is replaced by the next
    /// free id.
    pub fn add_override(&self, ov: AccessOverride) -> LedgerResult<AccessOverride> {
        self.update(|config| {
            let ov = check_override(config, ov)?;
            config.overrides.push(ov.clone());
            info!(
                override_id = ov.id,
                user_id = ov.user_id,
                effect = ?ov.effect,
                permission = ?ov.permission,
                "user override added"
            );
            Ok(ov)
        })
    }

    /// The override with `id`, if it exists and is not yet revoked.
    pub fn revocable_override(&self, id: u64) -> LedgerResult<AccessOverride> {
        let config = self.read()?;
        let ov = find_revocable(&config.overrides, id)?;
        Ok(ov.clone())
    }

    /// Mark an override revoked.  The entry stays for audit purposes.
    pub fn revoke_override(&self, id: u64) -> LedgerResult<AccessOverride> {
        self.update(|config| {
            find_revocable(&config.overrides, id)?;
            let ov = config
                .overrides
                .iter_mut()
                .find(|o| o.id == id)
                .ok_or_else(|| LedgerError::NotFound {
                    what: format!("access override {id}"),
                })?;
            ov.is_revoked = true;
            info!(override_id = id, "user override revoked");
            Ok(ov.clone())
        })
    }

    /// Give `user_id` an additional role.
    pub fn assign_role(&self, user_id: u64, role: &str) -> LedgerResult<()> {
        self.update(|config| {
            match config.user_roles.iter_mut().find(|ur| ur.user_id == user_id) {
                Some(ur) if ur.roles.iter().any(|r| r == role) => {}
                Some(ur) => ur.roles.push(role.to_string()),
                None => config.user_roles.push(UserRoles {
                    user_id,
                    roles: vec![role.to_string()],
                }),
            }
            Ok(())
        })
    }
}

fn check_grant(config: &AccessConfig, mut grant: AccessGrant) -> LedgerResult<AccessGrant> {
    if grant.role.trim().is_empty() || grant.permissions.is_empty() {
        return Err(LedgerError::validation(
            "grant needs a role and at least one permission",
        ));
    }
    if grant.id == 0 {
        grant.id = config.grants.iter().map(|g| g.id).max().unwrap_or(0) + 1;
    } else if config.grants.iter().any(|g| g.id == grant.id) {
        return Err(LedgerError::validation(format!(
            "grant id {} already exists",
            grant.id
        )));
    }
    Ok(grant)
}

fn check_override(config: &AccessConfig, mut ov: AccessOverride) -> LedgerResult<AccessOverride> {
    if ov.user_id == 0 || ov.delegated_by == Some(ov.user_id) {
        return Err(LedgerError::validation(
            "override needs a user and cannot be delegated to oneself",
        ));
    }
    if ov.id == 0 {
        ov.id = config.overrides.iter().map(|o| o.id).max().unwrap_or(0) + 1;
    } else if config.overrides.iter().any(|o| o.id == ov.id) {
        return Err(LedgerError::validation(format!(
            "override id {} already exists",
            ov.id
        )));
    }
    Ok(ov)
}

fn find_revocable(overrides: &[AccessOverride], id: u64) -> LedgerResult<&AccessOverride> {
    let ov = overrides
        .iter()
        .find(|o| o.id == id)
        .ok_or_else(|| LedgerError::NotFound {
            what: format!("access override {id}"),
        })?;
    if ov.is_revoked {
        return Err(LedgerError::validation(format!(
            "access override {id} is already revoked"
        )));
    }
    Ok(ov)
}

/// Union of active role grants for `user_id` on `(table, field)`.
fn role_rights(
    config: &AccessConfig,
    user_id: u64,
    table: &str,
    field: &str,
    now: DateTime<Utc>,
) -> PermissionSet {
    let roles: HashSet<&str> = config.roles_of(user_id).collect();
    let mut set = PermissionSet::default();
    config
        .grants
        .iter()
        .filter(|g| roles.contains(g.role.as_str()) && g.is_active_at(now))
        .filter(|g| scope_matches(&g.table, &g.field, table, field))
        .flat_map(|g| g.permissions.iter())
        .for_each(|p| set.set(*p, true));
    set
}

/// Per-request cache of resolutions.
///
/// The resolution time is fixed when the cache is created, so every lookup
/// within one request sees the same grants.
pub struct PermissionCache<'a> {
    overlay: &'a AccessOverlay,
    now: DateTime<Utc>,
    resolved: HashMap<(u64, String, String), PermissionSet>,
}

impl<'a> PermissionCache<'a> {
    pub fn new(overlay: &'a AccessOverlay) -> Self {
        Self {
            overlay,
            now: overlay.clock.now(),
            resolved: HashMap::new(),
        }
    }

    pub fn effective(&mut self, user_id: u64, table: &str, field: &str) -> LedgerResult<PermissionSet> {
        let key = (user_id, table.to_string(), field.to_string());
        if let Some(set) = self.resolved.get(&key) {
            return Ok(*set);
        }
        let set = self.overlay.effective_at(user_id, table, field, self.now)?;
        self.resolved.insert(key, set);
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}
