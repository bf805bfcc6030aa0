//! # ledger-access
//!
//! A TOML-driven permission overlay for the GMP audit ledger.
//!
//! ## Overview
//!
//! This crate provides [`AccessOverlay`], which resolves the effective
//! read / write / approve / export / view-history / sign / rollback rights of
//! a user on a table field.  Role grants are combined with user overrides and
//! time-bounded delegations; an explicit deny always wins.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use ledger_access::AccessOverlay;
//!
//! let overlay = AccessOverlay::from_file(Path::new("config/access.toml"), clock)?;
//! let rights = overlay.effective(7, "work_orders", "status")?;
//! ```
//!
//! ## Scope matching
//!
//! `table` and `field` accept the wildcard `"*"`.  Whole-entity operations
//! query with `field = "*"`, which only table-wide entries satisfy.

pub mod engine;
pub mod rule;

pub use engine::{AccessOverlay, PermissionCache};
pub use rule::{AccessConfig, UserRoles};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use ledger_contracts::{
        access::{AccessOverride, Effect, Permission, ANY},
        error::LedgerError,
    };
    use ledger_core::ManualClock;

    use crate::{AccessOverlay, PermissionCache};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap(),
        ))
    }

    const BASE: &str = r#"
        [[grants]]
        id = 1
        role = "maintenance_lead"
        table = "work_orders"
        permissions = ["read", "write", "view-history", "sign", "rollback"]

        [[grants]]
        id = 2
        role = "technician"
        table = "work_orders"
        field = "status"
        permissions = ["read", "write"]

        [[grants]]
        id = 3
        role = "qa"
        table = "*"
        permissions = ["read", "approve", "export", "view-history"]

        [[user_roles]]
        user_id = 7
        roles = ["maintenance_lead"]

        [[user_roles]]
        user_id = 8
        roles = ["technician"]

        [[user_roles]]
        user_id = 9
        roles = ["qa", "technician"]
    "#;

    fn overlay() -> (AccessOverlay, Arc<ManualClock>) {
        let clock = clock();
        (AccessOverlay::from_toml_str(BASE, clock.clone()).unwrap(), clock)
    }

    fn grant_override(user_id: u64, field: &str, permission: Permission, effect: Effect) -> AccessOverride {
        AccessOverride {
            id: 0,
            user_id,
            table: "work_orders".to_string(),
            field: field.to_string(),
            permission,
            effect,
            delegated_by: None,
            expires_at: None,
            is_active: true,
            is_revoked: false,
            reason: Some("test".to_string()),
        }
    }

    // ── 1. nothing granted ────────────────────────────────────────────────────

    #[test]
    fn test_unknown_user_has_no_rights() {
        let (overlay, _) = overlay();
        let set = overlay.effective(99, "work_orders", "status").unwrap();
        assert_eq!(set, Default::default());
        assert!(matches!(
            overlay.require(99, "work_orders", ANY, Permission::Read),
            Err(LedgerError::PermissionDenied { .. })
        ));
    }

    // ── 2. role grants ────────────────────────────────────────────────────────

    #[test]
    fn test_role_grants_union() {
        let (overlay, _) = overlay();

        let lead = overlay.effective(7, "work_orders", "status").unwrap();
        assert!(lead.can_write && lead.can_rollback && lead.can_sign);
        assert!(!lead.can_approve);

        // qa grants apply to every table; technician adds status write.
        let multi = overlay.effective(9, "work_orders", "status").unwrap();
        assert!(multi.can_approve && multi.can_export && multi.can_write);
        let elsewhere = overlay.effective(9, "capa", "status").unwrap();
        assert!(elsewhere.can_approve);
        assert!(!elsewhere.can_write);
    }

    #[test]
    fn test_field_grant_does_not_cover_whole_table() {
        let (overlay, _) = overlay();
        assert!(overlay.effective(8, "work_orders", "status").unwrap().can_write);
        assert!(!overlay.effective(8, "work_orders", "cost").unwrap().can_write);
        assert!(!overlay.effective(8, "work_orders", ANY).unwrap().can_write);
    }

    // ── 3. overrides ──────────────────────────────────────────────────────────

    #[test]
    fn test_explicit_deny_wins_over_role_grant() {
        let (overlay, _) = overlay();
        overlay
            .add_override(grant_override(7, ANY, Permission::Rollback, Effect::Deny))
            .unwrap();
        // A user-level grant for the same permission does not undo the deny.
        overlay
            .add_override(grant_override(7, ANY, Permission::Rollback, Effect::Grant))
            .unwrap();

        let set = overlay.effective(7, "work_orders", ANY).unwrap();
        assert!(!set.can_rollback);
        assert!(set.can_write);
    }

    #[test]
    fn test_user_grant_adds_permission() {
        let (overlay, _) = overlay();
        overlay
            .add_override(grant_override(8, "cost", Permission::Write, Effect::Grant))
            .unwrap();
        assert!(overlay.effective(8, "work_orders", "cost").unwrap().can_write);
    }

    #[test]
    fn test_expired_and_revoked_overrides_are_ignored() {
        let (overlay, clock) = overlay();
        let mut deny = grant_override(7, ANY, Permission::Write, Effect::Deny);
        deny.expires_at = Some(clock.now_plus(Duration::hours(1)));
        let deny = overlay.add_override(deny).unwrap();

        assert!(!overlay.effective(7, "work_orders", ANY).unwrap().can_write);
        clock.advance(Duration::hours(2));
        assert!(overlay.effective(7, "work_orders", ANY).unwrap().can_write);

        let second = overlay
            .add_override(grant_override(7, ANY, Permission::Approve, Effect::Grant))
            .unwrap();
        assert!(overlay.effective(7, "work_orders", ANY).unwrap().can_approve);
        overlay.revoke_override(second.id).unwrap();
        assert!(!overlay.effective(7, "work_orders", ANY).unwrap().can_approve);

        assert_ne!(deny.id, second.id);
        assert!(matches!(
            overlay.revoke_override(second.id),
            Err(LedgerError::Validation { .. })
        ));
        assert!(matches!(
            overlay.revoke_override(404),
            Err(LedgerError::NotFound { .. })
        ));
    }

    // ── 4. delegation ─────────────────────────────────────────────────────────

    #[test]
    fn test_delegation_bounded_by_delegator_rights() {
        let (overlay, _) = overlay();

        // Lead (7) delegates sign rights to technician (8).
        let mut sign = grant_override(8, ANY, Permission::Sign, Effect::Grant);
        sign.delegated_by = Some(7);
        overlay.add_override(sign).unwrap();

        // Lead cannot delegate approve, which they do not hold.
        let mut approve = grant_override(8, ANY, Permission::Approve, Effect::Grant);
        approve.delegated_by = Some(7);
        overlay.add_override(approve).unwrap();

        let set = overlay.effective(8, "work_orders", ANY).unwrap();
        assert!(set.can_sign);
        assert!(!set.can_approve);
    }

    #[test]
    fn test_self_delegation_rejected() {
        let (overlay, _) = overlay();
        let mut ov = grant_override(8, ANY, Permission::Sign, Effect::Grant);
        ov.delegated_by = Some(8);
        assert!(matches!(overlay.add_override(ov), Err(LedgerError::Validation { .. })));
    }

    // ── 5. administration ─────────────────────────────────────────────────────

    #[test]
    fn test_assign_role_and_ids() {
        let (overlay, _) = overlay();
        overlay.assign_role(20, "qa").unwrap();
        overlay.assign_role(20, "qa").unwrap();
        assert!(overlay.effective(20, "deviations", ANY).unwrap().can_approve);

        let snapshot = overlay.snapshot().unwrap();
        let roles: Vec<_> = snapshot.roles_of(20).collect();
        assert_eq!(roles, vec!["qa"]);

        let dup = snapshot.grants[0].clone();
        assert!(matches!(overlay.add_grant(dup), Err(LedgerError::Validation { .. })));
    }

    // ── 6. per-request cache ──────────────────────────────────────────────────

    #[test]
    fn test_permission_cache_pins_resolution_time() {
        let (overlay, clock) = overlay();
        let mut deny = grant_override(7, ANY, Permission::Write, Effect::Deny);
        deny.expires_at = Some(clock.now_plus(Duration::minutes(10)));
        overlay.add_override(deny).unwrap();

        let mut cache = PermissionCache::new(&overlay);
        assert!(!cache.effective(7, "work_orders", ANY).unwrap().can_write);

        clock.advance(Duration::hours(1));
        // Same request: still the resolution made at request start.
        assert!(!cache.effective(7, "work_orders", ANY).unwrap().can_write);
        assert_eq!(cache.len(), 1);
        // A new request sees the expiry.
        assert!(PermissionCache::new(&overlay)
            .effective(7, "work_orders", ANY)
            .unwrap()
            .can_write);
    }

    // ── 7. configuration errors ───────────────────────────────────────────────

    #[test]
    fn test_toml_parse_error() {
        let result = AccessOverlay::from_toml_str("grants = [[[", clock());
        match result {
            Err(LedgerError::Config { reason }) => {
                assert!(reason.contains("failed to parse access TOML"), "got: {reason}");
            }
            Err(other) => panic!("expected Config error, got {other:?}"),
            Ok(_) => panic!("expected Config error, got Ok"),
        }
    }

    #[test]
    fn test_rfc3339_expiry_parses() {
        let toml = r#"
            [[overrides]]
            id = 4
            user_id = 7
            table = "work_orders"
            permission = "export"
            effect = "grant"
            expires_at = "2026-06-01T09:00:00Z"
        "#;
        let (clock, overlay) = {
            let clock = clock();
            (clock.clone(), AccessOverlay::from_toml_str(toml, clock).unwrap())
        };
        assert!(overlay.effective(7, "work_orders", ANY).unwrap().can_export);
        clock.advance(Duration::hours(2));
        assert!(!overlay.effective(7, "work_orders", ANY).unwrap().can_export);
    }

    // Small helper so expiry arithmetic reads naturally in tests.
    trait NowPlus {
        fn now_plus(&self, by: Duration) -> chrono::DateTime<Utc>;
    }

    impl NowPlus for ManualClock {
        fn now_plus(&self, by: Duration) -> chrono::DateTime<Utc> {
            use ledger_core::traits::Clock;
            self.now() + by
        }
    }
}
