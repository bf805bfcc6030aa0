//! # ledger-core
//!
//! Trait seams and stateless building blocks shared by every ledger
//! component.
//!
//! This crate provides:
//! - The collaborator traits (`AuditStore`, `SignatureStore`,
//!   `CredentialVerifier`, `AlertSink`, `Clock`)
//! - The forensic context capturer
//! - The entity registry business modules populate at startup
//! - Reference clock and alert sink implementations

pub mod alert;
pub mod clock;
pub mod forensic;
pub mod registry;
pub mod traits;

pub use alert::{IntegrityAlert, RecordingAlertSink, TracingAlertSink};
pub use clock::{ManualClock, SystemClock};
pub use forensic::{capture, RequestOrigin};
pub use registry::{EntityRegistration, EntityRegistry};

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use ledger_contracts::{entity::EntityKey, error::LedgerError, forensic::Actor};

    use super::*;
    use crate::traits::{AlertSink, Clock};

    // ── Forensic capture ─────────────────────────────────────────────────────

    #[test]
    fn capture_prefers_first_forwarded_address() {
        let origin = RequestOrigin {
            user_id: Some(7),
            username: Some("mkovac".to_string()),
            remote_addr: Some("10.0.0.9:51234".to_string()),
            forwarded_for: Some("not-an-ip, 192.168.1.20, 10.0.0.1".to_string()),
            user_agent: Some("YasGMP/4.2".to_string()),
            os_description: Some("Windows 11".to_string()),
            session_id: Some(" s-77 ".to_string()),
            geo_location: Some("45.81,15.98".to_string()),
            ..RequestOrigin::default()
        };

        let ctx = capture(&origin);
        assert_eq!(ctx.actor, Actor::User { user_id: 7 });
        assert_eq!(ctx.username_snapshot, "mkovac");
        assert_eq!(ctx.source_ip, "192.168.1.20");
        assert_eq!(ctx.device_info, "YasGMP/4.2 | Windows 11");
        assert_eq!(ctx.session_id, "s-77");
        assert_eq!(ctx.geo_location.as_deref(), Some("45.81,15.98"));
    }

    #[test]
    fn capture_falls_back_to_remote_addr_and_unknowns() {
        let origin = RequestOrigin {
            remote_addr: Some("[::1]:8443".to_string()),
            system_component: Some("pm-scheduler".to_string()),
            ..RequestOrigin::default()
        };

        let ctx = capture(&origin);
        assert_eq!(
            ctx.actor,
            Actor::System {
                component: "pm-scheduler".to_string()
            }
        );
        assert_eq!(ctx.username_snapshot, "system:pm-scheduler");
        assert_eq!(ctx.source_ip, "::1");
        assert_eq!(ctx.device_info, forensic::UNKNOWN);
        assert!(ctx.geo_location.is_none());

        let empty = capture(&RequestOrigin::default());
        assert_eq!(empty.source_ip, forensic::UNKNOWN);
        assert_eq!(
            empty.actor,
            Actor::System {
                component: "unattributed".to_string()
            }
        );
    }

    #[test]
    fn capture_is_deterministic_and_caps_device_info() {
        let origin = RequestOrigin {
            user_id: Some(3),
            user_agent: Some("x".repeat(1000)),
            ..RequestOrigin::default()
        };
        let a = capture(&origin);
        let b = capture(&origin);
        assert_eq!(a, b);
        assert_eq!(a.device_info.len(), forensic::MAX_DEVICE_INFO_LEN);
        assert_eq!(a.username_snapshot, "user:3");
    }

    // ── Registry ─────────────────────────────────────────────────────────────

    #[test]
    fn registry_lookup_and_strict_mode() {
        let registry = EntityRegistry::default()
            .register(
                EntityRegistration::regulated("work_orders", "Work order")
                    .with_lookup(|id| id <= 100),
            )
            .register(EntityRegistration::unregulated("photos", "Photo"));

        assert!(registry.check(&EntityKey::new("work_orders", 42)).is_ok());
        assert!(matches!(
            registry.check(&EntityKey::new("work_orders", 101)),
            Err(LedgerError::Validation { .. })
        ));
        assert!(registry.check(&EntityKey::new("suppliers", 1)).is_ok());
        assert!(registry.is_regulated("suppliers"));
        assert!(!registry.is_regulated("photos"));

        let strict = registry.strict(true);
        assert!(matches!(
            strict.check(&EntityKey::new("suppliers", 1)),
            Err(LedgerError::Validation { .. })
        ));
    }

    // ── Clock / alerts ───────────────────────────────────────────────────────

    #[test]
    fn manual_clock_only_moves_when_told() {
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::days(2));
        assert_eq!(clock.now(), start + Duration::days(2));
    }

    #[test]
    fn recording_sink_keeps_alerts() {
        let sink = RecordingAlertSink::default();
        sink.raise(&IntegrityAlert {
            key: Some(EntityKey::new("capa", 4)),
            first_violation_version: Some(2),
            detected_at: Utc::now(),
            detail: "hash mismatch".to_string(),
        });
        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].first_violation_version, Some(2));
    }
}
