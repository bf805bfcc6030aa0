//! Compliance alerts raised on integrity violations.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use ledger_contracts::entity::EntityKey;

use crate::traits::AlertSink;

/// Raised when a chain or checkpoint fails verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityAlert {
    /// `None` when the alert concerns a global checkpoint.
    pub key: Option<EntityKey>,
    pub first_violation_version: Option<u64>,
    pub detected_at: DateTime<Utc>,
    pub detail: String,
}

/// Default sink: emits a structured `error!` event for log shipping.
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: &IntegrityAlert) {
        let key = alert
            .key
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "checkpoint".to_string());
        error!(
            key = %key,
            first_violation_version = ?alert.first_violation_version,
            detected_at = %alert.detected_at,
            detail = %alert.detail,
            "COMPLIANCE ALERT: audit integrity violation"
        );
    }
}

/// Keeps every alert in memory.  Used by tests and the demo.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<IntegrityAlert>>,
}

impl RecordingAlertSink {
    pub fn alerts(&self) -> Vec<IntegrityAlert> {
        self.alerts
            .lock()
            .map(|alerts| alerts.clone())
            .unwrap_or_default()
    }
}

impl AlertSink for RecordingAlertSink {
    fn raise(&self, alert: &IntegrityAlert) {
        TracingAlertSink.raise(alert);
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert.clone());
        }
    }
}
