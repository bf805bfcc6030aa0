//! Who performed a mutation, and from where.

use serde::{Deserialize, Serialize};

/// The identity behind a mutation.
///
/// Automated jobs are explicitly marked as `System` rather than borrowing a
/// human user id, so every record names a resolvable actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    User { user_id: u64 },
    System { component: String },
}

impl Actor {
    /// The human user id, if any.
    pub fn user_id(&self) -> Option<u64> {
        match self {
            Actor::User { user_id } => Some(*user_id),
            Actor::System { .. } => None,
        }
    }
}

/// Forensic metadata attached to every audit record.
///
/// Produced by the forensic capturer in `ledger-core`; the recorder copies it
/// verbatim into the sealed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForensicContext {
    pub actor: Actor,
    /// Username at the time of the action.  Later renames do not rewrite
    /// history.
    pub username_snapshot: String,
    pub source_ip: String,
    pub device_info: String,
    pub session_id: String,
    pub geo_location: Option<String>,
}

impl ForensicContext {
    /// Context for an automated ledger component with no network origin.
    pub fn system(component: impl Into<String>) -> Self {
        let component = component.into();
        Self {
            actor: Actor::System {
                component: component.clone(),
            },
            username_snapshot: format!("system:{component}"),
            source_ip: "127.0.0.1".to_string(),
            device_info: "ledger".to_string(),
            session_id: String::new(),
            geo_location: None,
        }
    }
}
