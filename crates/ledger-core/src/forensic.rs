//! Forensic context capture.
//!
//! `capture` turns the raw request metadata a business module sees (remote
//! address, proxy headers, user agent, session) into the normalized
//! `ForensicContext` stored on every audit record.  It is a pure function:
//! same input, same output, no state.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use ledger_contracts::forensic::{Actor, ForensicContext};

/// Placeholder stored when a value is missing or unparseable.
pub const UNKNOWN: &str = "unknown";

/// Longest device description kept; user agents beyond this are truncated.
pub const MAX_DEVICE_INFO_LEN: usize = 256;

/// Raw request metadata as seen by the calling module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOrigin {
    pub user_id: Option<u64>,
    pub username: Option<String>,
    /// Name of the automated job when there is no human user.
    pub system_component: Option<String>,
    pub remote_addr: Option<String>,
    /// Raw `X-Forwarded-For` value; the left-most entry is the client.
    pub forwarded_for: Option<String>,
    pub user_agent: Option<String>,
    pub os_description: Option<String>,
    pub session_id: Option<String>,
    pub geo_location: Option<String>,
}

/// Build the forensic context for one mutation.
///
/// - A positive `user_id` yields `Actor::User`.  Otherwise the actor is the
///   named system component, or `system:unattributed`.
/// - The client IP is the first valid address in `forwarded_for`, falling
///   back to `remote_addr` (port stripped).  Invalid input becomes
///   `"unknown"`.
/// - Device info joins user agent and OS description, trimmed and capped at
///   [`MAX_DEVICE_INFO_LEN`] characters.
pub fn capture(origin: &RequestOrigin) -> ForensicContext {
    let actor = match origin.user_id.filter(|id| *id > 0) {
        Some(user_id) => Actor::User { user_id },
        None => Actor::System {
            component: non_blank(origin.system_component.as_deref())
                .unwrap_or("unattributed")
                .to_string(),
        },
    };

    let username_snapshot = match (&actor, non_blank(origin.username.as_deref())) {
        (_, Some(name)) => name.to_string(),
        (Actor::User { user_id }, None) => format!("user:{user_id}"),
        (Actor::System { component }, None) => format!("system:{component}"),
    };

    ForensicContext {
        actor,
        username_snapshot,
        source_ip: client_ip(origin),
        device_info: device_info(origin),
        session_id: non_blank(origin.session_id.as_deref())
            .unwrap_or_default()
            .to_string(),
        geo_location: non_blank(origin.geo_location.as_deref()).map(str::to_string),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn client_ip(origin: &RequestOrigin) -> String {
    let forwarded = origin
        .forwarded_for
        .as_deref()
        .and_then(|header| header.split(',').map(str::trim).find_map(parse_ip));
    forwarded
        .or_else(|| origin.remote_addr.as_deref().and_then(parse_ip))
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Accepts bare addresses, `ip:port`, and `[v6]:port`.
fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Some(rest) = raw.strip_prefix('[') {
        return rest.split(']').next().and_then(|v6| v6.parse().ok());
    }
    raw.rsplit_once(':')
        .and_then(|(host, _port)| host.parse::<IpAddr>().ok())
}

fn device_info(origin: &RequestOrigin) -> String {
    let parts: Vec<&str> = [origin.user_agent.as_deref(), origin.os_description.as_deref()]
        .into_iter()
        .filter_map(non_blank)
        .collect();
    if parts.is_empty() {
        return UNKNOWN.to_string();
    }
    parts.join(" | ").chars().take(MAX_DEVICE_INFO_LEN).collect()
}
