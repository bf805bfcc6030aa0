//! Electronic signature types.
//!
//! A `SignatureEvent` binds one user's intent to one sealed `AuditRecord`.
//! Revocation flips `status` only; `signature_hash` never changes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::forensic::ForensicContext;

/// How the signer proved their identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureMethod {
    Pin,
    Certificate,
    Biometric,
}

impl SignatureMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureMethod::Pin => "pin",
            SignatureMethod::Certificate => "certificate",
            SignatureMethod::Biometric => "biometric",
        }
    }
}

impl fmt::Display for SignatureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    Valid,
    Revoked,
}

/// The meaning the signer attaches to the signature (approval, closure...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureMeaning {
    Approval,
    Closure,
    Review,
    Rollback,
    Revocation,
}

impl SignatureMeaning {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureMeaning::Approval => "approval",
            SignatureMeaning::Closure => "closure",
            SignatureMeaning::Review => "review",
            SignatureMeaning::Rollback => "rollback",
            SignatureMeaning::Revocation => "revocation",
        }
    }
}

impl fmt::Display for SignatureMeaning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof of identity presented with a signing request.
///
/// The method is derived from the credential so the two can never disagree.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Credential {
    Pin { pin: String },
    Certificate { serial: String },
    Biometric { assertion: String },
}

impl Credential {
    pub fn method(&self) -> SignatureMethod {
        match self {
            Credential::Pin { .. } => SignatureMethod::Pin,
            Credential::Certificate { .. } => SignatureMethod::Certificate,
            Credential::Biometric { .. } => SignatureMethod::Biometric,
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Pin { .. } => f.write_str("Credential::Pin(***)"),
            Credential::Certificate { serial } => write!(f, "Credential::Certificate({serial})"),
            Credential::Biometric { .. } => f.write_str("Credential::Biometric(***)"),
        }
    }
}

/// A request to sign one audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub target_record_id: u64,
    pub user_id: u64,
    pub credential: Credential,
    pub meaning: SignatureMeaning,
    pub reason_code: String,
    pub forensic: ForensicContext,
}

/// A digital signature bound to one audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEvent {
    pub id: u64,
    pub target_record_id: u64,
    pub user_id: u64,
    pub method: SignatureMethod,
    pub meaning: SignatureMeaning,
    /// Hex SHA-256 over (user id, signing time, target entry hash, method).
    pub signature_hash: String,
    pub reason_code: String,
    pub status: SignatureStatus,
    pub signed_at_utc: DateTime<Utc>,
    pub revoked_at_utc: Option<DateTime<Utc>>,
    pub revocation_reason: Option<String>,
}

impl SignatureEvent {
    pub fn is_valid(&self) -> bool {
        self.status == SignatureStatus::Valid
    }
}
