//! Credential verifiers.
//!
//! - `PinVerifier`        : salted SHA-256 PIN digests per user
//! - `CertificateRegistry`: issued certificates with validity window and
//!   revocation flag
//! - `BiometricVerifier`  : delegates assertions to an external backend
//! - `TimeoutVerifier`    : bounds any verifier by a deadline, failing closed
//! - `MethodVerifier`     : routes each credential to the verifier for its
//!   method; an unconfigured method is rejected
//!
//! Every failure is `LedgerError::Signature`.  None of them degrade to an
//! unsigned success.

use std::{
    collections::HashMap,
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use ledger_contracts::{
    error::{LedgerError, LedgerResult},
    signature::{Credential, SignatureMethod},
};
use ledger_core::traits::CredentialVerifier;

fn wrong_method(expected: SignatureMethod, credential: &Credential) -> LedgerError {
    LedgerError::signature(format!(
        "{expected} verifier cannot check a {} credential",
        credential.method()
    ))
}

// ── PIN ───────────────────────────────────────────────────────────────────────

/// Hex SHA-256 of `salt ‖ pin`.
pub fn pin_digest(salt: &str, pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(pin.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRecord {
    pub salt: String,
    pub digest: String,
}

#[derive(Debug, Default, Clone)]
pub struct PinVerifier {
    pins: HashMap<u64, PinRecord>,
}

impl PinVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pre-computed digest.
    pub fn with_record(mut self, user_id: u64, record: PinRecord) -> Self {
        self.pins.insert(user_id, record);
        self
    }

    /// Register a PIN in clear; only its salted digest is kept.
    pub fn with_pin(self, user_id: u64, salt: &str, pin: &str) -> Self {
        self.with_record(
            user_id,
            PinRecord {
                salt: salt.to_string(),
                digest: pin_digest(salt, pin),
            },
        )
    }
}

impl CredentialVerifier for PinVerifier {
    fn verify(&self, user_id: u64, credential: &Credential, _at: DateTime<Utc>) -> LedgerResult<()> {
        let Credential::Pin { pin } = credential else {
            return Err(wrong_method(SignatureMethod::Pin, credential));
        };
        let record = self
            .pins
            .get(&user_id)
            .ok_or_else(|| LedgerError::signature(format!("user {user_id} has no PIN enrolled")))?;
        if pin_digest(&record.salt, pin) != record.digest {
            warn!(user_id, "PIN mismatch");
            return Err(LedgerError::signature("PIN does not match"));
        }
        Ok(())
    }
}

// ── Certificates ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCertificate {
    pub serial: String,
    pub user_id: u64,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    #[serde(default)]
    pub revoked: bool,
}

#[derive(Debug, Default, Clone)]
pub struct CertificateRegistry {
    certificates: HashMap<String, IssuedCertificate>,
}

impl CertificateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_certificate(mut self, certificate: IssuedCertificate) -> Self {
        self.certificates
            .insert(certificate.serial.clone(), certificate);
        self
    }
}

impl CredentialVerifier for CertificateRegistry {
    fn verify(&self, user_id: u64, credential: &Credential, at: DateTime<Utc>) -> LedgerResult<()> {
        let Credential::Certificate { serial } = credential else {
            return Err(wrong_method(SignatureMethod::Certificate, credential));
        };
        let cert = self
            .certificates
            .get(serial)
            .ok_or_else(|| LedgerError::signature(format!("unknown certificate {serial}")))?;

        if cert.user_id != user_id {
            return Err(LedgerError::signature(format!(
                "certificate {serial} is not issued to user {user_id}"
            )));
        }
        if cert.revoked {
            return Err(LedgerError::signature(format!("certificate {serial} is revoked")));
        }
        if at < cert.not_before || at >= cert.not_after {
            return Err(LedgerError::signature(format!(
                "certificate {serial} is not valid at {at}"
            )));
        }
        Ok(())
    }
}

// ── Biometric ────────────────────────────────────────────────────────────────

/// External biometric service.
///
/// `Ok(true)` accepts, `Ok(false)` rejects, `Err` means the service could
/// not be reached.
pub trait BiometricBackend: Send + Sync {
    fn check(&self, user_id: u64, assertion: &str) -> Result<bool, String>;
}

pub struct BiometricVerifier {
    backend: Arc<dyn BiometricBackend>,
}

impl BiometricVerifier {
    pub fn new(backend: Arc<dyn BiometricBackend>) -> Self {
        Self { backend }
    }
}

impl CredentialVerifier for BiometricVerifier {
    fn verify(&self, user_id: u64, credential: &Credential, _at: DateTime<Utc>) -> LedgerResult<()> {
        let Credential::Biometric { assertion } = credential else {
            return Err(wrong_method(SignatureMethod::Biometric, credential));
        };
        match self.backend.check(user_id, assertion) {
            Ok(true) => Ok(()),
            Ok(false) => Err(LedgerError::signature("biometric assertion rejected")),
            Err(e) => Err(LedgerError::signature(format!(
                "biometric verifier unreachable: {e}"
            ))),
        }
    }
}

// ── Timeout ──────────────────────────────────────────────────────────────────

/// Runs the inner verifier on a worker thread and waits at most `timeout`.
///
/// On timeout the request fails closed; the worker is left to finish on its
/// own and its late answer is discarded.
pub struct TimeoutVerifier {
    inner: Arc<dyn CredentialVerifier>,
    timeout: Duration,
}

impl TimeoutVerifier {
    pub fn new(inner: Arc<dyn CredentialVerifier>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl CredentialVerifier for TimeoutVerifier {
    fn verify(&self, user_id: u64, credential: &Credential, at: DateTime<Utc>) -> LedgerResult<()> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let credential = credential.clone();
        thread::Builder::new()
            .name("credential-verifier".to_string())
            .spawn(move || {
                // The receiver may be gone after a timeout.
                let _ = tx.send(inner.verify(user_id, &credential, at));
            })
            .map_err(|e| LedgerError::signature(format!("could not start verifier: {e}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(user_id, timeout_ms = self.timeout.as_millis() as u64, "credential verifier timed out");
                Err(LedgerError::signature(format!(
                    "credential verifier did not answer within {} ms",
                    self.timeout.as_millis()
                )))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(LedgerError::signature("credential verifier crashed"))
            }
        }
    }
}

// ── Routing ──────────────────────────────────────────────────────────────────

/// Routes each credential to the verifier configured for its method.
#[derive(Default)]
pub struct MethodVerifier {
    verifiers: HashMap<SignatureMethod, Arc<dyn CredentialVerifier>>,
}

impl MethodVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, method: SignatureMethod, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.verifiers.insert(method, verifier);
        self
    }
}

impl CredentialVerifier for MethodVerifier {
    fn verify(&self, user_id: u64, credential: &Credential, at: DateTime<Utc>) -> LedgerResult<()> {
        let method = credential.method();
        match self.verifiers.get(&method) {
            Some(verifier) => verifier.verify(user_id, credential, at),
            None => Err(LedgerError::signature(format!(
                "no verifier configured for {method} signatures"
            ))),
        }
    }
}
