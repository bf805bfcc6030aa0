//! # ledger-signature
//!
//! Electronic signatures bound to sealed audit records.
//!
//! A signature commits to the signer, the signing time, the target record's
//! `entry_hash`, and the authentication method.  Its lifecycle (SIGN,
//! REVOKE_SIGNATURE) is itself chained in the audit ledger.  Credential
//! checks go through the `CredentialVerifier` seam; external verifiers are
//! wrapped in [`TimeoutVerifier`] so an unreachable service fails closed.

pub mod memory;
pub mod service;
pub mod verifier;

pub use memory::InMemorySignatureStore;
pub use service::{signature_chain_key, signature_hash, SignatureService};
pub use verifier::{
    pin_digest, BiometricBackend, BiometricVerifier, CertificateRegistry, IssuedCertificate,
    MethodVerifier, PinRecord, PinVerifier, TimeoutVerifier,
};

// ── Tests ─────────────────────────────────────────────────────────────────────
