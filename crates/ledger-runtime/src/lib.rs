//! # ledger-runtime
//!
//! The assembled GMP audit ledger.
//!
//! [`LedgerBuilder`] wires the store, clock, credential verifiers, alert
//! sink, and entity registry together from a [`LedgerConfig`].
//! [`LedgerBuilder::open`] refuses to start on top of a store that no longer
//! matches its latest checkpoint; [`Ledger::close`] writes a final one.
//!
//! ```rust,ignore
//! let config = LedgerConfig::from_file(Path::new("config/ledger.toml"))?;
//! let ledger = LedgerBuilder::new(config)
//!     .with_verifier(Arc::new(verifiers))
//!     .open()?;
//! let record = ledger.record(event)?;
//! ledger.close()?;
//! ```

pub mod config;
pub mod ledger;

pub use config::{EntityTypeConfig, LedgerConfig, LedgerSection, SignatureSection};
pub use ledger::{ExportFormat, HistoryExport, Ledger, LedgerBuilder};

/// Reference configuration for the maintenance / QA deployment.
pub const SAMPLE_CONFIG: &str = include_str!("../config/ledger.toml");

// ── Tests ─────────────────────────────────────────────────────────────────────
