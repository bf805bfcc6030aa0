//! GMP Audit Ledger: Demo CLI
//!
//! Runs one or all of the ledger demo scenarios.  Each scenario uses the real
//! ledger components (recorder, signature service, rollback and retention
//! managers, access overlay, checkpoints) over the sample configuration.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- work-order
//!   cargo run -p demo -- concurrency
//!   cargo run -p demo -- tamper
//!   cargo run -p demo -- retention
//!   cargo run -p demo -- permissions

mod fixtures;
mod scenarios;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ledger_contracts::error::LedgerResult;

use scenarios::{concurrency, permissions, retention, tamper, work_order};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Tamper-evident audit trail and e-signature ledger demo.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "GMP audit ledger demo",
    long_about = "Runs audit ledger scenarios showing hash-chained history,\n\
                  signed rollback, tamper detection, retention, and audited access changes."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every scenario in sequence.
    RunAll,
    /// Scenario 1: work order closed in error, signed rollback, export.
    WorkOrder,
    /// Scenario 2: two writers on the same version.
    Concurrency,
    /// Scenario 3: storage edited behind the ledger's back.
    Tamper,
    /// Scenario 4: soft delete, retention window, purge.
    Retention,
    /// Scenario 5: delegated signing rights and audited overrides.
    Permissions,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=info to see ledger events, RUST_LOG=debug for more.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match cli.command {
        Command::RunAll => run_all(),
        Command::WorkOrder => work_order::run_scenario(),
        Command::Concurrency => concurrency::run_scenario(),
        Command::Tamper => tamper::run_scenario(),
        Command::Retention => retention::run_scenario(),
        Command::Permissions => permissions::run_scenario(),
    };

    match result {
        Ok(()) => {
            println!("All selected scenarios completed successfully.");
        }
        Err(e) => {
            eprintln!("Demo error: {}", e);
            std::process::exit(1);
        }
    }
}

// ── Scenario dispatch ─────────────────────────────────────────────────────────

fn run_all() -> LedgerResult<()> {
    work_order::run_scenario()?;
    concurrency::run_scenario()?;
    tamper::run_scenario()?;
    retention::run_scenario()?;
    permissions::run_scenario()?;
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("GMP Audit Ledger");
    println!("Maintenance / QA Reference Demo");
    println!("===============================");
    println!();
    println!("Per mutation:");
    println!("  [1] Shape validation and entity registry check");
    println!("  [2] Per-entity lock, chain review status, expected version");
    println!("  [3] Record sealed: SHA-256 over previous hash, canonical fields, timestamp");
    println!("  [4] Compare-and-swap append; a lost race is a VersionConflict");
    println!("  [5] Signatures, rollbacks, and permission changes are chained the same way");
    println!();
}
