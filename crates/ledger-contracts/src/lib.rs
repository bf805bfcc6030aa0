//! # ledger-contracts
//!
//! Shared types, closed enumerations, and error contracts for the GMP audit
//! ledger.
//!
//! Every crate in the workspace imports from here.  No ledger logic lives in
//! this crate, only data definitions and the error taxonomy.

pub mod access;
pub mod audit;
pub mod entity;
pub mod error;
pub mod forensic;
pub mod mutation;
pub mod retention;
pub mod signature;
pub mod verify;
