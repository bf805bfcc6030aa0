//! Demo scenarios.
//!
//! Each scenario opens its own ledger over the sample configuration with a
//! manual clock, walks through one compliance story, and closes the ledger.

pub mod concurrency;
pub mod permissions;
pub mod retention;
pub mod tamper;
pub mod work_order;
