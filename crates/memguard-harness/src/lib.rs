//! Diagnostics and self-test tooling for the memguard interception layer.

pub mod report;
pub mod selftest;

pub use report::{BindingRow, BootstrapReport, SelftestReport};
pub use selftest::{CaseResult, run_selftest};
