//! Command line interface module
//!
//! Offline tooling around the engine: pattern matching, policy validation,
//! replication plans and registry health checks.

pub mod args;
pub mod runner;

pub use args::{Args, Command};
pub use runner::{PlannedTask, Runner, plan};
