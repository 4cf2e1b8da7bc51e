//! # stackrun-core
//!
//! Core types and configuration for the stackrun process launcher.
//!
//! A stack is a set of named long-running services, each defined by a shell
//! command, an environment, a restart policy, and a failure action. This crate
//! owns the TOML stack file format, its fail-fast validation, and the log file
//! naming/expiry helpers shared by the supervision engine and the CLI.

pub mod config;
pub mod logs;
pub mod types;

pub use config::{load_stack, StackConfig};
pub use types::*;
