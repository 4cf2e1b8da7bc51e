//! # stackrun-super
//!
//! Supervision engine for the stackrun process launcher.
//!
//! Two supervision shapes, both built on the same monitor loop:
//!
//! - keep one service alive: spawn it, stream its output, relaunch it after
//!   every exit per its [`RestartPolicy`](stackrun_core::RestartPolicy), until
//!   cancelled;
//! - bring a whole stack up: one monitor task per service, lifecycle events
//!   reported over a channel, per-service failure actions, and join-all
//!   semantics — the launcher returns only once every monitor has finished.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use stackrun_super::{Launcher, SupervisorConfig};
//! use stackrun_core::{FailureAction, RestartPolicy, ServiceDef};
//! use std::collections::HashMap;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let launcher = Launcher::new(SupervisorConfig {
//!     log_dir: "/tmp/mystack/logs".into(),
//!     max_log_size: 10 * 1024 * 1024,
//!     echo: true,
//! });
//!
//! let services = vec![ServiceDef {
//!     name: "api".into(),
//!     command: "leadgen-api dev".into(),
//!     dir: None,
//!     env: HashMap::new(),
//!     required_env: vec![],
//!     restart: RestartPolicy::Fixed { delay_secs: 3 },
//!     on_failure: FailureAction::Ignore,
//! }];
//!
//! let summary = launcher.up(&services).await.unwrap();
//! assert!(summary.failed.is_empty());
//! # }
//! ```

pub mod launcher;
pub mod output;
pub mod supervisor;

pub use launcher::{LaunchSummary, Launcher};
pub use output::OutputCapture;
pub use supervisor::{kill_process_tree, Supervisor, SupervisorConfig};
