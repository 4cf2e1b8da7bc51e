use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// When (and whether) a service is relaunched after its process exits.
///
/// `Fixed` reproduces the classic keep-alive loop: relaunch after a constant
/// delay no matter how the process exited. `Backoff` only relaunches after a
/// crash, doubling the delay each consecutive failure up to `max_ms`, and
/// gives up after `max_retries` crashes in a row. A clean exit resets the
/// crash counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RestartPolicy {
	Never,
	Fixed { delay_secs: u64 },
	Backoff { base_ms: u64, max_ms: u64, max_retries: u32 },
}

impl Default for RestartPolicy {
	fn default() -> Self {
		RestartPolicy::Fixed { delay_secs: 3 }
	}
}

impl RestartPolicy {
	/// Delay before relaunch attempt number `retries` (1-based), or `None`
	/// when the policy says give up.
	pub fn next_delay(&self, retries: u32) -> Option<Duration> {
		match self {
			RestartPolicy::Never => None,
			RestartPolicy::Fixed { delay_secs } => Some(Duration::from_secs(*delay_secs)),
			RestartPolicy::Backoff { base_ms, max_ms, max_retries } => {
				if retries > *max_retries {
					return None;
				}
				let exp = retries.saturating_sub(1).min(16);
				let ms = base_ms.saturating_mul(1u64 << exp).min(*max_ms);
				Some(Duration::from_millis(ms))
			}
		}
	}

	pub fn restarts_on_clean_exit(&self) -> bool {
		matches!(self, RestartPolicy::Fixed { .. })
	}
}

/// What an unrecoverable service failure means for the rest of the stack.
///
/// `Ignore` keeps the siblings running and the launcher waiting for them.
/// `AbortAll` tears the whole stack down.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
	#[default]
	Ignore,
	AbortAll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDef {
	pub name: String,
	pub command: String,
	pub dir: Option<PathBuf>,
	pub env: HashMap<String, String>,
	pub required_env: Vec<String>,
	pub restart: RestartPolicy,
	pub on_failure: FailureAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ProcessState {
	Running { pid: u32, uptime_secs: u64 },
	Stopped,
	Restarting { exit_code: i32, retries: u32 },
	Failed { exit_code: i32 },
}

impl ProcessState {
	pub fn is_running(&self) -> bool {
		matches!(self, ProcessState::Running { .. })
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
	pub name: String,
	pub state: ProcessState,
	pub pid: Option<u32>,
}

/// Lifecycle notifications emitted by each service monitor while the
/// launcher is up. Exit codes are the real codes returned by `wait()`;
/// a process killed by a signal is reported as -1.
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchEvent {
	Started { service: String, pid: u32 },
	Exited { service: String, exit_code: i32, clean: bool },
	Restarting { service: String, exit_code: i32, retries: u32, delay_ms: u64 },
	GaveUp { service: String, exit_code: i32 },
	SpawnFailed { service: String, error: String },
}

impl LaunchEvent {
	pub fn service(&self) -> &str {
		match self {
			LaunchEvent::Started { service, .. }
			| LaunchEvent::Exited { service, .. }
			| LaunchEvent::Restarting { service, .. }
			| LaunchEvent::GaveUp { service, .. }
			| LaunchEvent::SpawnFailed { service, .. } => service,
		}
	}

	/// True when the monitor has given up on the service for good.
	pub fn is_terminal_failure(&self) -> bool {
		matches!(self, LaunchEvent::GaveUp { .. } | LaunchEvent::SpawnFailed { .. })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fixed_policy_always_restarts() {
		let policy = RestartPolicy::Fixed { delay_secs: 2 };
		assert_eq!(policy.next_delay(1), Some(Duration::from_secs(2)));
		assert_eq!(policy.next_delay(100), Some(Duration::from_secs(2)));
		assert!(policy.restarts_on_clean_exit());
	}

	#[test]
	fn never_policy_never_restarts() {
		assert_eq!(RestartPolicy::Never.next_delay(1), None);
		assert!(!RestartPolicy::Never.restarts_on_clean_exit());
	}

	#[test]
	fn backoff_doubles_and_caps() {
		let policy = RestartPolicy::Backoff { base_ms: 100, max_ms: 1000, max_retries: 10 };
		assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
		assert_eq!(policy.next_delay(2), Some(Duration::from_millis(200)));
		assert_eq!(policy.next_delay(3), Some(Duration::from_millis(400)));
		assert_eq!(policy.next_delay(5), Some(Duration::from_millis(1000)));
		assert_eq!(policy.next_delay(11), None);
		assert!(!policy.restarts_on_clean_exit());
	}

	#[test]
	fn backoff_does_not_overflow() {
		let policy = RestartPolicy::Backoff { base_ms: u64::MAX / 2, max_ms: u64::MAX, max_retries: 60 };
		assert!(policy.next_delay(40).is_some());
	}

	#[test]
	fn terminal_failure_events() {
		let gave_up = LaunchEvent::GaveUp { service: "api".into(), exit_code: 1 };
		let exited = LaunchEvent::Exited { service: "api".into(), exit_code: 1, clean: false };
		assert!(gave_up.is_terminal_failure());
		assert!(!exited.is_terminal_failure());
		assert_eq!(gave_up.service(), "api");
	}
}
