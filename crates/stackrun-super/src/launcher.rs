use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::supervisor::{Supervisor, SupervisorConfig};
use stackrun_core::types::*;

/// Brings a stack of services up in parallel and stays alive as long as any
/// of them is: one monitor task per service, lifecycle events funneled over a
/// channel, and join-all semantics on top. A service whose monitor gives up
/// is handled per its [`FailureAction`] — `Ignore` leaves the siblings
/// running, `AbortAll` tears the whole stack down.
pub struct Launcher {
	pub supervisor: Arc<Supervisor>,
}

/// What happened to the stack by the time [`Launcher::up`] returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchSummary {
	/// Services whose monitor gave up (spawn failure or retries exhausted).
	pub failed: Vec<String>,
	pub aborted: bool,
}

impl LaunchSummary {
	pub fn is_clean(&self) -> bool {
		self.failed.is_empty() && !self.aborted
	}
}

impl Launcher {
	pub fn new(config: SupervisorConfig) -> Self {
		Self {
			supervisor: Supervisor::new(config),
		}
	}

	/// Launches every service and blocks until all monitors have finished.
	/// Long-running services keep this pending indefinitely; it resolves once
	/// every child has exited for good (or the stack was aborted/cancelled).
	pub async fn up(&self, services: &[ServiceDef]) -> Result<LaunchSummary, String> {
		if services.is_empty() {
			return Err("no services defined".to_string());
		}

		let actions: HashMap<String, FailureAction> = services
			.iter()
			.map(|s| (s.name.clone(), s.on_failure))
			.collect();

		let (tx, mut rx) = mpsc::channel::<LaunchEvent>(256);
		let mut monitors = JoinSet::new();
		for (index, def) in services.iter().enumerate() {
			let monitor = self.supervisor.register(def, index, Some(tx.clone())).await?;
			monitors.spawn(monitor);
		}
		drop(tx);

		tracing::info!("stack up: {} service(s)", services.len());

		let mut summary = LaunchSummary::default();
		let mut events_open = true;

		loop {
			tokio::select! {
				res = monitors.join_next() => {
					match res {
						Some(_) => {
							if monitors.is_empty() {
								break;
							}
						}
						None => break,
					}
				}
				maybe_event = rx.recv(), if events_open => {
					match maybe_event {
						Some(event) => {
							self.handle_event(&event, &actions, &mut summary).await;
						}
						None => events_open = false,
					}
				}
			}
		}

		while let Ok(event) = rx.try_recv() {
			self.handle_event(&event, &actions, &mut summary).await;
		}

		if summary.aborted {
			tracing::error!("stack aborted ({} failed)", summary.failed.len());
		} else if summary.failed.is_empty() {
			tracing::info!("stack down: all services exited");
		} else {
			tracing::warn!("stack down: failed services: {}", summary.failed.join(", "));
		}

		Ok(summary)
	}

	/// Cancels every monitor and kills every child process tree. Used for
	/// operator-initiated shutdown (Ctrl-C); monitors see the cancel signal
	/// and do not relaunch.
	pub async fn shutdown(&self) {
		self.supervisor.stop_all().await;
	}

	async fn handle_event(
		&self,
		event: &LaunchEvent,
		actions: &HashMap<String, FailureAction>,
		summary: &mut LaunchSummary,
	) {
		match event {
			LaunchEvent::Started { service, pid } => {
				tracing::info!("{}: started (pid {})", service, pid);
			}
			LaunchEvent::Exited { service, exit_code, clean } => {
				if *clean {
					tracing::info!("{}: exited cleanly", service);
				} else {
					tracing::warn!("{}: exited (code {})", service, exit_code);
				}
			}
			LaunchEvent::Restarting { service, retries, delay_ms, .. } => {
				tracing::info!("{}: restarting in {}ms (attempt {})", service, delay_ms, retries);
			}
			LaunchEvent::GaveUp { service, exit_code } => {
				tracing::error!("{}: gave up (last exit code {})", service, exit_code);
			}
			LaunchEvent::SpawnFailed { service, error } => {
				tracing::error!("{}: {}", service, error);
			}
		}

		if event.is_terminal_failure() {
			let service = event.service().to_string();
			if !summary.failed.contains(&service) {
				summary.failed.push(service.clone());
			}
			if actions.get(&service) == Some(&FailureAction::AbortAll) && !summary.aborted {
				tracing::error!("{}: failure aborts the stack", service);
				summary.aborted = true;
				self.supervisor.stop_all().await;
			}
		}
	}
}
