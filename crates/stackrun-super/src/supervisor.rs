use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, RwLock};

use crate::output::OutputCapture;
use stackrun_core::types::*;

pub struct SupervisorConfig {
	pub log_dir: PathBuf,
	pub max_log_size: u64,
	/// Echo child output to stdout with a per-service prefix.
	pub echo: bool,
}

/// Tracks one monitor loop per service. The loop owns the child process;
/// everything else observes through the shared state map or the event
/// channel. Cancellation (stop/stop_all) is the only way a `Fixed`-policy
/// service ever stays down.
pub struct Supervisor {
	pub services: Arc<RwLock<HashMap<String, Managed>>>,
	pub config: SupervisorConfig,
}

pub struct Managed {
	pub def: ServiceDef,
	pub state: ProcessState,
	pub output: OutputCapture,
	cancel: Option<watch::Sender<bool>>,
}

impl Supervisor {
	pub fn new(config: SupervisorConfig) -> Arc<Self> {
		Arc::new(Self {
			services: Arc::new(RwLock::new(HashMap::new())),
			config,
		})
	}

	/// Registers the service and returns its monitor loop as a future for the
	/// caller to spawn. `index` picks the echo prefix color.
	pub async fn register(
		self: &Arc<Self>,
		def: &ServiceDef,
		index: usize,
		events: Option<mpsc::Sender<LaunchEvent>>,
	) -> Result<impl Future<Output = ()> + Send + 'static, String> {
		{
			let services = self.services.read().await;
			if let Some(managed) = services.get(&def.name) {
				if managed.state.is_running() {
					return Err(format!("{}: already running", def.name));
				}
			}
		}

		let mut output = OutputCapture::new(&self.config.log_dir, &def.name, self.config.max_log_size);
		if self.config.echo {
			output = output.with_echo(echo_prefix(index, &def.name));
		}
		let (cancel_tx, cancel_rx) = watch::channel(false);

		{
			let mut services = self.services.write().await;
			services.insert(
				def.name.clone(),
				Managed {
					def: def.clone(),
					state: ProcessState::Stopped,
					output: output.clone(),
					cancel: Some(cancel_tx),
				},
			);
		}

		let sup = Arc::clone(self);
		let def = def.clone();
		Ok(async move {
			run_service_loop(sup, def, output, cancel_rx, events).await;
		})
	}

	/// Register and spawn in one step.
	pub async fn start(
		self: &Arc<Self>,
		def: &ServiceDef,
		index: usize,
		events: Option<mpsc::Sender<LaunchEvent>>,
	) -> Result<tokio::task::JoinHandle<()>, String> {
		let monitor = self.register(def, index, events).await?;
		Ok(tokio::spawn(monitor))
	}

	/// Cancels the monitor loop and kills the process tree. The cancel signal
	/// is what distinguishes an intentional stop from a crash: a cancelled
	/// service is never relaunched.
	pub async fn stop(self: &Arc<Self>, name: &str) -> Result<String, String> {
		let mut services = self.services.write().await;
		let managed = services
			.get_mut(name)
			.ok_or_else(|| format!("{}: not running", name))?;

		if let Some(cancel) = managed.cancel.take() {
			let _ = cancel.send(true);
		}
		let was_running = managed.state.is_running();
		if let ProcessState::Running { pid, .. } = &managed.state {
			kill_process_tree(*pid);
		}
		managed.state = ProcessState::Stopped;

		if was_running {
			Ok(format!("{}: stopped", name))
		} else {
			Ok(format!("{}: already stopped", name))
		}
	}

	pub async fn stop_all(self: &Arc<Self>) {
		let mut services = self.services.write().await;
		for (_, managed) in services.iter_mut() {
			if let Some(cancel) = managed.cancel.take() {
				let _ = cancel.send(true);
			}
			if let ProcessState::Running { pid, .. } = &managed.state {
				kill_process_tree(*pid);
			}
			managed.state = ProcessState::Stopped;
		}
	}

	pub async fn status(&self) -> Vec<ServiceStatus> {
		let services = self.services.read().await;
		let mut result: Vec<ServiceStatus> = services
			.iter()
			.map(|(name, managed)| {
				let pid = match &managed.state {
					ProcessState::Running { pid, .. } => Some(*pid),
					_ => None,
				};
				ServiceStatus {
					name: name.clone(),
					state: managed.state.clone(),
					pid,
				}
			})
			.collect();
		result.sort_by(|a, b| a.name.cmp(&b.name));
		result
	}

	pub async fn get_output(&self, name: &str) -> Result<OutputCapture, String> {
		let services = self.services.read().await;
		services
			.get(name)
			.map(|managed| managed.output.clone())
			.ok_or_else(|| format!("{}: not found", name))
	}
}

async fn run_service_loop(
	supervisor: Arc<Supervisor>,
	def: ServiceDef,
	output: OutputCapture,
	mut cancel: watch::Receiver<bool>,
	events: Option<mpsc::Sender<LaunchEvent>>,
) {
	let mut retries: u32 = 0;

	loop {
		if *cancel.borrow() {
			return;
		}

		let mut child = match spawn_service(&def) {
			Ok(c) => c,
			Err(e) => {
				let msg = format!("[stackrun] {}: {}\n", def.name, e);
				output.write(msg.as_bytes()).await;
				update_state(&supervisor, &def.name, ProcessState::Failed { exit_code: -1 }).await;
				emit(&events, LaunchEvent::SpawnFailed { service: def.name.clone(), error: e }).await;
				return;
			}
		};

		let pid = child.id().unwrap_or(0);
		let started_at = Instant::now();
		update_state(&supervisor, &def.name, ProcessState::Running { pid, uptime_secs: 0 }).await;
		emit(&events, LaunchEvent::Started { service: def.name.clone(), pid }).await;

		if let Some(stdout) = child.stdout.take() {
			let out = output.clone();
			tokio::spawn(async move {
				pipe_output(stdout, out).await;
			});
		}
		if let Some(stderr) = child.stderr.take() {
			let out = output.clone();
			tokio::spawn(async move {
				pipe_output(stderr, out).await;
			});
		}

		let sup_clone = Arc::clone(&supervisor);
		let name = def.name.clone();
		let cancel_clone = cancel.clone();
		let uptime_handle = tokio::spawn(async move {
			loop {
				tokio::time::sleep(std::time::Duration::from_secs(1)).await;
				if *cancel_clone.borrow() {
					return;
				}
				let uptime = started_at.elapsed().as_secs();
				update_state(&sup_clone, &name, ProcessState::Running { pid, uptime_secs: uptime })
					.await;
			}
		});

		let exit_result = tokio::select! {
			status = child.wait() => status,
			_ = cancel.changed() => {
				let _ = child.kill().await;
				uptime_handle.abort();
				return;
			}
		};

		uptime_handle.abort();

		// Exit code captured straight from wait(), so the logged value is the
		// child's real status. Signal deaths report -1.
		let (exit_code, clean) = match exit_result {
			Ok(exit) => (exit.code().unwrap_or(-1), exit.success()),
			Err(e) => {
				let msg = format!("[stackrun] {}: wait error: {}\n", def.name, e);
				output.write(msg.as_bytes()).await;
				update_state(&supervisor, &def.name, ProcessState::Failed { exit_code: -1 }).await;
				emit(&events, LaunchEvent::GaveUp { service: def.name.clone(), exit_code: -1 }).await;
				return;
			}
		};

		let msg = format!("[stackrun] {}: exited (code {})\n", def.name, exit_code);
		output.write(msg.as_bytes()).await;
		emit(
			&events,
			LaunchEvent::Exited { service: def.name.clone(), exit_code, clean },
		)
		.await;

		if clean {
			retries = 0;
		} else {
			retries += 1;
		}

		// Fixed relaunches after any exit; Backoff only after crashes, until
		// max_retries consecutive failures; Never means one shot.
		let delay = if clean && !def.restart.restarts_on_clean_exit() {
			None
		} else {
			def.restart.next_delay(retries.max(1))
		};

		match delay {
			Some(delay) => {
				update_state(
					&supervisor,
					&def.name,
					ProcessState::Restarting { exit_code, retries },
				)
				.await;
				emit(
					&events,
					LaunchEvent::Restarting {
						service: def.name.clone(),
						exit_code,
						retries,
						delay_ms: delay.as_millis() as u64,
					},
				)
				.await;
				tokio::select! {
					_ = tokio::time::sleep(delay) => {}
					_ = cancel.changed() => return,
				}
			}
			None => {
				if clean {
					update_state(&supervisor, &def.name, ProcessState::Stopped).await;
				} else {
					let msg = format!(
						"[stackrun] {}: giving up after {} failed launch(es)\n",
						def.name, retries
					);
					output.write(msg.as_bytes()).await;
					update_state(&supervisor, &def.name, ProcessState::Failed { exit_code }).await;
					emit(&events, LaunchEvent::GaveUp { service: def.name.clone(), exit_code }).await;
				}
				return;
			}
		}
	}
}

fn spawn_service(def: &ServiceDef) -> Result<Child, String> {
	let mut cmd = Command::new("sh");
	cmd.args(["-c", &def.command])
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.process_group(0);

	if let Some(dir) = &def.dir {
		cmd.current_dir(dir);
	}
	for (key, val) in &def.env {
		cmd.env(key, val);
	}

	cmd.spawn().map_err(|e| format!("spawn failed: {}", e))
}

async fn pipe_output<R: tokio::io::AsyncRead + Unpin>(mut reader: R, output: OutputCapture) {
	let mut buf = [0u8; 4096];
	loop {
		match reader.read(&mut buf).await {
			Ok(0) => break,
			Ok(n) => output.write(&buf[..n]).await,
			Err(_) => break,
		}
	}
}

async fn update_state(supervisor: &Arc<Supervisor>, name: &str, state: ProcessState) {
	let mut services = supervisor.services.write().await;
	if let Some(managed) = services.get_mut(name) {
		managed.state = state;
	}
}

async fn emit(events: &Option<mpsc::Sender<LaunchEvent>>, event: LaunchEvent) {
	if let Some(tx) = events {
		let _ = tx.send(event).await;
	}
}

fn echo_prefix(index: usize, name: &str) -> String {
	use owo_colors::{AnsiColors, OwoColorize};
	const PALETTE: [AnsiColors; 5] = [
		AnsiColors::Cyan,
		AnsiColors::Magenta,
		AnsiColors::Yellow,
		AnsiColors::Blue,
		AnsiColors::Green,
	];
	let color = PALETTE[index % PALETTE.len()];
	format!("[{}]", name).color(color).to_string()
}

/// SIGTERM the whole process group, then SIGKILL whatever survives the grace
/// period. Children are spawned with `process_group(0)`, so this reaches
/// grandchildren spawned by `sh -c`.
pub fn kill_process_tree(pid: u32) {
	use nix::sys::signal::{killpg, Signal};
	use nix::unistd::Pid;
	if pid == 0 {
		return;
	}
	let pgid = Pid::from_raw(pid as i32);
	let _ = killpg(pgid, Signal::SIGTERM);
	std::thread::spawn(move || {
		std::thread::sleep(std::time::Duration::from_secs(3));
		let _ = killpg(pgid, Signal::SIGKILL);
	});
}
