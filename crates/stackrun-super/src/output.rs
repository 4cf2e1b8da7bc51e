use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::Mutex;

use stackrun_core::logs;

const RING_BUFFER_SIZE: usize = 64 * 1024;

/// Sink for one service's combined stdout/stderr. Every write goes to an
/// in-memory ring buffer, to a size-rotated log file, to broadcast
/// subscribers, and — when an echo prefix is set — line by line to the
/// launcher's own stdout so interleaved services stay tellable apart.
#[derive(Clone)]
pub struct OutputCapture {
	ring: Arc<Mutex<VecDeque<u8>>>,
	log_writer: Arc<Mutex<LogWriter>>,
	echo: Option<Arc<Mutex<EchoLines>>>,
	sender: broadcast::Sender<Vec<u8>>,
}

struct LogWriter {
	file: Option<File>,
	path: PathBuf,
	bytes_written: u64,
	max_size: u64,
	log_dir: PathBuf,
	service: String,
}

struct EchoLines {
	prefix: String,
	pending: Vec<u8>,
}

impl OutputCapture {
	pub fn new(log_dir: &Path, service: &str, max_log_size: u64) -> Self {
		let _ = fs::create_dir_all(log_dir);

		let log_path = log_dir.join(logs::current_log_name(service));
		let file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&log_path)
			.ok();
		let bytes_written = file
			.as_ref()
			.and_then(|f| f.metadata().ok())
			.map(|m| m.len())
			.unwrap_or(0);

		let (sender, _) = broadcast::channel(256);

		Self {
			ring: Arc::new(Mutex::new(VecDeque::with_capacity(RING_BUFFER_SIZE))),
			log_writer: Arc::new(Mutex::new(LogWriter {
				file,
				path: log_path,
				bytes_written,
				max_size: max_log_size,
				log_dir: log_dir.to_path_buf(),
				service: service.to_string(),
			})),
			echo: None,
			sender,
		}
	}

	/// Echo complete lines to stdout, each prefixed with `prefix` (which may
	/// already carry ANSI color codes).
	pub fn with_echo(mut self, prefix: String) -> Self {
		self.echo = Some(Arc::new(Mutex::new(EchoLines {
			prefix,
			pending: Vec::new(),
		})));
		self
	}

	pub async fn write(&self, data: &[u8]) {
		{
			let mut ring = self.ring.lock().await;
			for &byte in data {
				if ring.len() >= RING_BUFFER_SIZE {
					ring.pop_front();
				}
				ring.push_back(byte);
			}
		}

		{
			let mut writer = self.log_writer.lock().await;
			writer.write(data);
		}

		if let Some(echo) = &self.echo {
			let mut echo = echo.lock().await;
			echo.feed(data);
		}

		let _ = self.sender.send(data.to_vec());
	}

	pub async fn snapshot(&self) -> Vec<u8> {
		let ring = self.ring.lock().await;
		ring.iter().copied().collect()
	}

	pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
		self.sender.subscribe()
	}
}

impl EchoLines {
	fn feed(&mut self, data: &[u8]) {
		self.pending.extend_from_slice(data);
		while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
			let line: Vec<u8> = self.pending.drain(..=pos).collect();
			let text = String::from_utf8_lossy(&line[..line.len() - 1]).to_string();
			let text = text.strip_suffix('\r').unwrap_or(&text);
			println!("{} {}", self.prefix, text);
		}
	}
}

impl LogWriter {
	fn write(&mut self, data: &[u8]) {
		if let Some(ref mut file) = self.file {
			let _ = file.write_all(data);
			self.bytes_written += data.len() as u64;
			if self.bytes_written >= self.max_size {
				self.rotate();
			}
		}
	}

	fn rotate(&mut self) {
		if let Some(file) = self.file.take() {
			drop(file);
		}

		let rotated = self.log_dir.join(logs::rotated_log_name(&self.log_dir, &self.service));
		let _ = fs::rename(&self.path, &rotated);

		self.path = self.log_dir.join(logs::current_log_name(&self.service));
		self.file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.path)
			.ok();
		self.bytes_written = 0;
	}
}
