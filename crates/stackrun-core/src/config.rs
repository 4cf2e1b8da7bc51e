use crate::types::{FailureAction, RestartPolicy, ServiceDef};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// On-disk stack file (`stack.toml`). Raw deserialization target; turned into
/// a [`StackConfig`] by [`StackFile::resolve`].
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StackFile {
	pub log_dir: Option<String>,
	#[serde(default)]
	pub logs: LogsConfig,
	#[serde(default)]
	pub defaults: DefaultsConfig,
	#[serde(default)]
	pub services: BTreeMap<String, ServiceToml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
	#[serde(default = "default_max_size")]
	pub max_size_bytes: u64,
	#[serde(default = "default_max_age_days")]
	pub max_age_days: u32,
	#[serde(default = "default_max_files")]
	pub max_files: u32,
}

impl Default for LogsConfig {
	fn default() -> Self {
		Self {
			max_size_bytes: default_max_size(),
			max_age_days: default_max_age_days(),
			max_files: default_max_files(),
		}
	}
}

fn default_max_size() -> u64 {
	10 * 1024 * 1024
}
fn default_max_age_days() -> u32 {
	7
}
fn default_max_files() -> u32 {
	5
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
	#[serde(default)]
	pub restart: RestartPolicy,
	#[serde(default)]
	pub on_failure: FailureAction,
	#[serde(default)]
	pub env: HashMap<String, String>,
}

impl Default for DefaultsConfig {
	fn default() -> Self {
		Self {
			restart: RestartPolicy::default(),
			on_failure: FailureAction::default(),
			env: HashMap::new(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceToml {
	pub command: String,
	pub dir: Option<String>,
	#[serde(default)]
	pub env: HashMap<String, String>,
	#[serde(default)]
	pub required_env: Vec<String>,
	pub restart: Option<RestartPolicy>,
	pub on_failure: Option<FailureAction>,
}

/// Fully resolved stack: per-service defaults applied, paths expanded.
/// Assembled once at startup and handed to the supervision engine.
#[derive(Debug, Clone)]
pub struct StackConfig {
	pub log_dir: PathBuf,
	pub logs: LogsConfig,
	pub services: Vec<ServiceDef>,
}

impl StackFile {
	pub fn resolve(&self) -> StackConfig {
		let log_dir = self
			.log_dir
			.as_deref()
			.map(expand_tilde)
			.unwrap_or_else(default_log_dir);

		let services = self
			.services
			.iter()
			.map(|(name, svc)| {
				let mut env = self.defaults.env.clone();
				env.extend(svc.env.clone());
				ServiceDef {
					name: name.clone(),
					command: svc.command.clone(),
					dir: svc.dir.as_deref().map(expand_tilde),
					env,
					required_env: svc.required_env.clone(),
					restart: svc.restart.clone().unwrap_or_else(|| self.defaults.restart.clone()),
					on_failure: svc.on_failure.unwrap_or(self.defaults.on_failure),
				}
			})
			.collect();

		StackConfig {
			log_dir,
			logs: self.logs.clone(),
			services,
		}
	}
}

impl StackConfig {
	pub fn service(&self, name: &str) -> Option<&ServiceDef> {
		self.services.iter().find(|s| s.name == name)
	}

	/// Fail-fast startup validation. Returns every problem found so the
	/// operator sees the full list in one pass: an empty stack, credentials
	/// named in `required_env` that are neither in the service's own env map
	/// nor in `parent_env`, and working directories that do not exist.
	pub fn validate(&self, parent_env: &HashMap<String, String>) -> Vec<String> {
		let mut issues = Vec::new();

		if self.services.is_empty() {
			issues.push("no services defined".to_string());
		}

		for svc in &self.services {
			if svc.command.trim().is_empty() {
				issues.push(format!("{}: empty command", svc.name));
			}
			for var in &svc.required_env {
				let present = svc.env.contains_key(var)
					|| parent_env.get(var).map(|v| !v.is_empty()).unwrap_or(false);
				if !present {
					issues.push(format!("{}: missing required env var {}", svc.name, var));
				}
			}
			if let Some(dir) = &svc.dir {
				if !dir.is_dir() {
					issues.push(format!("{}: dir does not exist: {}", svc.name, dir.display()));
				}
			}
		}

		issues
	}
}

pub fn load_stack(path: &Path) -> Result<StackConfig, String> {
	let content = std::fs::read_to_string(path)
		.map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
	let file: StackFile = toml::from_str(&content)
		.map_err(|e| format!("failed to parse {}: {}", path.display(), e))?;
	Ok(file.resolve())
}

/// Resolution order: explicit flag, `./stack.toml`, then the user config dir.
pub fn stack_path(flag: Option<&str>) -> PathBuf {
	if let Some(p) = flag {
		return expand_tilde(p);
	}
	let local = PathBuf::from("stack.toml");
	if local.exists() {
		return local;
	}
	config_dir().join("stack.toml")
}

pub fn config_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
		PathBuf::from(dir).join("stackrun")
	} else if let Some(home) = home_dir() {
		home.join(".config").join("stackrun")
	} else {
		PathBuf::from("/tmp/stackrun/config")
	}
}

pub fn state_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("XDG_STATE_HOME") {
		PathBuf::from(dir).join("stackrun")
	} else if let Some(home) = home_dir() {
		home.join(".local").join("state").join("stackrun")
	} else {
		PathBuf::from("/tmp/stackrun")
	}
}

fn default_log_dir() -> PathBuf {
	state_dir().join("logs")
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME").ok().map(PathBuf::from)
}

fn expand_tilde(path: &str) -> PathBuf {
	if let Some(rest) = path.strip_prefix("~/") {
		if let Some(home) = home_dir() {
			return home.join(rest);
		}
	}
	PathBuf::from(path)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::RestartPolicy;

	fn parse(content: &str) -> StackConfig {
		let file: StackFile = toml::from_str(content).unwrap();
		file.resolve()
	}

	#[test]
	fn parses_minimal_stack() {
		let stack = parse(
			r#"
			[services.api]
			command = "leadgen-api dev"
			"#,
		);
		assert_eq!(stack.services.len(), 1);
		let api = stack.service("api").unwrap();
		assert_eq!(api.command, "leadgen-api dev");
		assert_eq!(api.restart, RestartPolicy::Fixed { delay_secs: 3 });
		assert_eq!(api.on_failure, FailureAction::Ignore);
	}

	#[test]
	fn service_overrides_defaults() {
		let stack = parse(
			r#"
			[defaults]
			on_failure = "abort_all"
			[defaults.restart]
			mode = "fixed"
			delay_secs = 10

			[defaults.env]
			LOG_LEVEL = "info"

			[services.voice]
			command = "voice-agent dev"
			on_failure = "ignore"
			[services.voice.restart]
			mode = "backoff"
			base_ms = 500
			max_ms = 30000
			max_retries = 5

			[services.voice.env]
			LOG_LEVEL = "debug"

			[services.caller]
			command = "outbound-caller"
			"#,
		);
		let voice = stack.service("voice").unwrap();
		assert_eq!(
			voice.restart,
			RestartPolicy::Backoff { base_ms: 500, max_ms: 30000, max_retries: 5 }
		);
		assert_eq!(voice.on_failure, FailureAction::Ignore);
		assert_eq!(voice.env.get("LOG_LEVEL").unwrap(), "debug");

		let caller = stack.service("caller").unwrap();
		assert_eq!(caller.restart, RestartPolicy::Fixed { delay_secs: 10 });
		assert_eq!(caller.on_failure, FailureAction::AbortAll);
		assert_eq!(caller.env.get("LOG_LEVEL").unwrap(), "info");
	}

	#[test]
	fn validate_rejects_empty_stack() {
		let stack = parse("");
		let issues = stack.validate(&HashMap::new());
		assert_eq!(issues, vec!["no services defined".to_string()]);
	}

	#[test]
	fn validate_reports_missing_required_env() {
		let stack = parse(
			r#"
			[services.api]
			command = "leadgen-api dev"
			required_env = ["OPENAI_API_KEY", "TWILIO_AUTH_TOKEN"]
			[services.api.env]
			TWILIO_AUTH_TOKEN = "tok"
			"#,
		);
		let mut parent = HashMap::new();
		parent.insert("UNRELATED".to_string(), "x".to_string());
		let issues = stack.validate(&parent);
		assert_eq!(issues.len(), 1);
		assert!(issues[0].contains("OPENAI_API_KEY"));
	}

	#[test]
	fn validate_accepts_env_from_parent() {
		let stack = parse(
			r#"
			[services.api]
			command = "leadgen-api dev"
			required_env = ["OPENAI_API_KEY"]
			"#,
		);
		let mut parent = HashMap::new();
		parent.insert("OPENAI_API_KEY".to_string(), "sk-test".to_string());
		assert!(stack.validate(&parent).is_empty());
	}

	#[test]
	fn validate_rejects_empty_parent_value() {
		let stack = parse(
			r#"
			[services.api]
			command = "leadgen-api dev"
			required_env = ["OPENAI_API_KEY"]
			"#,
		);
		let mut parent = HashMap::new();
		parent.insert("OPENAI_API_KEY".to_string(), String::new());
		assert_eq!(stack.validate(&parent).len(), 1);
	}

	#[test]
	fn validate_rejects_missing_dir() {
		let stack = parse(
			r#"
			[services.api]
			command = "leadgen-api dev"
			dir = "/nonexistent/stackrun-test-dir"
			"#,
		);
		let issues = stack.validate(&HashMap::new());
		assert_eq!(issues.len(), 1);
		assert!(issues[0].contains("dir does not exist"));
	}

	#[test]
	fn logs_defaults() {
		let stack = parse("");
		assert_eq!(stack.logs.max_size_bytes, 10 * 1024 * 1024);
		assert_eq!(stack.logs.max_age_days, 7);
		assert_eq!(stack.logs.max_files, 5);
	}
}
