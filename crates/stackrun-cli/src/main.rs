use std::collections::HashMap;
use std::time::Duration;

use owo_colors::OwoColorize;
use stackrun_core::config::{self, StackConfig};
use stackrun_core::types::*;
use stackrun_core::logs;
use stackrun_super::launcher::{LaunchSummary, Launcher};
use stackrun_super::supervisor::SupervisorConfig;

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt().init();

	let args: Vec<String> = std::env::args().skip(1).collect();
	if args.is_empty() {
		print_usage();
		return;
	}

	match args[0].as_str() {
		"help" | "--help" | "-h" => print_usage(),
		"version" | "--version" | "-V" => println!("stackrun {}", env!("CARGO_PKG_VERSION")),
		"up" => cmd_up(&args[1..]).await,
		"run" => cmd_run(&args[1..]).await,
		"check" => cmd_check(&args[1..]),
		"show" => cmd_show(&args[1..]),
		name => {
			eprintln!("unknown command: {}", name);
			eprintln!("run 'stackrun help' for usage");
			std::process::exit(1);
		}
	}
}

fn print_usage() {
	eprintln!("{} {} — service stack launcher", "stackrun".bold(), env!("CARGO_PKG_VERSION"));
	eprintln!();
	eprintln!("usage: {} <command> [options]", "stackrun".bold());
	eprintln!();
	eprintln!("{}", "commands".cyan().bold());
	eprintln!("  {}                 Launch every service, stay up until all exit", "up".bold());
	eprintln!("  {} <service>      Supervise a single service in the foreground", "run".bold());
	eprintln!("  {}              Validate the stack file and environment", "check".bold());
	eprintln!("  {} [--json]      Print the resolved stack", "show".bold());
	eprintln!();
	eprintln!("{}", "options".cyan().bold());
	eprintln!("  {} <path>    Stack file (default: ./stack.toml, then the user config dir)", "--config".bold());
}

fn config_flag(args: &[String]) -> Option<&str> {
	let mut iter = args.iter();
	while let Some(arg) = iter.next() {
		if arg == "--config" || arg == "-c" {
			return iter.next().map(|s| s.as_str());
		}
		if let Some(path) = arg.strip_prefix("--config=") {
			return Some(path);
		}
	}
	None
}

fn load_or_exit(args: &[String]) -> StackConfig {
	let path = config::stack_path(config_flag(args));
	match config::load_stack(&path) {
		Ok(stack) => stack,
		Err(e) => {
			eprintln!("{} {}", "error:".red().bold(), e);
			std::process::exit(1);
		}
	}
}

fn env_snapshot() -> HashMap<String, String> {
	std::env::vars().collect()
}

/// Fail-fast gate: nothing is spawned while any credential or directory the
/// stack declares is missing.
fn validate_or_exit(stack: &StackConfig) {
	let issues = stack.validate(&env_snapshot());
	if !issues.is_empty() {
		eprintln!("{}", "stack validation failed:".red().bold());
		for issue in &issues {
			eprintln!("  {} {}", "✗".red(), issue);
		}
		std::process::exit(1);
	}
}

async fn cmd_up(args: &[String]) {
	let stack = load_or_exit(args);
	validate_or_exit(&stack);

	logs::expire_logs(&stack.log_dir, stack.logs.max_age_days, stack.logs.max_files);
	{
		let log_dir = stack.log_dir.clone();
		let logs_cfg = stack.logs.clone();
		tokio::spawn(async move {
			loop {
				tokio::time::sleep(Duration::from_secs(3600)).await;
				logs::expire_logs(&log_dir, logs_cfg.max_age_days, logs_cfg.max_files);
			}
		});
	}

	let launcher = Launcher::new(SupervisorConfig {
		log_dir: stack.log_dir.clone(),
		max_log_size: stack.logs.max_size_bytes,
		echo: true,
	});

	let summary = launch(&launcher, &stack.services).await;
	if !summary.is_clean() {
		std::process::exit(1);
	}
}

async fn cmd_run(args: &[String]) {
	let name = match args.iter().find(|a| !a.starts_with('-') && Some(a.as_str()) != config_flag(args)) {
		Some(n) => n.clone(),
		None => {
			eprintln!("usage: stackrun run <service> [--config <path>]");
			std::process::exit(1);
		}
	};

	let stack = load_or_exit(args);
	let def = match stack.service(&name) {
		Some(def) => def.clone(),
		None => {
			let known: Vec<&str> = stack.services.iter().map(|s| s.name.as_str()).collect();
			eprintln!("{} unknown service: {}", "error:".red().bold(), name);
			if !known.is_empty() {
				eprintln!("configured services: {}", known.join(", "));
			}
			std::process::exit(1);
		}
	};

	let single = StackConfig {
		log_dir: stack.log_dir.clone(),
		logs: stack.logs.clone(),
		services: vec![def.clone()],
	};
	validate_or_exit(&single);

	let launcher = Launcher::new(SupervisorConfig {
		log_dir: stack.log_dir.clone(),
		max_log_size: stack.logs.max_size_bytes,
		echo: true,
	});

	let summary = launch(&launcher, &single.services).await;
	if !summary.is_clean() {
		std::process::exit(1);
	}
}

/// Runs the launcher and turns Ctrl-C into a cancel-and-drain shutdown, so an
/// operator interrupt is an intentional stop rather than a crash.
async fn launch(launcher: &Launcher, services: &[ServiceDef]) -> LaunchSummary {
	let up = launcher.up(services);
	tokio::pin!(up);

	let result = tokio::select! {
		res = &mut up => res,
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("interrupt: shutting the stack down");
			launcher.shutdown().await;
			match tokio::time::timeout(Duration::from_secs(10), up).await {
				Ok(res) => res,
				Err(_) => Ok(LaunchSummary::default()),
			}
		}
	};

	match result {
		Ok(summary) => summary,
		Err(e) => {
			eprintln!("{} {}", "error:".red().bold(), e);
			std::process::exit(1);
		}
	}
}

fn cmd_check(args: &[String]) {
	let stack = load_or_exit(args);
	let issues = stack.validate(&env_snapshot());
	if issues.is_empty() {
		println!(
			"{} {} service(s), log dir {}",
			"ok:".green().bold(),
			stack.services.len(),
			stack.log_dir.display()
		);
	} else {
		eprintln!("{}", "stack validation failed:".red().bold());
		for issue in &issues {
			eprintln!("  {} {}", "✗".red(), issue);
		}
		std::process::exit(1);
	}
}

fn cmd_show(args: &[String]) {
	let stack = load_or_exit(args);

	if args.iter().any(|a| a == "--json") {
		match serde_json::to_string_pretty(&stack.services) {
			Ok(json) => println!("{}", json),
			Err(e) => {
				eprintln!("{} {}", "error:".red().bold(), e);
				std::process::exit(1);
			}
		}
		return;
	}

	println!("log dir: {}", stack.log_dir.display());
	for svc in &stack.services {
		println!();
		println!("{}", svc.name.bold());
		println!("  command:    {}", svc.command);
		if let Some(dir) = &svc.dir {
			println!("  dir:        {}", dir.display());
		}
		println!("  restart:    {}", describe_policy(&svc.restart));
		println!("  on_failure: {}", describe_action(svc.on_failure));
		if !svc.required_env.is_empty() {
			println!("  required:   {}", svc.required_env.join(", "));
		}
		if !svc.env.is_empty() {
			// Names only; values may be credentials.
			let mut keys: Vec<&str> = svc.env.keys().map(|k| k.as_str()).collect();
			keys.sort();
			println!("  env:        {}", keys.join(", "));
		}
	}
}

fn describe_policy(policy: &RestartPolicy) -> String {
	match policy {
		RestartPolicy::Never => "never".to_string(),
		RestartPolicy::Fixed { delay_secs } => format!("fixed ({}s delay)", delay_secs),
		RestartPolicy::Backoff { base_ms, max_ms, max_retries } => {
			format!("backoff ({}ms..{}ms, {} retries)", base_ms, max_ms, max_retries)
		}
	}
}

fn describe_action(action: FailureAction) -> &'static str {
	match action {
		FailureAction::Ignore => "ignore",
		FailureAction::AbortAll => "abort_all",
	}
}
