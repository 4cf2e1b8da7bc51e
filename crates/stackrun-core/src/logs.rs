//! Log file naming and expiry. One flat directory per stack, one dated file
//! per service: `api-260825.log`, rotated to `api-260825-14.log` (hour) or
//! `api-260825-14.37.log` when a same-hour rotation already exists.

use std::path::{Path, PathBuf};

pub fn current_log_name(service: &str) -> String {
	format!("{}-{}.log", service, today_yymmdd())
}

pub fn rotated_log_name(log_dir: &Path, service: &str) -> String {
	let (date, hour, minute) = now_parts();
	let candidate = format!("{}-{}-{}.log", service, date, hour);
	if log_dir.join(&candidate).exists() {
		format!("{}-{}-{}.{}.log", service, date, hour, minute)
	} else {
		candidate
	}
}

/// Extracts `(yy, mm, dd)` from a log file name produced above.
pub fn parse_log_date(filename: &str) -> Option<(u32, u32, u32)> {
	let stem = filename.strip_suffix(".log")?;
	let date_part = stem
		.split('-')
		.find(|part| part.len() == 6 && part.chars().all(|c| c.is_ascii_digit()))?;
	let year: u32 = date_part[..2].parse().ok()?;
	let month: u32 = date_part[2..4].parse().ok()?;
	let day: u32 = date_part[4..].parse().ok()?;
	if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
		return None;
	}
	Some((year, month, day))
}

/// Deletes log files older than `max_age_days` and, past `max_files` per
/// service, the oldest by modification time. Zero disables either limit.
pub fn expire_logs(log_dir: &Path, max_age_days: u32, max_files: u32) {
	let entries = match std::fs::read_dir(log_dir) {
		Ok(e) => e,
		Err(_) => return,
	};

	let mut per_service: std::collections::HashMap<String, Vec<PathBuf>> =
		std::collections::HashMap::new();

	for entry in entries.flatten() {
		let path = entry.path();
		if path.extension().and_then(|e| e.to_str()) != Some("log") {
			continue;
		}
		let name = match path.file_name().and_then(|n| n.to_str()) {
			Some(n) => n.to_string(),
			None => continue,
		};

		if max_age_days > 0 {
			if let Some((y, m, d)) = parse_log_date(&name) {
				let cutoff = now_epoch().saturating_sub(max_age_days as u64 * 86400);
				if date_to_epoch(y, m, d) < cutoff {
					let _ = std::fs::remove_file(&path);
					continue;
				}
			}
		}

		per_service.entry(service_from_log_name(&name)).or_default().push(path);
	}

	if max_files == 0 {
		return;
	}
	for (_, mut files) in per_service {
		if files.len() <= max_files as usize {
			continue;
		}
		files.sort_by_key(|p| p.metadata().and_then(|m| m.modified()).ok());
		let excess = files.len() - max_files as usize;
		for path in files.iter().take(excess) {
			let _ = std::fs::remove_file(path);
		}
	}
}

/// Everything before the date token, so `voice-agent-260214-09.log` groups
/// under `voice-agent`.
fn service_from_log_name(name: &str) -> String {
	let stem = name.strip_suffix(".log").unwrap_or(name);
	let parts: Vec<&str> = stem.split('-').collect();
	let date_idx = parts
		.iter()
		.position(|part| part.len() == 6 && part.chars().all(|c| c.is_ascii_digit()));
	match date_idx {
		Some(i) if i > 0 => parts[..i].join("-"),
		_ => stem.to_string(),
	}
}

/// Civil-from-days conversion (proleptic Gregorian), no external time crate.
pub fn secs_to_datetime(secs: u64) -> (u32, u32, u32, u32, u32) {
	let days = (secs / 86400) as i64;
	let rem = secs % 86400;
	let hour = (rem / 3600) as u32;
	let minute = ((rem % 3600) / 60) as u32;

	let z = days + 719468;
	let era = if z >= 0 { z } else { z - 146096 } / 146097;
	let doe = (z - era * 146097) as u32;
	let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
	let year = yoe as i64 + era * 400;
	let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
	let mp = (5 * doy + 2) / 153;
	let day = doy - (153 * mp + 2) / 5 + 1;
	let month = if mp < 10 { mp + 3 } else { mp - 9 };
	let year = if month <= 2 { year + 1 } else { year };

	(year as u32, month, day, hour, minute)
}

fn date_to_epoch(yy: u32, month: u32, day: u32) -> u64 {
	let year = (2000 + yy) as i64;
	let m = month as i64;
	let d = day as i64;

	let y = if m <= 2 { year - 1 } else { year };
	let mp = if m <= 2 { m + 9 } else { m - 3 };
	let era = if y >= 0 { y } else { y - 399 } / 400;
	let yoe = y - era * 400;
	let doy = (153 * mp + 2) / 5 + d - 1;
	let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
	let days = era * 146097 + doe - 719468;
	(days * 86400) as u64
}

fn now_epoch() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

fn today_yymmdd() -> String {
	let (year, month, day, _, _) = secs_to_datetime(now_epoch());
	format!("{:02}{:02}{:02}", year % 100, month, day)
}

fn now_parts() -> (String, String, String) {
	let (year, month, day, hour, minute) = secs_to_datetime(now_epoch());
	(
		format!("{:02}{:02}{:02}", year % 100, month, day),
		format!("{:02}", hour),
		format!("{:02}", minute),
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn current_name_format() {
		let name = current_log_name("api");
		assert!(name.starts_with("api-"));
		assert!(name.ends_with(".log"));
	}

	#[test]
	fn parses_log_dates() {
		assert_eq!(parse_log_date("api-260214.log"), Some((26, 2, 14)));
		assert_eq!(parse_log_date("voice-agent-260214-09.log"), Some((26, 2, 14)));
		assert_eq!(parse_log_date("voice-agent-260214-09.47.log"), Some((26, 2, 14)));
		assert_eq!(parse_log_date("notalog.txt"), None);
		assert_eq!(parse_log_date("api-999999.log"), None);
	}

	#[test]
	fn groups_by_service_name() {
		assert_eq!(service_from_log_name("api-260214.log"), "api");
		assert_eq!(service_from_log_name("voice-agent-260214-09.log"), "voice-agent");
		assert_eq!(service_from_log_name("weird.log"), "weird");
	}

	#[test]
	fn civil_date_roundtrip() {
		let (y, m, d, h, min) = secs_to_datetime(1771027200);
		assert_eq!((y, m, d, h, min), (2026, 2, 14, 0, 0));
		assert_eq!(date_to_epoch(26, 2, 14), 1771027200);
	}

	#[test]
	fn expiry_by_count() {
		let dir = std::env::temp_dir().join("stackrun-logs-expiry-count");
		let _ = std::fs::remove_dir_all(&dir);
		std::fs::create_dir_all(&dir).unwrap();
		for i in 0..4 {
			std::fs::write(dir.join(format!("api-2602{:02}.log", 10 + i)), "x").unwrap();
		}
		std::fs::write(dir.join("voice-260210.log"), "x").unwrap();

		expire_logs(&dir, 0, 2);

		let api_count = std::fs::read_dir(&dir)
			.unwrap()
			.flatten()
			.filter(|e| e.file_name().to_string_lossy().starts_with("api-"))
			.count();
		assert_eq!(api_count, 2);
		assert!(dir.join("voice-260210.log").exists());
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[test]
	fn expiry_by_age() {
		let dir = std::env::temp_dir().join("stackrun-logs-expiry-age");
		let _ = std::fs::remove_dir_all(&dir);
		std::fs::create_dir_all(&dir).unwrap();
		std::fs::write(dir.join("api-200101.log"), "x").unwrap();
		let fresh = current_log_name("api");
		std::fs::write(dir.join(&fresh), "x").unwrap();

		expire_logs(&dir, 7, 0);

		assert!(!dir.join("api-200101.log").exists());
		assert!(dir.join(&fresh).exists());
		let _ = std::fs::remove_dir_all(&dir);
	}
}
