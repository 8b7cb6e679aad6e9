//! Default `User-Agent` for request contexts.
//!
//! Format: `Pilot/<version> (<arch>; <os> <os version>) rust/<rust version>`,
//! followed by ` CI/1` when running under CI.

use std::sync::OnceLock;

/// Returns the cached default user agent.
pub fn default_user_agent() -> &'static str {
	static USER_AGENT: OnceLock<String> = OnceLock::new();
	USER_AGENT.get_or_init(|| {
		let (os_name, os_version) = os_info();
		format_user_agent(
			env!("CARGO_PKG_VERSION"),
			std::env::consts::ARCH,
			&os_name,
			&os_version,
			env!("CARGO_PKG_RUST_VERSION"),
			is_ci(std::env::var("CI").ok().as_deref()),
		)
	})
}

pub(crate) fn format_user_agent(
	version: &str,
	arch: &str,
	os_name: &str,
	os_version: &str,
	rust_version: &str,
	ci: bool,
) -> String {
	let rust_version = if rust_version.is_empty() { "unknown" } else { rust_version };
	let mut ua = format!("Pilot/{version} ({arch}; {os_name} {os_version}) rust/{rust_version}");
	if ci {
		ua.push_str(" CI/1");
	}
	ua
}

fn is_ci(value: Option<&str>) -> bool {
	matches!(value, Some(v) if !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
}

#[cfg(target_os = "linux")]
fn os_info() -> (String, String) {
	std::fs::read_to_string("/etc/os-release")
		.map(|text| parse_os_release(&text))
		.unwrap_or_else(|_| ("linux".to_string(), "unknown".to_string()))
}

#[cfg(target_os = "macos")]
fn os_info() -> (String, String) {
	let version = std::process::Command::new("sw_vers")
		.arg("-productVersion")
		.output()
		.ok()
		.and_then(|out| String::from_utf8(out.stdout).ok())
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty())
		.unwrap_or_else(|| "unknown".to_string());
	("macOS".to_string(), version)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn os_info() -> (String, String) {
	(std::env::consts::OS.to_string(), "unknown".to_string())
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_os_release(text: &str) -> (String, String) {
	let field = |key: &str| {
		text.lines()
			.filter_map(|line| line.split_once('='))
			.find(|(k, _)| k.trim() == key)
			.map(|(_, v)| v.trim().trim_matches('"').to_string())
			.filter(|v| !v.is_empty())
	};
	(
		field("ID").unwrap_or_else(|| "linux".to_string()),
		field("VERSION_ID").unwrap_or_else(|| "unknown".to_string()),
	)
}

#[cfg(test)]
mod tests {
	use regex::Regex;

	use super::*;

	#[test]
	fn test_format() {
		assert_eq!(
			format_user_agent("0.1.0", "x86_64", "ubuntu", "22.04", "1.85", false),
			"Pilot/0.1.0 (x86_64; ubuntu 22.04) rust/1.85"
		);
		assert_eq!(
			format_user_agent("0.1.0", "aarch64", "macOS", "14.2", "1.85", true),
			"Pilot/0.1.0 (aarch64; macOS 14.2) rust/1.85 CI/1"
		);
	}

	#[test]
	fn test_default_matches_shape() {
		let re = Regex::new(r"^Pilot/\d+\.\d+\.\d+ \([^;]+; \S+ [^)]+\) rust/[\w.]+( CI/1)?$").unwrap();
		assert!(re.is_match(default_user_agent()), "{}", default_user_agent());
	}

	#[test]
	fn test_ci_detection() {
		assert!(is_ci(Some("true")));
		assert!(is_ci(Some("1")));
		assert!(!is_ci(Some("")));
		assert!(!is_ci(Some("false")));
		assert!(!is_ci(Some("0")));
		assert!(!is_ci(None));
	}

	#[test]
	fn test_parse_os_release() {
		let text = "NAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID=\"22.04\"\n";
		assert_eq!(parse_os_release(text), ("ubuntu".to_string(), "22.04".to_string()));
		assert_eq!(
			parse_os_release("ID=manjaro\n"),
			("manjaro".to_string(), "unknown".to_string())
		);
	}
}
