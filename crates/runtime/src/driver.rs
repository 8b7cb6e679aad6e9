//! Driver discovery.
//!
//! The remote runtime is an external executable speaking the framed protocol
//! on stdio. It is located in this order:
//! 1. `PILOT_DRIVER_PATH` (with optional whitespace-separated `PILOT_DRIVER_ARGS`)
//! 2. a `pilot-driver` binary on `PATH`

use std::ffi::OsString;
use std::path::PathBuf;

use tracing::warn;

use crate::error::{Error, Result};

/// Environment variable naming the driver executable.
pub const DRIVER_PATH_ENV: &str = "PILOT_DRIVER_PATH";

/// Environment variable with extra driver arguments.
pub const DRIVER_ARGS_ENV: &str = "PILOT_DRIVER_ARGS";

/// Binary looked up on `PATH` when no override is set.
pub const DRIVER_BINARY: &str = "pilot-driver";

/// A resolved driver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCommand {
	pub program: PathBuf,
	pub args: Vec<String>,
}

/// Locates the driver executable.
///
/// # Errors
///
/// Returns [`Error::DriverNotFound`] if no candidate exists.
pub fn get_driver_executable() -> Result<DriverCommand> {
	let args = std::env::var(DRIVER_ARGS_ENV).ok();

	if let Some(command) = from_env_values(std::env::var_os(DRIVER_PATH_ENV), args.as_deref()) {
		return Ok(command);
	}

	match which::which(DRIVER_BINARY) {
		Ok(program) => {
			tracing::debug!(program = %program.display(), "driver found on PATH");
			Ok(DriverCommand {
				program,
				args: split_args(args.as_deref()),
			})
		}
		Err(_) => Err(Error::DriverNotFound),
	}
}

fn from_env_values(path: Option<OsString>, args: Option<&str>) -> Option<DriverCommand> {
	let program = PathBuf::from(path?);
	if program.as_os_str().is_empty() {
		return None;
	}
	if !program.is_file() {
		warn!(
			program = %program.display(),
			"{DRIVER_PATH_ENV} is set but does not point at a file; falling back"
		);
		return None;
	}
	Some(DriverCommand {
		program,
		args: split_args(args),
	})
}

fn split_args(args: Option<&str>) -> Vec<String> {
	args.map(|a| a.split_whitespace().map(str::to_string).collect())
		.unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_env_override_with_args() {
		let dir = tempfile::tempdir().unwrap();
		let exe = dir.path().join("driver");
		std::fs::write(&exe, b"#!/bin/sh\n").unwrap();

		let command = from_env_values(Some(exe.clone().into_os_string()), Some("run-driver  --quiet"))
			.expect("existing file is accepted");
		assert_eq!(command.program, exe);
		assert_eq!(command.args, vec!["run-driver", "--quiet"]);
	}

	#[test]
	fn test_env_override_missing_file_falls_back() {
		let dir = tempfile::tempdir().unwrap();
		let missing = dir.path().join("nope");
		assert!(from_env_values(Some(missing.into_os_string()), None).is_none());
		assert!(from_env_values(Some(OsString::new()), None).is_none());
		assert!(from_env_values(None, Some("x")).is_none());
	}
}
