//! Driver process lifecycle.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::driver::get_driver_executable;
use crate::error::{Error, Result};

/// Grace period after spawn in which an exit counts as a failed launch.
const STARTUP_GRACE: Duration = Duration::from_millis(100);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The driver child process. Killed when dropped.
///
/// Commands go to its stdin and replies come from its stdout. Its stderr
/// passes through to ours.
#[derive(Debug)]
pub struct DriverProcess {
	child: Child,
}

impl DriverProcess {
	/// Spawns the driver found by [`get_driver_executable`].
	///
	/// # Errors
	///
	/// [`Error::DriverNotFound`] when there is no driver to run, and
	/// [`Error::LaunchFailed`] when it does not start or dies during startup.
	pub async fn launch() -> Result<Self> {
		let driver = get_driver_executable()?;
		tracing::debug!(program = %driver.program.display(), args = ?driver.args, "launching driver");

		let mut child = Command::new(&driver.program)
			.args(&driver.args)
			.env("PILOT_LANG_NAME", "rust")
			.env("PILOT_CLIENT_VERSION", env!("CARGO_PKG_VERSION"))
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| Error::LaunchFailed(format!("spawn {}: {e}", driver.program.display())))?;

		tokio::time::sleep(STARTUP_GRACE).await;
		if let Some(status) = child.try_wait()? {
			return Err(Error::LaunchFailed(format!("driver exited during startup ({status})")));
		}
		Ok(Self { child })
	}

	/// Hands out the protocol pipes. A second call fails.
	pub fn take_stdio(&mut self) -> Result<(ChildStdin, ChildStdout)> {
		match (self.child.stdin.take(), self.child.stdout.take()) {
			(Some(stdin), Some(stdout)) => Ok((stdin, stdout)),
			_ => Err(Error::LaunchFailed("driver pipes already taken".to_string())),
		}
	}

	/// Kills the driver and reaps it.
	pub async fn shutdown(mut self) -> Result<()> {
		self.child.kill().await?;
		tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait())
			.await
			.map_err(|_| {
				Error::LaunchFailed(format!("driver still running after {}s", SHUTDOWN_GRACE.as_secs()))
			})??;
		tracing::debug!("driver stopped");
		Ok(())
	}
}
