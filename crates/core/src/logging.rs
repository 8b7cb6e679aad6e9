//! Opt-in `tracing` subscriber for binaries and tests built on this crate.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Installs a compact stderr subscriber.
///
/// `RUST_LOG` wins over `verbosity`. `0` logs warnings, `1` debug, `2` and
/// above trace. Calling it again is a no-op.
pub fn init_logging(verbosity: u8) {
	let default_level = match verbosity {
		0 => "pilot=warn,pilot_runtime=warn",
		1 => "pilot=debug,pilot_runtime=debug",
		_ => "pilot=trace,pilot_runtime=trace",
	};
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	let _ = tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.try_init();
}
