//! Timeout precedence.
//!
//! Timeouts are given in milliseconds as `f64`, matching the wire options.
//! An explicit per-call value beats the owner's default, and `0` means "no
//! timeout" wherever it appears.

use std::time::Duration;

use parking_lot::Mutex;
use pilot_runtime::{Error, Result};

/// Default timeout for page commands and waits.
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_millis(30_000);

#[derive(Debug, Default)]
pub struct TimeoutSettings {
	default: Mutex<Option<f64>>,
	fallback: Option<Duration>,
}

impl TimeoutSettings {
	/// Settings with no default and the given fallback.
	pub fn new(fallback: Option<Duration>) -> Self {
		Self {
			default: Mutex::new(None),
			fallback,
		}
	}

	pub fn set_default_timeout(&self, timeout_ms: Option<f64>) {
		*self.default.lock() = timeout_ms;
	}

	pub fn default_timeout(&self) -> Option<f64> {
		*self.default.lock()
	}

	/// Resolves the effective bound for one call. `Ok(None)` means unbounded.
	///
	/// # Errors
	///
	/// Returns [`Error::InvalidArgument`] for negative or non-finite values.
	pub fn timeout(&self, explicit: Option<f64>) -> Result<Option<Duration>> {
		match explicit.or(self.default_timeout()) {
			Some(ms) => to_duration(ms),
			None => Ok(self.fallback),
		}
	}

	/// Milliseconds to forward to the remote; `0` means unbounded.
	pub fn timeout_ms(&self, explicit: Option<f64>) -> Result<f64> {
		Ok(self
			.timeout(explicit)?
			.map_or(0.0, |d| d.as_millis() as f64))
	}
}

fn to_duration(ms: f64) -> Result<Option<Duration>> {
	if !ms.is_finite() || ms < 0.0 {
		return Err(Error::InvalidArgument(format!(
			"timeout must be a non-negative number of milliseconds, got {ms}"
		)));
	}
	if ms == 0.0 {
		return Ok(None);
	}
	Ok(Some(Duration::from_nanos((ms * 1_000_000.0).round() as u64)))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_explicit_beats_default_in_both_directions() {
		let settings = TimeoutSettings::new(None);
		settings.set_default_timeout(Some(1000.0));
		assert_eq!(settings.timeout(Some(0.0)).unwrap(), None);
		assert_eq!(settings.timeout(None).unwrap(), Some(Duration::from_secs(1)));

		settings.set_default_timeout(Some(0.0));
		assert_eq!(settings.timeout(Some(5.0)).unwrap(), Some(Duration::from_millis(5)));
		assert_eq!(settings.timeout(None).unwrap(), None);
	}

	#[test]
	fn test_fallback_applies_without_any_value() {
		let settings = TimeoutSettings::new(Some(DEFAULT_PAGE_TIMEOUT));
		assert_eq!(settings.timeout(None).unwrap(), Some(DEFAULT_PAGE_TIMEOUT));
		assert_eq!(settings.timeout_ms(None).unwrap(), 30_000.0);
		assert_eq!(settings.timeout_ms(Some(0.0)).unwrap(), 0.0);
		assert!(TimeoutSettings::new(None).timeout(None).unwrap().is_none());
	}

	#[test]
	fn test_rejects_invalid_values() {
		let settings = TimeoutSettings::default();
		assert!(matches!(settings.timeout(Some(-1.0)), Err(Error::InvalidArgument(_))));
		assert!(matches!(settings.timeout(Some(f64::NAN)), Err(Error::InvalidArgument(_))));
	}
}
