//! The one error type shared by every pilot crate.
//!
//! Variants fall into three groups: failures of the plumbing itself
//! (driver, transport, protocol), failures reported by the remote side, and
//! client-side policy outcomes (timeouts, disposal, closed targets, bad
//! arguments). The `Display` text of the policy variants is part of the API;
//! callers match on it.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error("pilot driver not found. Set PILOT_DRIVER_PATH or put `pilot-driver` on PATH")]
	DriverNotFound,

	#[error("Failed to launch pilot driver: {0}")]
	LaunchFailed(String),

	/// Reading or writing a frame failed.
	#[error("Transport error: {0}")]
	TransportError(String),

	/// The remote sent something this client cannot make sense of.
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	#[error("Unknown protocol object type: {0}")]
	UnknownObjectType(String),

	#[error("Object not found: {guid}{}", expected.map(|kind| format!(" (expected {kind})")).unwrap_or_default())]
	ObjectNotFound {
		guid: String,
		expected: Option<&'static str>,
	},

	/// The dispatch loop stopped, so no reply will ever come.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// A command failed on the remote side.
	///
	/// `name` is the remote error class, e.g. `TimeoutError` or `TargetClosedError`.
	#[error("{name}: {message}")]
	Remote {
		name: String,
		message: String,
		stack: Option<String>,
	},

	/// A bounded wait elapsed. The message names the bound in milliseconds.
	#[error("{0}")]
	Timeout(String),

	#[error("Request context disposed")]
	ContextDisposed,

	#[error("Response has been disposed")]
	ResponseDisposed,

	#[error("Request failed: {0}")]
	RequestFailed(String),

	/// The page, frame or worker an operation targets is gone.
	#[error("Target closed: Cannot perform operation on closed {target_type}. {context}")]
	TargetClosed {
		target_type: String,
		context: String,
	},

	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
}

impl Error {
	pub fn target_closed(target_type: impl Into<String>, context: impl Into<String>) -> Self {
		Error::TargetClosed {
			target_type: target_type.into(),
			context: context.into(),
		}
	}

	/// Remote error class, for [`Error::Remote`] only.
	pub fn error_name(&self) -> Option<&str> {
		match self {
			Error::Remote { name, .. } => Some(name.as_str()),
			_ => None,
		}
	}

	/// Remote stack, when the remote sent one.
	pub fn stack_trace(&self) -> Option<&str> {
		if let Error::Remote { stack: Some(stack), .. } = self {
			Some(stack)
		} else {
			None
		}
	}

	/// Local timeouts and remote `TimeoutError`s alike.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_)) || self.error_name() == Some("TimeoutError")
	}

	pub fn is_target_closed(&self) -> bool {
		matches!(self, Error::TargetClosed { .. }) || self.error_name() == Some("TargetClosedError")
	}

	/// The operation was cut short by disposing its context or response.
	pub fn is_disposed(&self) -> bool {
		matches!(self, Error::ContextDisposed | Error::ResponseDisposed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn remote(name: &str, message: &str) -> Error {
		Error::Remote {
			name: name.to_string(),
			message: message.to_string(),
			stack: None,
		}
	}

	#[test]
	fn test_policy_messages() {
		assert_eq!(Error::ContextDisposed.to_string(), "Request context disposed");
		assert_eq!(Error::ResponseDisposed.to_string(), "Response has been disposed");
		assert_eq!(
			Error::target_closed("Worker", "Worker was closed").to_string(),
			"Target closed: Cannot perform operation on closed Worker. Worker was closed"
		);

		let err = Error::Timeout("Request timed out after 1ms".to_string());
		assert_eq!(err.to_string(), "Request timed out after 1ms");
		assert!(err.is_timeout());
		assert!(!err.is_disposed());
	}

	#[test]
	fn test_remote_classification() {
		let closed = remote("TargetClosedError", "Worker was closed");
		assert!(closed.is_target_closed());
		assert!(!closed.is_timeout());
		assert_eq!(closed.to_string(), "TargetClosedError: Worker was closed");

		assert!(remote("TimeoutError", "slow").is_timeout());
		assert_eq!(remote("Error", "x").stack_trace(), None);
	}

	#[test]
	fn test_object_not_found_names_expected_type() {
		let err = Error::ObjectNotFound {
			guid: "page@1".to_string(),
			expected: Some("Worker"),
		};
		assert_eq!(err.to_string(), "Object not found: page@1 (expected Worker)");
	}
}
