//! Console messages and uncaught page errors.

use std::fmt;
use std::sync::{Arc, Weak};

use pilot_protocol::{ConsoleMessageKind, SourceLocation};
use pilot_runtime::Result;
use serde::Deserialize;
use serde_json::Value;

use crate::frame::Frame;
use crate::page::Page;
use crate::worker::Worker;

#[derive(Debug, Deserialize)]
struct ConsoleParams {
	#[serde(rename = "type")]
	kind: ConsoleMessageKind,
	#[serde(default)]
	text: String,
	#[serde(default)]
	location: SourceLocation,
	#[serde(default)]
	args: Vec<Value>,
}

/// One console call, attributed to the frame or worker it came from.
///
/// Cheap to clone; clones are the same message.
#[derive(Clone)]
pub struct ConsoleMessage {
	inner: Arc<ConsoleInner>,
}

struct ConsoleInner {
	params: ConsoleParams,
	page: Weak<Page>,
	frame: Option<Arc<Frame>>,
	worker: Option<Arc<Worker>>,
}

impl ConsoleMessage {
	pub(crate) fn from_params(
		params: &Value,
		page: Weak<Page>,
		frame: Option<Arc<Frame>>,
		worker: Option<Arc<Worker>>,
	) -> Result<Self> {
		Ok(Self {
			inner: Arc::new(ConsoleInner {
				params: ConsoleParams::deserialize(params)?,
				page,
				frame,
				worker,
			}),
		})
	}

	pub fn kind(&self) -> ConsoleMessageKind {
		self.inner.params.kind
	}

	pub fn text(&self) -> &str {
		&self.inner.params.text
	}

	pub fn location(&self) -> &SourceLocation {
		&self.inner.params.location
	}

	/// Arguments passed to the console call, as serialized by the remote.
	pub fn args(&self) -> &[Value] {
		&self.inner.params.args
	}

	pub fn page(&self) -> Option<Arc<Page>> {
		self.inner.page.upgrade()
	}

	/// The frame that logged the message. For worker messages, the frame
	/// owning the worker.
	pub fn frame(&self) -> Option<Arc<Frame>> {
		self.inner
			.frame
			.clone()
			.or_else(|| self.inner.worker.as_ref()?.frame())
	}

	/// The worker that logged the message, if any.
	pub fn worker(&self) -> Option<Arc<Worker>> {
		self.inner.worker.clone()
	}
}

impl PartialEq for ConsoleMessage {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

impl fmt::Debug for ConsoleMessage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConsoleMessage")
			.field("kind", &self.kind())
			.field("text", &self.text())
			.field("worker", &self.inner.worker.as_ref().map(|w| w.url().to_string()))
			.finish()
	}
}

#[derive(Debug, Default, Deserialize)]
struct ErrorPayload {
	#[serde(default)]
	name: String,
	#[serde(default)]
	message: String,
	#[serde(default)]
	stack: Option<String>,
}

/// An uncaught exception in a page.
#[derive(Clone)]
pub struct PageError {
	inner: Arc<PageErrorInner>,
}

struct PageErrorInner {
	error: ErrorPayload,
	frame: Option<Arc<Frame>>,
}

impl PageError {
	pub(crate) fn from_params(params: &Value, frame: Option<Arc<Frame>>) -> Result<Self> {
		let error = match params.get("error") {
			Some(error) => ErrorPayload::deserialize(error)?,
			None => ErrorPayload::default(),
		};
		Ok(Self {
			inner: Arc::new(PageErrorInner { error, frame }),
		})
	}

	pub fn name(&self) -> &str {
		&self.inner.error.name
	}

	pub fn message(&self) -> &str {
		&self.inner.error.message
	}

	pub fn stack(&self) -> Option<&str> {
		self.inner.error.stack.as_deref()
	}

	pub fn frame(&self) -> Option<Arc<Frame>> {
		self.inner.frame.clone()
	}
}

impl fmt::Display for PageError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.name().is_empty() {
			f.write_str(self.message())
		} else {
			write!(f, "{}: {}", self.name(), self.message())
		}
	}
}

impl fmt::Debug for PageError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PageError")
			.field("name", &self.name())
			.field("message", &self.message())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_console_params() {
		let msg = ConsoleMessage::from_params(
			&json!({
				"type": "log",
				"text": "hello from worker",
				"location": {"url": "http://localhost/worker.js", "lineNumber": 3, "columnNumber": 1},
				"args": ["hello", 1]
			}),
			Weak::new(),
			None,
			None,
		)
		.unwrap();
		assert_eq!(msg.kind(), ConsoleMessageKind::Log);
		assert_eq!(msg.text(), "hello from worker");
		assert_eq!(msg.location().line_number, 3);
		assert_eq!(msg.args().len(), 2);
		assert!(msg.page().is_none());
		assert!(msg.frame().is_none());
		assert_eq!(msg.clone(), msg);
	}

	#[test]
	fn test_unknown_console_kind() {
		let msg = ConsoleMessage::from_params(&json!({"type": "profileEnd"}), Weak::new(), None, None).unwrap();
		assert_eq!(msg.kind(), ConsoleMessageKind::Other);
		assert_eq!(msg.text(), "");
	}

	#[test]
	fn test_page_error_display() {
		let error = PageError::from_params(
			&json!({"error": {"name": "Error", "message": "boom", "stack": "Error: boom\n    at x"}}),
			None,
		)
		.unwrap();
		assert_eq!(error.to_string(), "Error: boom");
		assert!(error.stack().unwrap().contains("at x"));
	}
}
