//! Core protocol types used across the wire.
//!
//! These types represent primitive values and enums used in the pilot protocol.

use serde::{Deserialize, Serialize};

/// When to consider a navigation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
	/// Consider navigation finished after the `load` event fires
	#[default]
	Load,
	/// Consider navigation finished when the DOMContentLoaded event fires
	#[serde(rename = "domcontentloaded")]
	DomContentLoaded,
	/// Consider navigation finished when there are no network connections for at least 500ms
	#[serde(rename = "networkidle")]
	NetworkIdle,
	/// Consider navigation finished as soon as the response is committed
	Commit,
}

/// A single HTTP header as it appears on the wire.
///
/// Header lists are ordered and may contain duplicates, so they are never
/// collapsed into a map at this layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
	pub name: String,
	pub value: String,
}

impl HeaderEntry {
	pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			value: value.into(),
		}
	}
}

/// Serialized file for `setInputFiles` calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedFilePayload {
	/// File name
	pub name: String,
	/// MIME type
	pub mime_type: String,
	/// File contents as base64-encoded string
	pub buffer: String,
}

impl SerializedFilePayload {
	/// Creates a payload from raw bytes, encoding them as base64.
	pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: &[u8]) -> Self {
		use base64::Engine;
		Self {
			name: name.into(),
			mime_type: mime_type.into(),
			buffer: base64::engine::general_purpose::STANDARD.encode(data),
		}
	}
}

/// Console message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleMessageKind {
	/// console.log
	Log,
	/// console.debug
	Debug,
	/// console.info
	Info,
	/// console.warn
	Warning,
	/// console.error
	Error,
	/// console.dir
	Dir,
	/// console.table
	Table,
	/// console.trace
	Trace,
	/// console.clear
	Clear,
	/// console.assert
	Assert,
	/// console.count
	Count,
	/// console.timeEnd
	#[serde(rename = "timeEnd")]
	TimeEnd,
	/// Any other message type
	#[serde(other)]
	Other,
}

impl ConsoleMessageKind {
	/// Returns the protocol name of the kind.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Log => "log",
			Self::Debug => "debug",
			Self::Info => "info",
			Self::Warning => "warning",
			Self::Error => "error",
			Self::Dir => "dir",
			Self::Table => "table",
			Self::Trace => "trace",
			Self::Clear => "clear",
			Self::Assert => "assert",
			Self::Count => "count",
			Self::TimeEnd => "timeEnd",
			Self::Other => "other",
		}
	}
}

/// Location of a console call in its source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub line_number: u32,
	#[serde(default)]
	pub column_number: u32,
}
