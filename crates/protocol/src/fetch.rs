//! Wire shapes for request-context fetch hops.
//!
//! The client drives redirects itself, so every message here describes a
//! single HTTP exchange performed by the remote network stack.

use serde::{Deserialize, Serialize};

use crate::types::HeaderEntry;

/// Proxy routing for a single hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRoute {
	/// Normalized proxy server URL
	pub server: String,
	/// Exact `host:port` of the destination, as sent in `CONNECT`
	pub connect_host: String,
	/// `Proxy-Authorization` value sent to the proxy
	#[serde(skip_serializing_if = "Option::is_none")]
	pub authorization: Option<String>,
}

/// Parameters of the `fetch` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchHopParams {
	pub url: String,
	pub method: String,
	pub headers: Vec<HeaderEntry>,
	/// Request body as base64
	#[serde(skip_serializing_if = "Option::is_none")]
	pub post_data: Option<String>,
	#[serde(rename = "ignoreHTTPSErrors", default)]
	pub ignore_https_errors: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub proxy: Option<ProxyRoute>,
	/// Remaining budget for this hop in milliseconds
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timeout: Option<f64>,
}

/// Response metadata of one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponseInit {
	pub url: String,
	pub status: u16,
	#[serde(default)]
	pub status_text: String,
	#[serde(default)]
	pub headers: Vec<HeaderEntry>,
	/// Handle used to retrieve the body later
	pub fetch_uid: String,
}

/// Result of the `fetch` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchHopResult {
	pub response: FetchResponseInit,
}

/// Parameters of `fetchResponseBody` and `disposeAPIResponse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchUidParams {
	pub fetch_uid: String,
}

/// Result of the `fetchResponseBody` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchBodyResult {
	/// Body as base64; absent once the remote released it
	#[serde(skip_serializing_if = "Option::is_none")]
	pub binary: Option<String>,
}
