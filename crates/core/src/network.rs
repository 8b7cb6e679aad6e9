//! Network traffic observed by a page: [`Request`] and [`Response`].
//!
//! Both are remote objects. The page reports each of them at most once even
//! if the remote announces the same object repeatedly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pilot_protocol::{FetchBodyResult, HeaderEntry};
use pilot_runtime::{ChannelOwner, ChannelOwnerImpl, DisposeReason, Error, ParentOrConnection, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::frame::Frame;
use crate::object_factory::{connection_of, guid_ref, lookup, require};
use crate::worker::Worker;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestInit {
	url: String,
	#[serde(default = "default_method")]
	method: String,
	#[serde(default)]
	headers: Vec<HeaderEntry>,
	#[serde(default)]
	resource_type: String,
	#[serde(default)]
	is_navigation_request: bool,
}

fn default_method() -> String {
	"GET".to_string()
}

/// A request issued by a page, one of its frames, or one of its workers.
pub struct Request {
	base: ChannelOwnerImpl,
	init: RequestInit,
	frame_guid: Option<Arc<str>>,
	worker_guid: Option<Arc<str>>,
	reported: AtomicBool,
}

impl Request {
	pub(crate) fn new(parent: ParentOrConnection, guid: Arc<str>, initializer: Value) -> Result<Arc<Self>> {
		let init: RequestInit = serde_json::from_value(initializer.clone())?;
		let frame_guid = guid_ref(&initializer, "frame").map(Arc::from);
		let worker_guid = guid_ref(&initializer, "worker").map(Arc::from);
		Ok(Arc::new(Self {
			base: ChannelOwnerImpl::new(parent, "Request", guid, initializer),
			init,
			frame_guid,
			worker_guid,
			reported: AtomicBool::new(false),
		}))
	}

	pub fn url(&self) -> &str {
		&self.init.url
	}

	pub fn method(&self) -> &str {
		&self.init.method
	}

	pub fn headers(&self) -> &[HeaderEntry] {
		&self.init.headers
	}

	pub fn resource_type(&self) -> &str {
		&self.init.resource_type
	}

	pub fn is_navigation_request(&self) -> bool {
		self.init.is_navigation_request
	}

	/// The worker that issued this request, if any.
	pub fn worker(&self) -> Option<Arc<Worker>> {
		lookup(&self.connection(), self.worker_guid.as_deref()?)
	}

	/// The frame owning this traffic.
	///
	/// For worker requests this is the frame that owns the worker.
	pub fn frame(&self) -> Option<Arc<Frame>> {
		match &self.frame_guid {
			Some(guid) => lookup(&self.connection(), guid),
			None => self.worker()?.frame(),
		}
	}

	/// Fetches the response, if the request received one.
	pub async fn response(&self) -> Result<Option<Arc<Response>>> {
		let result: Value = self.channel().send_no_params("response").await?;
		match guid_ref(&result, "response") {
			Some(guid) => require(&self.connection(), guid).map(Some),
			None => Ok(None),
		}
	}

	/// Returns `true` the first time it is called.
	pub(crate) fn mark_reported(&self) -> bool {
		!self.reported.swap(true, Ordering::SeqCst)
	}

	fn handle_event(&self, method: &str, params: Value) {
		self.base.on_event(method, params);
	}

	fn handle_dispose(&self, reason: DisposeReason) {
		self.base.dispose(reason);
	}
}

pilot_runtime::impl_channel_owner!(Request);

impl std::fmt::Debug for Request {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Request")
			.field("guid", &self.guid())
			.field("method", &self.method())
			.field("url", &self.url())
			.finish()
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseInit {
	url: String,
	status: u16,
	#[serde(default)]
	status_text: String,
	#[serde(default)]
	headers: Vec<HeaderEntry>,
}

/// The response to a [`Request`].
pub struct Response {
	base: ChannelOwnerImpl,
	init: ResponseInit,
	request: Arc<Request>,
	reported: AtomicBool,
}

impl Response {
	pub(crate) fn new(parent: ParentOrConnection, guid: Arc<str>, initializer: Value) -> Result<Arc<Self>> {
		let init: ResponseInit = serde_json::from_value(initializer.clone())?;
		let request_guid = guid_ref(&initializer, "request")
			.ok_or_else(|| Error::ProtocolError(format!("Response {guid} has no request")))?;
		let request = require::<Request>(&connection_of(&parent), request_guid)?;
		Ok(Arc::new(Self {
			base: ChannelOwnerImpl::new(parent, "Response", guid, initializer),
			init,
			request,
			reported: AtomicBool::new(false),
		}))
	}

	pub fn url(&self) -> &str {
		&self.init.url
	}

	pub fn status(&self) -> u16 {
		self.init.status
	}

	pub fn status_text(&self) -> &str {
		&self.init.status_text
	}

	pub fn ok(&self) -> bool {
		self.status() == 0 || (200..=299).contains(&self.status())
	}

	pub fn headers(&self) -> &[HeaderEntry] {
		&self.init.headers
	}

	/// The request this response answers; the same object the page reported.
	pub fn request(&self) -> Arc<Request> {
		Arc::clone(&self.request)
	}

	pub fn frame(&self) -> Option<Arc<Frame>> {
		self.request.frame()
	}

	pub async fn body(&self) -> Result<Vec<u8>> {
		let result: FetchBodyResult = self.channel().send_no_params("body").await?;
		STANDARD
			.decode(result.binary.unwrap_or_default())
			.map_err(|e| Error::ProtocolError(format!("Invalid response body encoding: {e}")))
	}

	pub async fn text(&self) -> Result<String> {
		Ok(String::from_utf8_lossy(&self.body().await?).into_owned())
	}

	pub(crate) fn mark_reported(&self) -> bool {
		!self.reported.swap(true, Ordering::SeqCst)
	}

	fn handle_event(&self, method: &str, params: Value) {
		self.base.on_event(method, params);
	}

	fn handle_dispose(&self, reason: DisposeReason) {
		self.base.dispose(reason);
	}
}

pilot_runtime::impl_channel_owner!(Response);

impl std::fmt::Debug for Response {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Response")
			.field("guid", &self.guid())
			.field("status", &self.status())
			.field("url", &self.url())
			.finish()
	}
}
