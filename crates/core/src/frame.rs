//! [`Frame`]: a document inside a page.
//!
//! The page owns the frame tree; frames only hold weak links back to it.
//! Cross-document navigations are reported to the page, which closes the
//! workers started by the replaced document.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use pilot_protocol::{ClickOptions, GotoOptions};
use pilot_runtime::{ChannelOwner, ChannelOwnerImpl, DisposeReason, Error, ParentOrConnection, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::element_handle::ElementHandle;
use crate::file_payload::InputFiles;
use crate::network::Response;
use crate::object_factory::{guid_ref, lookup};
use crate::page::Page;
use crate::timeout_settings::DEFAULT_PAGE_TIMEOUT;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigatedEvent {
	url: String,
	#[serde(default)]
	name: String,
	#[serde(default)]
	new_document: Option<Value>,
	#[serde(default)]
	error: Option<String>,
}

impl NavigatedEvent {
	/// A navigation replaced the document unless the remote said otherwise.
	fn replaced_document(&self) -> bool {
		!matches!(self.new_document, None | Some(Value::Null) | Some(Value::Bool(false)))
	}
}

#[derive(Deserialize)]
struct EvaluateResult {
	#[serde(default)]
	value: Value,
}

/// A frame: the main document of a page or a nested `<iframe>`.
pub struct Frame {
	base: ChannelOwnerImpl,
	self_ref: Weak<Frame>,
	url: RwLock<String>,
	name: RwLock<String>,
	parent_frame_guid: Option<Arc<str>>,
	page: Mutex<Weak<Page>>,
	detached: AtomicBool,
}

impl Frame {
	pub(crate) fn new(parent: ParentOrConnection, guid: Arc<str>, initializer: Value) -> Arc<Self> {
		let url = initializer["url"].as_str().unwrap_or("about:blank").to_string();
		let name = initializer["name"].as_str().unwrap_or_default().to_string();
		let parent_frame_guid = guid_ref(&initializer, "parentFrame").map(Arc::from);
		Arc::new_cyclic(|self_ref| Self {
			base: ChannelOwnerImpl::new(parent, "Frame", guid, initializer),
			self_ref: self_ref.clone(),
			url: RwLock::new(url),
			name: RwLock::new(name),
			parent_frame_guid,
			page: Mutex::new(Weak::new()),
			detached: AtomicBool::new(false),
		})
	}

	pub fn url(&self) -> String {
		self.url.read().clone()
	}

	pub fn name(&self) -> String {
		self.name.read().clone()
	}

	pub fn page(&self) -> Option<Arc<Page>> {
		self.page.lock().upgrade()
	}

	pub fn is_detached(&self) -> bool {
		self.detached.load(Ordering::SeqCst)
	}

	/// `None` for a main frame.
	pub fn parent_frame(&self) -> Option<Arc<Frame>> {
		lookup(&self.connection(), self.parent_frame_guid.as_deref()?)
	}

	pub(crate) fn parent_frame_guid(&self) -> Option<&str> {
		self.parent_frame_guid.as_deref()
	}

	/// Attached frames whose parent is this frame, in attach order.
	pub fn child_frames(&self) -> Vec<Arc<Frame>> {
		let Some(page) = self.page() else {
			return Vec::new();
		};
		page.frames()
			.into_iter()
			.filter(|frame| frame.parent_frame_guid() == Some(self.guid()))
			.collect()
	}

	pub(crate) fn attach(&self, page: &Arc<Page>) {
		*self.page.lock() = Arc::downgrade(page);
		self.detached.store(false, Ordering::SeqCst);
	}

	pub(crate) fn detach(&self) {
		self.detached.store(true, Ordering::SeqCst);
	}

	fn timeout_ms(&self, explicit: Option<f64>) -> Result<f64> {
		match self.page() {
			Some(page) => page.action_timeout_ms(explicit),
			None => Ok(explicit.unwrap_or(DEFAULT_PAGE_TIMEOUT.as_millis() as f64)),
		}
	}

	fn ensure_attached(&self) -> Result<()> {
		if self.is_detached() {
			return Err(Error::target_closed("Frame", "Frame was detached"));
		}
		Ok(())
	}

	/// Navigates to `url`. Returns `None` when the navigation produced no
	/// response (`about:blank`, same-document navigations).
	pub async fn goto(&self, url: &str, options: Option<GotoOptions>) -> Result<Option<Arc<Response>>> {
		self.ensure_attached()?;
		let options = options.unwrap_or_default();
		let mut params = serde_json::json!({
			"url": url,
			"timeout": self.timeout_ms(options.timeout)?,
		});
		if let Some(wait_until) = options.wait_until {
			params["waitUntil"] = serde_json::to_value(wait_until)?;
		}
		if let Some(referer) = options.referer {
			params["referer"] = serde_json::json!(referer);
		}

		let result: Value = self.channel().send("goto", params).await?;
		match guid_ref(&result, "response") {
			Some(guid) => {
				let object = self
					.connection()
					.wait_for_object(guid, std::time::Duration::from_secs(1))
					.await?;
				crate::object_factory::downcast_owner(object).map(Some)
			}
			None => Ok(None),
		}
	}

	pub async fn click(&self, selector: &str, options: Option<ClickOptions>) -> Result<()> {
		self.ensure_attached()?;
		let options = options.unwrap_or_default();
		let mut params = serde_json::to_value(&options)?;
		params["selector"] = serde_json::json!(selector);
		params["strict"] = serde_json::json!(true);
		params["timeout"] = serde_json::json!(self.timeout_ms(options.timeout)?);
		self.channel().send_no_result("click", params).await
	}

	/// Replaces the frame's document with `html`.
	pub async fn set_content(&self, html: &str, timeout: Option<f64>) -> Result<()> {
		self.ensure_attached()?;
		self.channel()
			.send_no_result(
				"setContent",
				serde_json::json!({
					"html": html,
					"timeout": self.timeout_ms(timeout)?,
				}),
			)
			.await
	}

	/// Evaluates `expression` in the frame and returns its JSON value.
	pub async fn evaluate(&self, expression: &str, arg: Option<Value>) -> Result<Value> {
		self.ensure_attached()?;
		let result: EvaluateResult = self
			.channel()
			.send(
				"evaluateExpression",
				serde_json::json!({
					"expression": expression,
					"arg": arg.unwrap_or(Value::Null),
				}),
			)
			.await?;
		Ok(result.value)
	}

	/// Sets the files of the `<input type=file>` matching `selector`.
	pub async fn set_input_files(
		&self,
		selector: &str,
		files: impl Into<InputFiles>,
		timeout: Option<f64>,
	) -> Result<()> {
		self.ensure_attached()?;
		let payloads = files.into().to_wire().await?;
		self.channel()
			.send_no_result(
				"setInputFiles",
				serde_json::json!({
					"selector": selector,
					"strict": true,
					"payloads": payloads,
					"timeout": self.timeout_ms(timeout)?,
				}),
			)
			.await
	}

	/// First element matching `selector`, if any.
	pub async fn query_selector(&self, selector: &str) -> Result<Option<Arc<ElementHandle>>> {
		self.ensure_attached()?;
		let result: Value = self
			.channel()
			.send(
				"querySelector",
				serde_json::json!({
					"selector": selector,
					"strict": true,
				}),
			)
			.await?;
		match guid_ref(&result, "element") {
			Some(guid) => {
				let object = self
					.connection()
					.wait_for_object(guid, std::time::Duration::from_secs(1))
					.await?;
				crate::object_factory::downcast_owner(object).map(Some)
			}
			None => Ok(None),
		}
	}

	fn on_navigated(&self, params: Value) {
		let event: NavigatedEvent = match serde_json::from_value(params) {
			Ok(event) => event,
			Err(e) => {
				tracing::warn!(error = %e, "malformed navigated event");
				return;
			}
		};
		if let Some(error) = &event.error {
			tracing::debug!(guid = %self.guid(), %error, "navigation failed");
			return;
		}
		let new_document = event.replaced_document();
		*self.url.write() = event.url;
		*self.name.write() = event.name;

		let (Some(me), Some(page)) = (self.self_ref.upgrade(), self.page()) else {
			return;
		};
		page.frame_navigated(&me, new_document);
	}

	fn handle_event(&self, method: &str, params: Value) {
		match method {
			"navigated" => self.on_navigated(params),
			_ => self.base.on_event(method, params),
		}
	}

	fn handle_dispose(&self, reason: DisposeReason) {
		self.detach();
		self.base.dispose(reason);
	}
}

pilot_runtime::impl_channel_owner!(Frame);

impl std::fmt::Debug for Frame {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Frame")
			.field("guid", &self.guid())
			.field("url", &self.url())
			.field("detached", &self.is_detached())
			.finish()
	}
}
