//! [`Page`]: a tab, its frame tree, its workers and its event bus.
//!
//! The page is where remote notifications are correlated:
//!
//! - workers are tracked from creation until they close, and closed when the
//!   document that started them goes away
//! - console messages are attributed to the frame or worker they came from
//! - each `fileChooser` notification becomes exactly one [`FileChooser`]
//! - network objects are reported at most once

mod page_events;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
pub use page_events::{PageEvent, PageEventKind};
use pilot_protocol::{ClickOptions, GotoOptions};
use pilot_runtime::{ChannelOwner, ChannelOwnerImpl, DisposeReason, Error, ParentOrConnection, Result};
use serde_json::Value;

use crate::console::{ConsoleMessage, PageError};
use crate::element_handle::ElementHandle;
use crate::events::EventBus;
use crate::file_chooser::FileChooser;
use crate::file_payload::InputFiles;
use crate::frame::Frame;
use crate::network::{Request, Response};
use crate::object_factory::{connection_of, guid_ref, lookup, require};
use crate::timeout_settings::{DEFAULT_PAGE_TIMEOUT, TimeoutSettings};
use crate::worker::{ConsoleRoute, Worker};

/// A browser tab.
///
/// Created by [`Pilot::new_page`](crate::Pilot::new_page). Most commands run
/// against the main frame.
pub struct Page {
	base: ChannelOwnerImpl,
	self_ref: Weak<Page>,
	main_frame: Arc<Frame>,
	frames: Mutex<IndexMap<Arc<str>, Arc<Frame>>>,
	workers: Mutex<IndexMap<Arc<str>, Arc<Worker>>>,
	events: EventBus<PageEvent>,
	timeouts: TimeoutSettings,
	closed: AtomicBool,
}

impl Page {
	pub(crate) fn new(parent: ParentOrConnection, guid: Arc<str>, initializer: Value) -> Result<Arc<Self>> {
		let main_frame_guid = guid_ref(&initializer, "mainFrame").ok_or_else(|| {
			Error::ProtocolError("Page initializer missing 'mainFrame.guid' field".to_string())
		})?;
		let main_frame = require::<Frame>(&connection_of(&parent), main_frame_guid)?;

		let page = Arc::new_cyclic(|self_ref| {
			let mut frames = IndexMap::new();
			frames.insert(Arc::from(main_frame.guid()), Arc::clone(&main_frame));
			Self {
				base: ChannelOwnerImpl::new(parent, "Page", guid, initializer),
				self_ref: self_ref.clone(),
				main_frame: Arc::clone(&main_frame),
				frames: Mutex::new(frames),
				workers: Mutex::new(IndexMap::new()),
				events: EventBus::new(),
				timeouts: TimeoutSettings::new(Some(DEFAULT_PAGE_TIMEOUT)),
				closed: AtomicBool::new(false),
			}
		});

		main_frame.attach(&page);
		page.base.adopt(main_frame);

		let channel = page.channel().clone();
		page.events
			.set_interest_hook(PageEventKind::FileChooser, move |intercepted| {
				tracing::debug!(guid = %channel.guid(), intercepted, "file chooser interception");
				channel.send_no_reply(
					"setFileChooserInterceptedNoReply",
					serde_json::json!({ "intercepted": intercepted }),
				);
			});
		Ok(page)
	}

	pub fn main_frame(&self) -> Arc<Frame> {
		Arc::clone(&self.main_frame)
	}

	/// Attached frames, main frame first.
	pub fn frames(&self) -> Vec<Arc<Frame>> {
		self.frames.lock().values().cloned().collect()
	}

	/// Workers that are alive, in creation order.
	pub fn workers(&self) -> Vec<Arc<Worker>> {
		self.workers.lock().values().cloned().collect()
	}

	pub fn url(&self) -> String {
		self.main_frame.url()
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Sets the timeout for commands and waits that do not pass one.
	/// `0` disables it.
	pub fn set_default_timeout(&self, timeout_ms: f64) {
		self.timeouts.set_default_timeout(Some(timeout_ms));
	}

	pub(crate) fn action_timeout_ms(&self, explicit: Option<f64>) -> Result<f64> {
		self.timeouts.timeout_ms(explicit)
	}

	pub(crate) fn default_action_timeout(&self) -> f64 {
		self.timeouts
			.timeout_ms(None)
			.unwrap_or(DEFAULT_PAGE_TIMEOUT.as_millis() as f64)
	}

	fn ensure_open(&self) -> Result<()> {
		if self.is_closed() {
			return Err(Error::target_closed("Page", "Page closed"));
		}
		Ok(())
	}

	/// Navigates the main frame.
	pub async fn goto(&self, url: &str, options: Option<GotoOptions>) -> Result<Option<Arc<Response>>> {
		self.ensure_open()?;
		self.main_frame.goto(url, options).await
	}

	pub async fn click(&self, selector: &str, options: Option<ClickOptions>) -> Result<()> {
		self.ensure_open()?;
		self.main_frame.click(selector, options).await
	}

	pub async fn set_content(&self, html: &str, timeout: Option<f64>) -> Result<()> {
		self.ensure_open()?;
		self.main_frame.set_content(html, timeout).await
	}

	pub async fn evaluate(&self, expression: &str, arg: Option<Value>) -> Result<Value> {
		self.ensure_open()?;
		self.main_frame.evaluate(expression, arg).await
	}

	pub async fn set_input_files(
		&self,
		selector: &str,
		files: impl Into<InputFiles>,
		timeout: Option<f64>,
	) -> Result<()> {
		self.ensure_open()?;
		self.main_frame.set_input_files(selector, files, timeout).await
	}

	pub async fn query_selector(&self, selector: &str) -> Result<Option<Arc<ElementHandle>>> {
		self.ensure_open()?;
		self.main_frame.query_selector(selector).await
	}

	/// Closes the page. Its workers close first, then `close` is emitted.
	pub async fn close(&self) -> Result<()> {
		if self.is_closed() {
			return Ok(());
		}
		self.channel().send_no_result("close", serde_json::json!({})).await?;
		self.handle_close();
		Ok(())
	}

	pub(crate) fn remove_worker(&self, guid: &str) {
		self.workers.lock().shift_remove(guid);
	}

	/// Called by a frame after it navigated.
	///
	/// A new document on the main frame ends every worker of the page; on a
	/// child frame it ends the workers that frame started.
	pub(crate) fn frame_navigated(&self, frame: &Arc<Frame>, new_document: bool) {
		if new_document {
			let is_main = Arc::ptr_eq(frame, &self.main_frame);
			self.close_workers(|worker| is_main || worker.frame_guid() == Some(frame.guid()));
		}
		self.events.emit(PageEvent::FrameNavigated(Arc::clone(frame)));
	}

	fn close_workers(&self, filter: impl Fn(&Worker) -> bool) {
		let mut doomed = Vec::new();
		self.workers.lock().retain(|_, worker| {
			if filter(worker.as_ref()) {
				doomed.push(Arc::clone(worker));
				return false;
			}
			true
		});
		for worker in doomed {
			worker.close_once();
		}
	}

	fn handle_close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		tracing::debug!(guid = %self.guid(), "page closed");
		self.close_workers(|_| true);
		for frame in self.frames.lock().drain(..).map(|(_, frame)| frame) {
			frame.detach();
		}
		if let Some(me) = self.self_ref.upgrade() {
			self.events.emit(PageEvent::Close(me));
		}
		self.events.close();
	}

	fn handle_worker_event(&self, params: &Value) {
		let Some(worker) = guid_ref(params, "worker").and_then(|guid| lookup::<Worker>(&self.connection(), guid))
		else {
			tracing::warn!(guid = %self.guid(), "worker event for unknown worker");
			return;
		};
		if self.is_closed() {
			worker.close_once();
			return;
		}
		if worker.is_closed() {
			return;
		}
		if let Some(me) = self.self_ref.upgrade() {
			worker.attach_page(&me);
		}
		self.workers.lock().insert(Arc::from(worker.guid()), Arc::clone(&worker));
		self.events.emit(PageEvent::Worker(worker));
	}

	fn frame_from(&self, params: &Value) -> Arc<Frame> {
		guid_ref(params, "frame")
			.and_then(|guid| lookup::<Frame>(&self.connection(), guid))
			.unwrap_or_else(|| Arc::clone(&self.main_frame))
	}

	fn handle_console_event(&self, params: &Value) {
		let worker = guid_ref(params, "worker").and_then(|guid| lookup::<Worker>(&self.connection(), guid));
		let result = match worker {
			Some(worker) => ConsoleMessage::from_params(params, self.self_ref.clone(), None, Some(Arc::clone(&worker)))
				.map(|msg| worker.deliver_console(msg, ConsoleRoute::Page)),
			None => ConsoleMessage::from_params(params, self.self_ref.clone(), Some(self.frame_from(params)), None)
				.map(|msg| self.emit_console(msg)),
		};
		if let Err(e) = result {
			tracing::warn!(error = %e, "malformed console event");
		}
	}

	fn handle_page_error_event(&self, params: &Value) {
		match PageError::from_params(params, Some(self.frame_from(params))) {
			Ok(error) => self.events.emit(PageEvent::PageError(error)),
			Err(e) => tracing::warn!(error = %e, "malformed pageError event"),
		}
	}

	fn handle_file_chooser_event(&self, params: &Value) {
		let Some(element) =
			guid_ref(params, "element").and_then(|guid| lookup::<ElementHandle>(&self.connection(), guid))
		else {
			tracing::warn!(guid = %self.guid(), "fileChooser event for unknown element");
			return;
		};
		let is_multiple = params["isMultiple"].as_bool().unwrap_or(false);
		let chooser = FileChooser::new(self.self_ref.clone(), element, is_multiple);
		self.events.emit(PageEvent::FileChooser(chooser));
	}

	fn handle_request_event(&self, params: &Value) {
		let Some(request) = guid_ref(params, "request").and_then(|guid| lookup::<Request>(&self.connection(), guid))
		else {
			return;
		};
		if request.mark_reported() {
			self.events.emit(PageEvent::Request(request));
		}
	}

	fn handle_response_event(&self, params: &Value) {
		let Some(response) =
			guid_ref(params, "response").and_then(|guid| lookup::<Response>(&self.connection(), guid))
		else {
			return;
		};
		if response.mark_reported() {
			self.events.emit(PageEvent::Response(response));
		}
	}

	fn handle_frame_attached(&self, params: &Value) {
		let Some(frame) = guid_ref(params, "frame").and_then(|guid| lookup::<Frame>(&self.connection(), guid)) else {
			return;
		};
		if let Some(me) = self.self_ref.upgrade() {
			frame.attach(&me);
		}
		self.frames.lock().insert(Arc::from(frame.guid()), frame);
	}

	fn handle_frame_detached(&self, params: &Value) {
		let Some(guid) = guid_ref(params, "frame") else {
			return;
		};
		let removed = self.frames.lock().shift_remove(guid);
		if let Some(frame) = removed {
			frame.detach();
			self.close_workers(|worker| worker.frame_guid() == Some(guid));
		}
	}

	fn handle_event(&self, method: &str, params: Value) {
		match method {
			"worker" => self.handle_worker_event(&params),
			"console" => self.handle_console_event(&params),
			"pageError" => self.handle_page_error_event(&params),
			"fileChooser" => self.handle_file_chooser_event(&params),
			"request" => self.handle_request_event(&params),
			"response" => self.handle_response_event(&params),
			"frameAttached" => self.handle_frame_attached(&params),
			"frameDetached" => self.handle_frame_detached(&params),
			"close" => self.handle_close(),
			_ => self.base.on_event(method, params),
		}
	}

	fn handle_dispose(&self, reason: DisposeReason) {
		self.handle_close();
		self.base.dispose(reason);
	}
}

pilot_runtime::impl_channel_owner!(Page);

impl std::fmt::Debug for Page {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Page")
			.field("guid", &self.guid())
			.field("url", &self.url())
			.field("closed", &self.is_closed())
			.finish()
	}
}
