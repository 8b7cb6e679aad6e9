//! Web and service workers attached to a page.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use pilot_protocol::{ConsoleMessageKind, SourceLocation, WaitForEventOptions};
use pilot_runtime::{ChannelOwner, ChannelOwnerImpl, DisposeReason, Error, ParentOrConnection, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::console::ConsoleMessage;
use crate::events::{BusEvent, EventBus, EventStream};
use crate::frame::Frame;
use crate::handlers::{ListenerId, Subscription};
use crate::object_factory::{guid_ref, lookup};
use crate::page::Page;
use crate::timeout_settings::{DEFAULT_PAGE_TIMEOUT, TimeoutSettings};

/// Events a [`Worker`] emits.
#[derive(Clone)]
pub enum WorkerEvent {
	Close(Arc<Worker>),
	Console(ConsoleMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerEventKind {
	Close,
	Console,
}

impl fmt::Display for WorkerEventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Close => "close",
			Self::Console => "console",
		})
	}
}

impl BusEvent for WorkerEvent {
	type Kind = WorkerEventKind;

	fn kind(&self) -> WorkerEventKind {
		match self {
			Self::Close(_) => WorkerEventKind::Close,
			Self::Console(_) => WorkerEventKind::Console,
		}
	}
}

impl fmt::Debug for WorkerEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Close(worker) => f.debug_tuple("Close").field(&worker.url()).finish(),
			Self::Console(msg) => f.debug_tuple("Console").field(msg).finish(),
		}
	}
}

/// Which notification a worker console message arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConsoleRoute {
	/// Addressed to the worker
	Worker,
	/// Addressed to the page and tagged with the worker
	Page,
}

/// Unmatched deliveries remembered while waiting for their copy on the other route.
const CONSOLE_ECHO_WINDOW: usize = 64;

struct ConsoleEcho {
	route: ConsoleRoute,
	kind: ConsoleMessageKind,
	text: String,
	location: SourceLocation,
}

impl ConsoleEcho {
	fn new(route: ConsoleRoute, msg: &ConsoleMessage) -> Self {
		Self {
			route,
			kind: msg.kind(),
			text: msg.text().to_string(),
			location: msg.location().clone(),
		}
	}

	fn is_copy_of(&self, route: ConsoleRoute, msg: &ConsoleMessage) -> bool {
		self.route != route && self.kind == msg.kind() && self.text == msg.text() && &self.location == msg.location()
	}
}

#[derive(Deserialize)]
struct EvaluateResult {
	#[serde(default)]
	value: Value,
}

/// A worker started by a page or one of its frames.
///
/// Lifecycle is `created -> closed`. A worker closes when the remote
/// reports it, when it is disposed, when its page closes, or when the
/// document that owns it is replaced by a cross-document navigation. The
/// `close` event fires exactly once whichever of these happens first.
///
/// See <https://developer.mozilla.org/docs/Web/API/Worker>
pub struct Worker {
	base: ChannelOwnerImpl,
	self_ref: Weak<Worker>,
	url: String,
	frame_guid: Option<Arc<str>>,
	page: Mutex<Weak<Page>>,
	closed: AtomicBool,
	close_token: CancellationToken,
	events: EventBus<WorkerEvent>,
	console_echoes: Mutex<VecDeque<ConsoleEcho>>,
	timeouts: TimeoutSettings,
}

impl Worker {
	pub(crate) fn new(parent: ParentOrConnection, guid: Arc<str>, initializer: Value) -> Arc<Self> {
		let url = initializer["url"].as_str().unwrap_or_default().to_string();
		let frame_guid = guid_ref(&initializer, "frame").map(Arc::from);
		let page = match &parent {
			ParentOrConnection::Parent(p) => Arc::clone(p)
				.downcast_arc::<Page>()
				.map(|page| Arc::downgrade(&page))
				.unwrap_or_default(),
			ParentOrConnection::Connection(_) => Weak::new(),
		};
		Arc::new_cyclic(|self_ref| Self {
			base: ChannelOwnerImpl::new(parent, "Worker", guid, initializer),
			self_ref: self_ref.clone(),
			url,
			frame_guid,
			page: Mutex::new(page),
			closed: AtomicBool::new(false),
			close_token: CancellationToken::new(),
			events: EventBus::new(),
			console_echoes: Mutex::new(VecDeque::new()),
			timeouts: TimeoutSettings::new(Some(DEFAULT_PAGE_TIMEOUT)),
		})
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// The page that owns this worker, while both are alive.
	pub fn page(&self) -> Option<Arc<Page>> {
		self.page.lock().upgrade()
	}

	/// The frame whose document started the worker.
	///
	/// Falls back to the page's main frame when the remote did not say.
	pub fn frame(&self) -> Option<Arc<Frame>> {
		match &self.frame_guid {
			Some(guid) => lookup(&self.connection(), guid),
			None => Some(self.page()?.main_frame()),
		}
	}

	pub(crate) fn frame_guid(&self) -> Option<&str> {
		self.frame_guid.as_deref()
	}

	pub(crate) fn attach_page(&self, page: &Arc<Page>) {
		*self.page.lock() = Arc::downgrade(page);
	}

	pub fn set_default_timeout(&self, timeout_ms: f64) {
		self.timeouts.set_default_timeout(Some(timeout_ms));
	}

	/// Evaluates `expression` in the worker and returns its JSON value.
	///
	/// # Errors
	///
	/// [`Error::TargetClosed`] if the worker is closed before or while the
	/// evaluation runs.
	pub async fn evaluate(&self, expression: &str, arg: Option<Value>) -> Result<Value> {
		if self.is_closed() {
			return Err(closed_error());
		}
		let call = self.channel().send::<_, EvaluateResult>(
			"evaluateExpression",
			serde_json::json!({
				"expression": expression,
				"arg": arg.unwrap_or(Value::Null),
			}),
		);
		tokio::select! {
			biased;
			_ = self.close_token.cancelled() => Err(closed_error()),
			result = call => Ok(result?.value),
		}
	}

	/// Resolves when the worker closes.
	///
	/// The wait starts when this is called. Resolves immediately for a
	/// worker that is already closed.
	pub fn wait_for_close(
		&self,
		options: Option<WaitForEventOptions>,
	) -> impl Future<Output = Result<()>> + Send + 'static {
		let token = self.close_token.clone();
		let timeout = self.timeouts.timeout(options.and_then(|o| o.timeout));
		async move {
			match timeout? {
				None => {
					token.cancelled().await;
					Ok(())
				}
				Some(bound) => tokio::time::timeout(bound, token.cancelled()).await.map_err(|_| {
					Error::Timeout(format!(
						"Timeout {}ms exceeded while waiting for event \"{}\"",
						bound.as_millis(),
						WorkerEventKind::Close
					))
				}),
			}
		}
	}

	pub fn on<F>(&self, kind: WorkerEventKind, listener: F) -> ListenerId
	where
		F: Fn(&WorkerEvent) + Send + Sync + 'static,
	{
		self.events.on(kind, listener)
	}

	pub fn once<F>(&self, kind: WorkerEventKind, listener: F) -> ListenerId
	where
		F: Fn(&WorkerEvent) + Send + Sync + 'static,
	{
		self.events.once(kind, listener)
	}

	pub fn off(&self, kind: WorkerEventKind, id: ListenerId) -> bool {
		self.events.off(kind, id)
	}

	/// Calls `handler` for every console message logged by this worker.
	pub fn on_console<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&ConsoleMessage) + Send + Sync + 'static,
	{
		self.events.subscribe(WorkerEventKind::Console, move |event| {
			if let WorkerEvent::Console(msg) = event {
				handler(msg);
			}
		})
	}

	pub fn events(&self) -> EventStream<WorkerEvent> {
		self.events.stream()
	}

	/// Emits a console message on this worker, then on its page.
	///
	/// The remote may report one console call both to the worker and to the
	/// page. The second copy, arriving through the other route, is dropped.
	pub(crate) fn deliver_console(&self, msg: ConsoleMessage, route: ConsoleRoute) {
		{
			let mut echoes = self.console_echoes.lock();
			if let Some(index) = echoes.iter().position(|echo| echo.is_copy_of(route, &msg)) {
				echoes.remove(index);
				tracing::trace!(guid = %self.guid(), ?route, "duplicate worker console message dropped");
				return;
			}
			if echoes.len() == CONSOLE_ECHO_WINDOW {
				echoes.pop_front();
			}
			echoes.push_back(ConsoleEcho::new(route, &msg));
		}
		self.events.emit(WorkerEvent::Console(msg.clone()));
		if let Some(page) = self.page() {
			page.emit_console(msg);
		}
	}

	/// Closes the worker. Only the first call has an effect.
	pub(crate) fn close_once(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		tracing::debug!(guid = %self.guid(), url = %self.url, "worker closed");
		self.close_token.cancel();
		if let Some(page) = self.page() {
			page.remove_worker(self.guid());
		}
		if let Some(me) = self.self_ref.upgrade() {
			self.events.emit(WorkerEvent::Close(me));
		}
		self.events.close();
	}

	fn handle_event(&self, method: &str, params: Value) {
		match method {
			"close" => self.close_once(),
			"console" => {
				let Some(me) = self.self_ref.upgrade() else {
					return;
				};
				let page = self.page.lock().clone();
				match ConsoleMessage::from_params(&params, page, None, Some(me)) {
					Ok(msg) => self.deliver_console(msg, ConsoleRoute::Worker),
					Err(e) => tracing::warn!(error = %e, "malformed worker console event"),
				}
			}
			_ => self.base.on_event(method, params),
		}
	}

	fn handle_dispose(&self, reason: DisposeReason) {
		self.close_once();
		self.base.dispose(reason);
	}
}

pilot_runtime::impl_channel_owner!(Worker);

fn closed_error() -> Error {
	Error::target_closed("Worker", "Worker was closed")
}

impl fmt::Debug for Worker {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Worker")
			.field("guid", &self.guid())
			.field("url", &self.url)
			.field("closed", &self.is_closed())
			.finish()
	}
}
