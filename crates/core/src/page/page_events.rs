//! Events emitted by [`Page`], and the listener and waiter API over them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use pilot_protocol::WaitForEventOptions;
use pilot_runtime::{ChannelOwner, Error, Result};

use super::Page;
use crate::console::{ConsoleMessage, PageError};
use crate::events::{BusEvent, EventStream};
use crate::file_chooser::FileChooser;
use crate::frame::Frame;
use crate::handlers::{ListenerId, Subscription, UrlMatcher};
use crate::network::{Request, Response};
use crate::worker::Worker;

/// Something that happened in a page.
#[derive(Clone)]
pub enum PageEvent {
	Close(Arc<Page>),
	Console(ConsoleMessage),
	PageError(PageError),
	FileChooser(FileChooser),
	Request(Arc<Request>),
	Response(Arc<Response>),
	Worker(Arc<Worker>),
	FrameNavigated(Arc<Frame>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageEventKind {
	Close,
	Console,
	PageError,
	FileChooser,
	Request,
	Response,
	Worker,
	FrameNavigated,
}

impl PageEventKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Close => "close",
			Self::Console => "console",
			Self::PageError => "pageerror",
			Self::FileChooser => "filechooser",
			Self::Request => "request",
			Self::Response => "response",
			Self::Worker => "worker",
			Self::FrameNavigated => "framenavigated",
		}
	}
}

impl fmt::Display for PageEventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl BusEvent for PageEvent {
	type Kind = PageEventKind;

	fn kind(&self) -> PageEventKind {
		match self {
			Self::Close(_) => PageEventKind::Close,
			Self::Console(_) => PageEventKind::Console,
			Self::PageError(_) => PageEventKind::PageError,
			Self::FileChooser(_) => PageEventKind::FileChooser,
			Self::Request(_) => PageEventKind::Request,
			Self::Response(_) => PageEventKind::Response,
			Self::Worker(_) => PageEventKind::Worker,
			Self::FrameNavigated(_) => PageEventKind::FrameNavigated,
		}
	}
}

impl fmt::Debug for PageEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Close(page) => f.debug_tuple("Close").field(&page.guid()).finish(),
			Self::Console(msg) => f.debug_tuple("Console").field(msg).finish(),
			Self::PageError(error) => f.debug_tuple("PageError").field(error).finish(),
			Self::FileChooser(chooser) => f.debug_tuple("FileChooser").field(chooser).finish(),
			Self::Request(request) => f.debug_tuple("Request").field(request).finish(),
			Self::Response(response) => f.debug_tuple("Response").field(response).finish(),
			Self::Worker(worker) => f.debug_tuple("Worker").field(worker).finish(),
			Self::FrameNavigated(frame) => f.debug_tuple("FrameNavigated").field(frame).finish(),
		}
	}
}

/// A waiter on a closed page fails as the page itself would.
fn page_closed(error: Error) -> Error {
	match error {
		Error::ChannelClosed => Error::target_closed("Page", "Page closed"),
		other => other,
	}
}

impl Page {
	/// Adds a listener after all existing listeners of `kind`.
	///
	/// Listeners run synchronously on the dispatch loop and must not block.
	pub fn on<F>(&self, kind: PageEventKind, listener: F) -> ListenerId
	where
		F: Fn(&PageEvent) + Send + Sync + 'static,
	{
		self.events.on(kind, listener)
	}

	/// Adds a listener that runs for the next event of `kind` only.
	pub fn once<F>(&self, kind: PageEventKind, listener: F) -> ListenerId
	where
		F: Fn(&PageEvent) + Send + Sync + 'static,
	{
		self.events.once(kind, listener)
	}

	/// Adds a listener ahead of all existing listeners of `kind`.
	pub fn prepend_listener<F>(&self, kind: PageEventKind, listener: F) -> ListenerId
	where
		F: Fn(&PageEvent) + Send + Sync + 'static,
	{
		self.events.prepend_listener(kind, listener)
	}

	pub fn off(&self, kind: PageEventKind, id: ListenerId) -> bool {
		self.events.off(kind, id)
	}

	/// Like [`on`](Self::on), removed when the [`Subscription`] drops.
	pub fn subscribe<F>(&self, kind: PageEventKind, listener: F) -> Subscription
	where
		F: Fn(&PageEvent) + Send + Sync + 'static,
	{
		self.events.subscribe(kind, listener)
	}

	/// Every event of this page, as a stream.
	pub fn events(&self) -> EventStream<PageEvent> {
		self.events.stream()
	}

	pub fn on_console<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&ConsoleMessage) + Send + Sync + 'static,
	{
		self.events.subscribe(PageEventKind::Console, move |event| {
			if let PageEvent::Console(msg) = event {
				handler(msg);
			}
		})
	}

	pub fn on_worker<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&Arc<Worker>) + Send + Sync + 'static,
	{
		self.events.subscribe(PageEventKind::Worker, move |event| {
			if let PageEvent::Worker(worker) = event {
				handler(worker);
			}
		})
	}

	/// While the returned subscription lives, native file choosers are
	/// intercepted and reported here instead.
	pub fn on_file_chooser<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&FileChooser) + Send + Sync + 'static,
	{
		self.events.subscribe(PageEventKind::FileChooser, move |event| {
			if let PageEvent::FileChooser(chooser) = event {
				handler(chooser);
			}
		})
	}

	pub fn on_request<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&Arc<Request>) + Send + Sync + 'static,
	{
		self.events.subscribe(PageEventKind::Request, move |event| {
			if let PageEvent::Request(request) = event {
				handler(request);
			}
		})
	}

	pub fn on_response<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&Arc<Response>) + Send + Sync + 'static,
	{
		self.events.subscribe(PageEventKind::Response, move |event| {
			if let PageEvent::Response(response) = event {
				handler(response);
			}
		})
	}

	/// Waits for the next event of `kind`.
	///
	/// The waiter is registered when this is called, so an event emitted
	/// between this call and the first poll is not lost. Call it before the
	/// command that triggers the event.
	///
	/// # Errors
	///
	/// - [`Error::Timeout`] after the effective timeout (default 30s, `0`
	///   waits forever)
	/// - [`Error::TargetClosed`] if the page closes first
	///
	/// Waiting for [`PageEventKind::Close`] on a closed page resolves at once.
	pub fn wait_for_event(
		&self,
		kind: PageEventKind,
		options: Option<WaitForEventOptions>,
	) -> impl Future<Output = Result<PageEvent>> + Send + 'static {
		let already_closed = (kind == PageEventKind::Close && self.is_closed())
			.then(|| self.self_ref.upgrade())
			.flatten();
		let waiter = self.wait_with(kind, options, |event| Some(event.clone()));
		async move {
			match already_closed {
				Some(page) => Ok(PageEvent::Close(page)),
				None => waiter.await,
			}
		}
	}

	pub fn wait_for_worker(
		&self,
		options: Option<WaitForEventOptions>,
	) -> impl Future<Output = Result<Arc<Worker>>> + Send + 'static {
		self.wait_with(PageEventKind::Worker, options, |event| match event {
			PageEvent::Worker(worker) => Some(Arc::clone(worker)),
			_ => None,
		})
	}

	/// Waits for the next file chooser. Interception is on while waiting.
	pub fn wait_for_file_chooser(
		&self,
		options: Option<WaitForEventOptions>,
	) -> impl Future<Output = Result<FileChooser>> + Send + 'static {
		self.wait_with(PageEventKind::FileChooser, options, |event| match event {
			PageEvent::FileChooser(chooser) => Some(chooser.clone()),
			_ => None,
		})
	}

	pub fn wait_for_console(
		&self,
		options: Option<WaitForEventOptions>,
	) -> impl Future<Output = Result<ConsoleMessage>> + Send + 'static {
		self.wait_with(PageEventKind::Console, options, |event| match event {
			PageEvent::Console(msg) => Some(msg.clone()),
			_ => None,
		})
	}

	pub fn wait_for_page_error(
		&self,
		options: Option<WaitForEventOptions>,
	) -> impl Future<Output = Result<PageError>> + Send + 'static {
		self.wait_with(PageEventKind::PageError, options, |event| match event {
			PageEvent::PageError(error) => Some(error.clone()),
			_ => None,
		})
	}

	/// Waits for a request whose URL matches `url`.
	pub fn wait_for_request(
		&self,
		url: impl Into<UrlMatcher>,
		options: Option<WaitForEventOptions>,
	) -> impl Future<Output = Result<Arc<Request>>> + Send + 'static {
		let matcher = url.into();
		self.wait_with(PageEventKind::Request, options, move |event| match event {
			PageEvent::Request(request) if matcher.is_match(request.url()) => Some(Arc::clone(request)),
			_ => None,
		})
	}

	/// Waits for a response whose URL matches `url`.
	pub fn wait_for_response(
		&self,
		url: impl Into<UrlMatcher>,
		options: Option<WaitForEventOptions>,
	) -> impl Future<Output = Result<Arc<Response>>> + Send + 'static {
		let matcher = url.into();
		self.wait_with(PageEventKind::Response, options, move |event| match event {
			PageEvent::Response(response) if matcher.is_match(response.url()) => Some(Arc::clone(response)),
			_ => None,
		})
	}

	fn wait_with<T, F>(
		&self,
		kind: PageEventKind,
		options: Option<WaitForEventOptions>,
		select: F,
	) -> impl Future<Output = Result<T>> + Send + 'static
	where
		T: Send + 'static,
		F: Fn(&PageEvent) -> Option<T> + Send + 'static,
	{
		let waiter = self
			.timeouts
			.timeout(options.and_then(|o| o.timeout))
			.map(|timeout| self.events.wait_for_map(kind, select, timeout));
		async move { waiter?.await.map_err(page_closed) }
	}

	/// Emits a console message on this page.
	pub(crate) fn emit_console(&self, msg: ConsoleMessage) {
		self.events.emit(PageEvent::Console(msg));
	}
}
