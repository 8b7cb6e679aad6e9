//! pilot: command dispatch and event correlation for remote automation
//!
//! The driver process owns the real work (HTTP exchanges, pages, workers);
//! this crate is the client half. It sends commands, applies client-side
//! policy to them, and turns the driver's notifications into typed events.
//!
//! - [`RequestContext`]: HTTP requests with timeouts, redirects, credentials,
//!   proxies and disposal
//! - [`Page`], [`Frame`], [`Worker`]: event buses with listeners and waiters,
//!   worker lifecycle, console and network attribution
//! - [`FileChooser`]: one shared value per chooser notification
//!
//! # Example
//!
//! ```ignore
//! use pilot::{PageEventKind, Pilot};
//!
//! #[tokio::main]
//! async fn main() -> pilot::Result<()> {
//!     let pilot = Pilot::launch().await?;
//!     let page = pilot.new_page().await?;
//!
//!     // Register the waiter before triggering the worker.
//!     let worker = page.wait_for_worker(None);
//!     page.goto("https://example.com/worker.html", None).await?;
//!     let worker = worker.await?;
//!     println!("{}", worker.evaluate("self.location.href", None).await?);
//!
//!     let closed = worker.wait_for_close(None);
//!     page.goto("about:blank", None).await?;
//!     closed.await?;
//!
//!     pilot.shutdown().await
//! }
//! ```

pub mod api_response;
pub mod console;
pub mod element_handle;
pub mod events;
pub mod file_chooser;
pub mod file_payload;
pub mod frame;
pub mod handlers;
pub mod logging;
pub mod network;
pub(crate) mod object_factory;
pub mod page;
pub mod pilot;
pub mod post_data;
pub mod request_context;
pub(crate) mod root;
pub mod timeout_settings;
pub mod user_agent;
pub mod worker;

pub use api_response::APIResponse;
pub use console::{ConsoleMessage, PageError};
pub use element_handle::ElementHandle;
pub use events::{BusEvent, EventBus, EventStream, EventWaiter};
pub use file_chooser::FileChooser;
pub use file_payload::{FilePayload, InputFiles};
pub use frame::Frame;
pub use handlers::{ListenerId, Subscription, UrlMatcher};
pub use network::{Request, Response};
pub use page::{Page, PageEvent, PageEventKind};
pub use pilot::Pilot;
pub use pilot_protocol::{
	ClickOptions, ConsoleMessageKind, GotoOptions, HeaderEntry, HttpCredentials, ProxySettings,
	RequestContextOptions, SourceLocation, WaitForEventOptions, WaitUntil,
};
pub use pilot_runtime::{ChannelOwner, Error, Result, TransportParts};
pub use post_data::RequestData;
pub use request_context::{FetchOptions, Operation, OperationState, RequestContext};
pub use worker::{Worker, WorkerEvent, WorkerEventKind};

/// Wire types.
pub mod protocol {
	pub use pilot_protocol::*;
}
