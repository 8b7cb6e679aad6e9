//! [`Pilot`]: the entry point, owning the connection to the driver.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pilot_protocol::RequestContextOptions;
use pilot_runtime::{
	ChannelOwner, ChannelOwnerImpl, Connection, ConnectionLike, DisposeReason, DriverProcess, Error,
	ParentOrConnection, PipeTransport, Result, TransportParts,
};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::object_factory::{DefaultObjectFactory, downcast_owner, guid_ref};
use crate::page::Page;
use crate::request_context::{ContextConfig, RequestContext};
use crate::root::Root;

const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(30);
const CREATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Root of the object tree on the client side.
///
/// # Example
///
/// ```ignore
/// use pilot::{FetchOptions, Pilot};
///
/// #[tokio::main]
/// async fn main() -> pilot::Result<()> {
///     let pilot = Pilot::launch().await?;
///     let request = pilot.new_request_context(None).await?;
///     let response = request
///         .post("https://example.com/api", Some(FetchOptions::new().data(serde_json::json!({"a": 1}))))
///         .await?;
///     println!("{response}");
///     request.dispose().await?;
///     pilot.shutdown().await
/// }
/// ```
pub struct Pilot {
	base: ChannelOwnerImpl,
	driver: Mutex<Option<DriverProcess>>,
	message_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Pilot {
	pub(crate) fn new(parent: ParentOrConnection, guid: Arc<str>, initializer: Value) -> Arc<Self> {
		Arc::new(Self {
			base: ChannelOwnerImpl::new(parent, "Pilot", guid, initializer),
			driver: Mutex::new(None),
			message_loop: Mutex::new(None),
		})
	}

	/// Launches the driver process and connects to it over its stdio.
	///
	/// # Errors
	///
	/// [`Error::DriverNotFound`] or [`Error::LaunchFailed`] when the driver
	/// cannot be started, and any error of [`connect`](Self::connect).
	pub async fn launch() -> Result<Arc<Self>> {
		let mut driver = DriverProcess::launch().await?;
		let (stdin, stdout) = driver.take_stdio()?;
		let (transport, message_rx) = PipeTransport::new(stdin, stdout);
		let pilot = Self::connect(transport.into_transport_parts(message_rx)).await?;
		*pilot.driver.lock() = Some(driver);
		Ok(pilot)
	}

	/// Runs the protocol over an established transport and performs the
	/// `initialize` handshake.
	pub async fn connect(parts: TransportParts) -> Result<Arc<Self>> {
		let connection = Arc::new(Connection::new(parts));
		connection.set_factory(Arc::new(DefaultObjectFactory));

		let loop_connection = Arc::clone(&connection);
		let message_loop = tokio::spawn(async move {
			loop_connection.run().await;
		});

		let dyn_connection: Arc<dyn ConnectionLike> = connection;
		let root = Root::new(Arc::clone(&dyn_connection));
		dyn_connection.register_object(Arc::from(""), root.clone());
		tracing::debug!("root registered, sending initialize");

		let pilot_guid = tokio::time::timeout(INITIALIZE_TIMEOUT, root.initialize())
			.await
			.map_err(|_| {
				Error::Timeout(format!(
					"Initialization timed out after {}ms",
					INITIALIZE_TIMEOUT.as_millis()
				))
			})??;
		dyn_connection.unregister_object("");

		let object = dyn_connection.wait_for_object(&pilot_guid, CREATE_TIMEOUT).await?;
		let pilot = downcast_owner::<Pilot>(object)?;
		*pilot.message_loop.lock() = Some(message_loop);
		tracing::debug!(guid = %pilot_guid, "initialized");
		Ok(pilot)
	}

	/// Creates an HTTP request context.
	///
	/// Options are validated locally before anything is sent.
	///
	/// # Errors
	///
	/// [`Error::InvalidArgument`] for a malformed `base_url`, proxy server or
	/// credentials origin.
	pub async fn new_request_context(&self, options: Option<RequestContextOptions>) -> Result<Arc<RequestContext>> {
		let options = options.unwrap_or_default();
		let config = ContextConfig::from_options(&options)?;

		let mut params = serde_json::to_value(&options)?;
		params["userAgent"] = serde_json::json!(config.user_agent);

		let result: Value = self.channel().send("newRequest", params).await?;
		let guid = guid_ref(&result, "request")
			.ok_or_else(|| Error::ProtocolError("newRequest response missing 'request.guid'".to_string()))?;
		let object = self.connection().wait_for_object(guid, CREATE_TIMEOUT).await?;
		let context = downcast_owner::<RequestContext>(object)?;
		context.configure(config, options.timeout)?;
		Ok(context)
	}

	/// Opens a new page.
	pub async fn new_page(&self) -> Result<Arc<Page>> {
		let result: Value = self.channel().send("newPage", serde_json::json!({})).await?;
		let guid = guid_ref(&result, "page")
			.ok_or_else(|| Error::ProtocolError("newPage response missing 'page.guid'".to_string()))?;
		let object = self.connection().wait_for_object(guid, CREATE_TIMEOUT).await?;
		downcast_owner(object)
	}

	/// Disposes every object and stops the driver if this client launched it.
	pub async fn shutdown(&self) -> Result<()> {
		self.base.dispose(DisposeReason::Closed);
		let driver = self.driver.lock().take();
		if let Some(driver) = driver {
			driver.shutdown().await?;
		}
		let message_loop = self.message_loop.lock().take();
		if let Some(handle) = message_loop {
			handle.abort();
		}
		Ok(())
	}

	fn handle_event(&self, method: &str, params: Value) {
		self.base.on_event(method, params);
	}

	fn handle_dispose(&self, reason: DisposeReason) {
		self.base.dispose(reason);
	}
}

pilot_runtime::impl_channel_owner!(Pilot);

impl std::fmt::Debug for Pilot {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Pilot").field("guid", &self.guid()).finish()
	}
}
