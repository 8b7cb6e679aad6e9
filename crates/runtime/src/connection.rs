//! Command correlation and event routing on top of the transport.
//!
//! Every command gets the next sequential id and a parked oneshot in the
//! [`PendingCalls`] table. The dispatch loop resolves that oneshot when the
//! response with the same id arrives, and hands every other message to the
//! object it names. Lifecycle messages (`__create__`, `__adopt__`,
//! `__dispose__`) keep the object registry in step with the remote.
//!
//! Messages are dispatched one at a time in arrival order, so an event sent
//! before a response is always observed before that response resolves.

mod object_store;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

pub use object_store::ObjectStore;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::channel_owner::{ChannelOwner, DisposeReason, ParentOrConnection};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, TransportReceiver};

/// What remote objects need from the connection.
///
/// Object-safe, so [`ChannelOwner`] implementations never see the
/// transport's concrete types.
pub trait ConnectionLike: Send + Sync {
	/// Sends a command and awaits the correlated response.
	fn send_message(
		&self,
		guid: &str,
		method: &str,
		params: Value,
	) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>>;

	/// Queues a command whose reply nobody awaits.
	///
	/// The frame is queued before this returns, so commands posted one after
	/// another reach the remote in that order.
	fn send_no_reply(&self, guid: &str, method: &str, params: Value) -> Result<()>;

	fn register_object(&self, guid: Arc<str>, object: Arc<dyn ChannelOwner>);

	/// Synchronous so it can run from `dispose()` and `Drop` impls.
	fn unregister_object(&self, guid: &str);

	fn try_get_object(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>>;

	/// Waits until `guid` is registered.
	///
	/// A response may name an object whose `__create__` is still queued
	/// behind it on another task.
	fn wait_for_object(&self, guid: &str, timeout: Duration) -> AsyncChannelOwnerResult<'_>;

	/// `true` once the dispatch loop has stopped.
	fn is_closed(&self) -> bool;
}

pub type AsyncChannelOwnerResult<'a> =
	Pin<Box<dyn Future<Output = Result<Arc<dyn ChannelOwner>>> + Send + 'a>>;

/// Builds typed objects for `__create__` messages.
///
/// Lets this crate stay ignorant of the concrete object types.
pub trait ObjectFactory: Send + Sync {
	fn create_object(
		&self,
		parent: ParentOrConnection,
		type_name: String,
		guid: Arc<str>,
		initializer: Value,
	) -> AsyncChannelOwnerResult<'_>;
}

/// Per-command metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
	/// Unix time in milliseconds
	pub wall_time: i64,
}

impl Metadata {
	pub fn now() -> Self {
		let wall_time = std::time::SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.map(|d| d.as_millis() as i64)
			.unwrap_or_default();
		Self { wall_time }
	}
}

/// A command on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	pub id: u32,
	/// Target object
	pub guid: String,
	pub method: String,
	pub params: Value,
	pub metadata: Metadata,
}

/// Reply to a [`Request`]; carries either `result` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	pub id: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorWrapper>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorWrapper {
	pub error: ErrorPayload,
}

/// Failure reported by the remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	pub message: String,
	/// e.g. `TimeoutError`, `TargetClosedError`
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}

impl From<ErrorPayload> for Error {
	fn from(error: ErrorPayload) -> Self {
		Error::Remote {
			name: error.name.unwrap_or_else(|| "Error".to_string()),
			message: error.message,
			stack: error.stack,
		}
	}
}

/// A notification emitted by a remote object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	pub guid: String,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Any incoming frame. Responses carry an `id`, events do not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	Response(Response),
	Event(Event),
	/// Anything else; logged and skipped
	Unknown(Value),
}

type Callback = oneshot::Sender<Result<Value>>;

/// Commands awaiting their response, keyed by id.
#[derive(Default)]
struct PendingCalls {
	next_id: AtomicU32,
	calls: Mutex<HashMap<u32, Callback>>,
}

impl PendingCalls {
	fn register(self: &Arc<Self>) -> (u32, PendingCall) {
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.calls.lock().insert(id, tx);
		(
			id,
			PendingCall {
				id,
				rx,
				table: Arc::clone(self),
				settled: false,
			},
		)
	}

	/// Reserves an id whose reply is consumed and dropped.
	fn register_detached(&self) -> u32 {
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		let (tx, _) = oneshot::channel();
		self.calls.lock().insert(id, tx);
		id
	}

	fn take(&self, id: u32) -> Option<Callback> {
		self.calls.lock().remove(&id)
	}

	fn fail_all(&self) {
		let drained: Vec<(u32, Callback)> = self.calls.lock().drain().collect();
		for (id, callback) in drained {
			tracing::debug!(id, "failing pending command: connection closed");
			let _ = callback.send(Err(Error::ChannelClosed));
		}
	}

	fn len(&self) -> usize {
		self.calls.lock().len()
	}
}

/// Future of one command. Dropping it unresolved forgets the callback.
struct PendingCall {
	id: u32,
	rx: oneshot::Receiver<Result<Value>>,
	table: Arc<PendingCalls>,
	settled: bool,
}

impl Future for PendingCall {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let result = std::task::ready!(Pin::new(&mut self.rx).poll(cx));
		self.settled = true;
		Poll::Ready(result.unwrap_or(Err(Error::ChannelClosed)))
	}
}

impl Drop for PendingCall {
	fn drop(&mut self) {
		if !self.settled && self.table.take(self.id).is_some() {
			tracing::debug!(id = self.id, "command abandoned before its response");
		}
	}
}

/// Loop-owned pieces, taken once by [`Connection::run`].
struct LoopParts {
	sender: Box<dyn Transport>,
	receiver: Box<dyn TransportReceiver>,
	message_rx: mpsc::UnboundedReceiver<Value>,
	outbound_rx: mpsc::UnboundedReceiver<Value>,
}

/// Client end of the protocol.
pub struct Connection {
	pending: Arc<PendingCalls>,
	outbound_tx: mpsc::UnboundedSender<Value>,
	loop_parts: Mutex<Option<LoopParts>>,
	objects: ObjectStore,
	factory: RwLock<Option<Arc<dyn ObjectFactory>>>,
	closed: AtomicBool,
}

impl Connection {
	pub fn new(parts: TransportParts) -> Self {
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		Self {
			pending: Arc::default(),
			outbound_tx,
			loop_parts: Mutex::new(Some(LoopParts {
				sender: parts.sender,
				receiver: parts.receiver,
				message_rx: parts.message_rx,
				outbound_rx,
			})),
			objects: ObjectStore::new(),
			factory: RwLock::new(None),
			closed: AtomicBool::new(false),
		}
	}

	/// Installs the factory for `__create__`. Call before [`run`](Self::run).
	pub fn set_factory(&self, factory: Arc<dyn ObjectFactory>) {
		*self.factory.write() = Some(factory);
	}

	/// Sends a command and awaits the correlated response.
	///
	/// # Errors
	///
	/// [`Error::ChannelClosed`] if the connection is or becomes closed, and
	/// [`Error::Remote`] for failures reported by the remote.
	pub async fn send_message(&self, guid: &str, method: &str, params: Value) -> Result<Value> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(Error::ChannelClosed);
		}
		let (id, call) = self.pending.register();
		self.enqueue(id, guid, method, params)?;
		call.await
	}

	/// Queues a command without awaiting its reply.
	///
	/// The frame is on the writer's queue when this returns. A failure
	/// reported for it is logged and otherwise ignored.
	pub fn send_no_reply(&self, guid: &str, method: &str, params: Value) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(Error::ChannelClosed);
		}
		let id = self.pending.register_detached();
		if let Err(e) = self.enqueue(id, guid, method, params) {
			self.pending.take(id);
			return Err(e);
		}
		Ok(())
	}

	fn enqueue(&self, id: u32, guid: &str, method: &str, params: Value) -> Result<()> {
		// The loop may have drained the table between the caller's check and the insert.
		if self.closed.load(Ordering::SeqCst) {
			return Err(Error::ChannelClosed);
		}
		let request = serde_json::to_value(Request {
			id,
			guid: guid.to_string(),
			method: method.to_string(),
			params,
			metadata: Metadata::now(),
		})?;
		tracing::debug!(id, guid, method, "command");
		tracing::trace!(%request, "command frame");

		self.outbound_tx.send(request).map_err(|_| Error::ChannelClosed)
	}

	/// Number of commands still waiting for a response.
	pub fn pending_count(&self) -> usize {
		self.pending.len()
	}

	/// Runs the dispatch loop until the transport closes.
	///
	/// Afterwards every pending command fails with [`Error::ChannelClosed`]
	/// and new commands fail immediately.
	pub async fn run(self: &Arc<Self>) {
		let Some(LoopParts {
			mut sender,
			receiver,
			mut message_rx,
			mut outbound_rx,
		}) = self.loop_parts.lock().take()
		else {
			tracing::error!("Connection::run called more than once");
			return;
		};

		let reader = tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				tracing::debug!("transport reader stopped: {e}");
			}
		});
		let writer = tokio::spawn(async move {
			while let Some(frame) = outbound_rx.recv().await {
				if let Err(e) = sender.send(frame).await {
					tracing::error!("transport write failed: {e}");
					break;
				}
			}
		});

		while let Some(frame) = message_rx.recv().await {
			let result = match serde_json::from_value::<Message>(frame) {
				Ok(message) => self.dispatch_message(message).await,
				Err(e) => Err(e.into()),
			};
			if let Err(e) = result {
				tracing::error!("dropping incoming message: {e}");
			}
		}

		self.closed.store(true, Ordering::SeqCst);
		self.pending.fail_all();
		writer.abort();
		let _ = reader.await;
		tracing::debug!("connection closed");
	}

	/// Dispatches one message as the loop would. For tests.
	#[cfg(test)]
	pub async fn dispatch(self: &Arc<Self>, message: Message) -> Result<()> {
		self.dispatch_message(message).await
	}

	async fn dispatch_message(self: &Arc<Self>, message: Message) -> Result<()> {
		match message {
			Message::Response(response) => self.on_response(response),
			Message::Event(event) => match event.method.as_str() {
				"__create__" => self.on_create(event).await,
				"__adopt__" => self.on_adopt(&event),
				"__dispose__" => {
					self.on_dispose(&event);
					Ok(())
				}
				_ => {
					match self.objects.try_get(&event.guid) {
						Some(object) => object.on_event(&event.method, event.params),
						None => tracing::debug!(guid = %event.guid, method = %event.method, "event for unknown object"),
					}
					Ok(())
				}
			},
			Message::Unknown(value) => {
				tracing::debug!(%value, "unrecognized message");
				Ok(())
			}
		}
	}

	fn on_response(&self, response: Response) -> Result<()> {
		let callback = self.pending.take(response.id).ok_or_else(|| {
			Error::ProtocolError(format!("Response for unknown command id={}", response.id))
		})?;
		let result = match response.error {
			Some(wrapper) => Err(wrapper.error.into()),
			None => Ok(response.result.unwrap_or(Value::Null)),
		};
		// Nobody listening means the caller gave up or never waited.
		if let Err(Err(e)) = callback.send(result) {
			tracing::debug!(id = response.id, "unawaited command failed: {e}");
		}
		Ok(())
	}

	async fn on_create(self: &Arc<Self>, event: Event) -> Result<()> {
		let field = |name: &str| -> Result<String> {
			event.params[name]
				.as_str()
				.map(str::to_string)
				.ok_or_else(|| Error::ProtocolError(format!("__create__ missing '{name}'")))
		};
		let type_name = field("type")?;
		let guid: Arc<str> = Arc::from(field("guid")?);

		let parent = self
			.objects
			.try_get(&event.guid)
			.ok_or_else(|| Error::ProtocolError(format!("Parent object not found: {}", event.guid)))?;
		// Children of the root hang off the connection itself.
		let owner = if event.guid.is_empty() {
			ParentOrConnection::Connection(Arc::clone(self) as Arc<dyn ConnectionLike>)
		} else {
			ParentOrConnection::Parent(Arc::clone(&parent))
		};

		let factory = self
			.factory
			.read()
			.clone()
			.ok_or_else(|| Error::ProtocolError("no object factory installed".to_string()))?;
		let initializer = event.params["initializer"].clone();
		let object = factory
			.create_object(owner, type_name.clone(), Arc::clone(&guid), initializer)
			.await?;

		self.objects.insert(Arc::clone(&guid), Arc::clone(&object));
		parent.add_child(Arc::clone(&guid), object);
		tracing::debug!(%type_name, %guid, parent = %event.guid, "created");
		Ok(())
	}

	fn on_adopt(&self, event: &Event) -> Result<()> {
		let child_guid = event.params["guid"]
			.as_str()
			.ok_or_else(|| Error::ProtocolError("__adopt__ missing 'guid'".to_string()))?;
		let parent = self
			.objects
			.try_get(&event.guid)
			.ok_or_else(|| Error::ProtocolError(format!("Parent object not found: {}", event.guid)))?;
		let child = self
			.objects
			.try_get(child_guid)
			.ok_or_else(|| Error::ProtocolError(format!("Child object not found: {child_guid}")))?;
		parent.adopt(child);
		tracing::debug!(child = child_guid, parent = %event.guid, "adopted");
		Ok(())
	}

	fn on_dispose(&self, event: &Event) {
		let reason = match event.params.get("reason").and_then(Value::as_str) {
			Some("gc") => DisposeReason::GarbageCollected,
			_ => DisposeReason::Closed,
		};
		match self.objects.try_get(&event.guid) {
			Some(object) => object.dispose(reason),
			None => tracing::debug!(guid = %event.guid, "dispose for unknown object"),
		}
	}
}

impl ConnectionLike for Connection {
	fn send_message(
		&self,
		guid: &str,
		method: &str,
		params: Value,
	) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
		let guid = guid.to_string();
		let method = method.to_string();
		Box::pin(async move { Connection::send_message(self, &guid, &method, params).await })
	}

	fn send_no_reply(&self, guid: &str, method: &str, params: Value) -> Result<()> {
		Connection::send_no_reply(self, guid, method, params)
	}

	fn register_object(&self, guid: Arc<str>, object: Arc<dyn ChannelOwner>) {
		self.objects.insert(guid, object);
	}

	fn unregister_object(&self, guid: &str) {
		self.objects.remove(guid);
	}

	fn try_get_object(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>> {
		self.objects.try_get(guid)
	}

	fn wait_for_object(&self, guid: &str, timeout: Duration) -> AsyncChannelOwnerResult<'_> {
		let guid = guid.to_string();
		Box::pin(async move { self.objects.wait_for(&guid, timeout).await })
	}

	fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}
}
