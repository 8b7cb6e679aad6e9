//! Scripted in-process remote speaking the framed protocol over a duplex pipe.
//!
//! Commands are answered from a small built-in model (objects, fetch routes,
//! response bodies). Tests push events with [`FakeRemote::event`] and
//! inspect what the client sent with [`FakeRemote::calls`] and
//! [`FakeRemote::hops`].

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use pilot::protocol::FetchHopParams;
use pilot::{ChannelOwner, Page, Pilot, TransportParts};
use pilot_runtime::PipeTransport;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf, duplex};

pub const PILOT_GUID: &str = "pilot@1";

/// Canned answer for one URL.
#[derive(Debug, Clone)]
pub struct Reply {
	pub status: u16,
	pub status_text: String,
	pub headers: Vec<(String, String)>,
	pub body: Vec<u8>,
}

impl Reply {
	pub fn new(status: u16) -> Self {
		Self {
			status,
			status_text: reason_phrase(status).to_string(),
			headers: Vec::new(),
			body: Vec::new(),
		}
	}

	pub fn header(mut self, name: &str, value: &str) -> Self {
		self.headers.push((name.to_string(), value.to_string()));
		self
	}

	pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = body.into();
		self
	}

	pub fn redirect(status: u16, location: &str) -> Self {
		Self::new(status).header("Location", location)
	}
}

fn reason_phrase(status: u16) -> &'static str {
	match status {
		200 => "OK",
		204 => "No Content",
		301 => "Moved Permanently",
		302 => "Found",
		303 => "See Other",
		307 => "Temporary Redirect",
		401 => "Unauthorized",
		404 => "Not Found",
		500 => "Internal Server Error",
		_ => "",
	}
}

#[derive(Default)]
struct State {
	routes: HashMap<String, Reply>,
	hanging: HashSet<String>,
	hops: Vec<FetchHopParams>,
	bodies: HashMap<String, Vec<u8>>,
	calls: Vec<(String, String, Value)>,
	results: HashMap<String, Value>,
	silent: HashSet<String>,
}

struct Inner {
	writer: tokio::sync::Mutex<WriteHalf<DuplexStream>>,
	state: Mutex<State>,
	next_guid: AtomicU64,
}

/// The remote end of a test connection.
#[derive(Clone)]
pub struct FakeRemote {
	inner: Arc<Inner>,
}

impl FakeRemote {
	/// Creates the remote and the transport the client should connect with.
	pub fn start() -> (Self, TransportParts) {
		let (client_side, remote_side) = duplex(1 << 20);
		let (client_read, client_write) = tokio::io::split(client_side);
		let (remote_read, remote_write) = tokio::io::split(remote_side);

		let (transport, message_rx) = PipeTransport::new(client_write, client_read);
		let remote = Self {
			inner: Arc::new(Inner {
				writer: tokio::sync::Mutex::new(remote_write),
				state: Mutex::new(State::default()),
				next_guid: AtomicU64::new(1),
			}),
		};
		tokio::spawn(remote.clone().serve(remote_read));
		(remote, transport.into_transport_parts(message_rx))
	}

	/// Starts a remote and connects a client to it.
	pub async fn connect() -> (Self, Arc<Pilot>) {
		let (remote, parts) = Self::start();
		let pilot = Pilot::connect(parts).await.expect("handshake");
		(remote, pilot)
	}

	/// Answers fetches of `url` with `reply`.
	pub fn route(&self, url: &str, reply: Reply) {
		self.inner.state.lock().routes.insert(url.to_string(), reply);
	}

	/// Never answers fetches of `url`.
	pub fn hang(&self, url: &str) {
		self.inner.state.lock().hanging.insert(url.to_string());
	}

	/// Canned result for every call of `method`.
	pub fn result(&self, method: &str, result: Value) {
		self.inner.state.lock().results.insert(method.to_string(), result);
	}

	/// Never answers calls of `method`.
	pub fn silence(&self, method: &str) {
		self.inner.state.lock().silent.insert(method.to_string());
	}

	/// Every `fetch` hop received so far.
	pub fn hops(&self) -> Vec<FetchHopParams> {
		self.inner.state.lock().hops.clone()
	}

	/// `(guid, params)` of every call of `method` received so far.
	pub fn calls(&self, method: &str) -> Vec<(String, Value)> {
		self.inner
			.state
			.lock()
			.calls
			.iter()
			.filter(|(_, m, _)| m == method)
			.map(|(guid, _, params)| (guid.clone(), params.clone()))
			.collect()
	}

	pub fn guid(&self, prefix: &str) -> String {
		format!("{prefix}@{}", self.inner.next_guid.fetch_add(1, Ordering::SeqCst) + 1)
	}

	pub async fn create(&self, parent: &str, type_name: &str, guid: &str, initializer: Value) {
		self.event(
			parent,
			"__create__",
			json!({"type": type_name, "guid": guid, "initializer": initializer}),
		)
		.await;
	}

	pub async fn dispose(&self, guid: &str) {
		self.event(guid, "__dispose__", json!({})).await;
	}

	pub async fn event(&self, guid: &str, method: &str, params: Value) {
		self.write(json!({"guid": guid, "method": method, "params": params})).await;
	}

	/// Creates a worker under `page` and announces it.
	pub async fn spawn_worker(&self, page: &Page, frame: Option<&str>, url: &str) -> String {
		let guid = self.guid("worker");
		let mut initializer = json!({"url": url});
		if let Some(frame) = frame {
			initializer["frame"] = json!({"guid": frame});
		}
		self.create(page.guid(), "Worker", &guid, initializer).await;
		self.event(page.guid(), "worker", json!({"worker": {"guid": guid}})).await;
		guid
	}

	/// Creates a child frame of `parent` and attaches it to `page`.
	pub async fn attach_frame(&self, page: &Page, parent: &str, url: &str) -> String {
		let guid = self.guid("frame");
		self.create(
			page.guid(),
			"Frame",
			&guid,
			json!({"url": url, "name": "", "parentFrame": {"guid": parent}}),
		)
		.await;
		self.event(page.guid(), "frameAttached", json!({"frame": {"guid": guid}})).await;
		guid
	}

	pub async fn navigate(&self, frame: &str, url: &str, new_document: bool) {
		let mut params = json!({"url": url, "name": ""});
		if new_document {
			params["newDocument"] = json!({"request": null});
		}
		self.event(frame, "navigated", params).await;
	}

	async fn write(&self, message: Value) {
		let bytes = serde_json::to_vec(&message).expect("serializable");
		let mut writer = self.inner.writer.lock().await;
		writer.write_all(&(bytes.len() as u32).to_le_bytes()).await.expect("write length");
		writer.write_all(&bytes).await.expect("write body");
		writer.flush().await.expect("flush");
	}

	async fn serve(self, mut reader: ReadHalf<DuplexStream>) {
		loop {
			let mut len = [0u8; 4];
			if reader.read_exact(&mut len).await.is_err() {
				return;
			}
			let mut buf = vec![0u8; u32::from_le_bytes(len) as usize];
			if reader.read_exact(&mut buf).await.is_err() {
				return;
			}
			let Ok(message) = serde_json::from_slice::<Value>(&buf) else {
				continue;
			};
			self.handle(message).await;
		}
	}

	async fn handle(&self, message: Value) {
		let id = message["id"].clone();
		let guid = message["guid"].as_str().unwrap_or_default().to_string();
		let method = message["method"].as_str().unwrap_or_default().to_string();
		let params = message["params"].clone();
		let (silent, canned) = {
			let mut state = self.inner.state.lock();
			state.calls.push((guid.clone(), method.clone(), params.clone()));
			(state.silent.contains(&method), state.results.get(&method).cloned())
		};
		if silent {
			return;
		}

		let result = match method.as_str() {
			"initialize" => {
				self.create("", "Pilot", PILOT_GUID, json!({})).await;
				json!({"pilot": {"guid": PILOT_GUID}})
			}
			"newRequest" => {
				let request = self.guid("request");
				self.create(&guid, "APIRequestContext", &request, json!({})).await;
				json!({"request": {"guid": request}})
			}
			"newPage" => {
				let frame = self.guid("frame");
				let page = self.guid("page");
				self.create(&guid, "Frame", &frame, json!({"url": "about:blank", "name": ""})).await;
				self.create(&guid, "Page", &page, json!({"mainFrame": {"guid": frame}})).await;
				json!({"page": {"guid": page}})
			}
			"fetch" => match self.fetch(&params) {
				Some(result) => result,
				None => return,
			},
			"fetchResponseBody" => {
				let uid = params["fetchUid"].as_str().unwrap_or_default();
				let body = self.inner.state.lock().bodies.get(uid).cloned();
				match body {
					Some(body) => json!({"binary": STANDARD.encode(body)}),
					None => json!({}),
				}
			}
			"disposeAPIResponse" => {
				let uid = params["fetchUid"].as_str().unwrap_or_default();
				self.inner.state.lock().bodies.remove(uid);
				json!({})
			}
			_ => canned.unwrap_or_else(|| json!({})),
		};
		self.write(json!({"id": id, "result": result})).await;
	}

	fn fetch(&self, params: &Value) -> Option<Value> {
		let hop: FetchHopParams = serde_json::from_value(params.clone()).expect("fetch params");
		let mut state = self.inner.state.lock();
		state.hops.push(hop.clone());
		if state.hanging.contains(&hop.url) {
			return None;
		}
		let reply = state.routes.get(&hop.url).cloned().unwrap_or_else(|| Reply::new(404));
		let uid = format!("fetch-{}", state.hops.len());
		let body = if hop.method == "HEAD" { Vec::new() } else { reply.body };
		state.bodies.insert(uid.clone(), body);
		let headers: Vec<Value> = reply
			.headers
			.iter()
			.map(|(name, value)| json!({"name": name, "value": value}))
			.collect();
		Some(json!({
			"response": {
				"url": hop.url,
				"status": reply.status,
				"statusText": reply.status_text,
				"headers": headers,
				"fetchUid": uid,
			}
		}))
	}
}

/// Waits until every event sent before this call has been dispatched.
///
/// A command's reply is dispatched after all earlier events, so one round
/// trip on any live page is enough.
pub async fn settle(page: &Page) {
	page.main_frame().evaluate("0", None).await.expect("round trip");
}

/// Polls `condition` until it holds. Panics after two seconds.
///
/// For fire-and-forget messages, which have no reply to wait on.
pub async fn eventually(condition: impl Fn() -> bool) {
	let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
	while !condition() {
		assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
	}
}

pub fn init_test_logging() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}
