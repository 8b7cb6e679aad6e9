//! Typed command sending for one remote object.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::connection::ConnectionLike;
use crate::error::Result;

/// A remote object's GUID bound to the connection that reaches it.
#[derive(Clone)]
pub struct Channel {
	guid: Arc<str>,
	connection: Arc<dyn ConnectionLike>,
}

impl Channel {
	pub fn new(guid: Arc<str>, connection: Arc<dyn ConnectionLike>) -> Self {
		Self { guid, connection }
	}

	pub fn guid(&self) -> &str {
		&self.guid
	}

	pub fn connection(&self) -> &Arc<dyn ConnectionLike> {
		&self.connection
	}

	/// Sends `method` and decodes the result as `R`.
	pub async fn send<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R> {
		let raw = self.call(method, serde_json::to_value(params)?).await?;
		Ok(serde_json::from_value(raw)?)
	}

	pub async fn send_no_params<R: DeserializeOwned>(&self, method: &str) -> Result<R> {
		self.send(method, Value::Null).await
	}

	/// Sends `method` and discards whatever it returns.
	pub async fn send_no_result<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
		self.call(method, serde_json::to_value(params)?).await.map(drop)
	}

	/// Sends `method` from synchronous code without waiting for the reply.
	///
	/// The command is queued before this returns, so successive calls keep
	/// their order on the wire. Failures only reach the log.
	pub fn send_no_reply<P: Serialize>(&self, method: &str, params: P) {
		let params = match serde_json::to_value(params) {
			Ok(params) => params,
			Err(e) => {
				tracing::warn!(guid = %self.guid, method, "unserializable params: {e}");
				return;
			}
		};
		if let Err(e) = self.connection.send_no_reply(&self.guid, method, params) {
			tracing::debug!(guid = %self.guid, method, "command not sent: {e}");
		}
	}

	async fn call(&self, method: &str, params: Value) -> Result<Value> {
		self.connection.send_message(&self.guid, method, params).await
	}
}
