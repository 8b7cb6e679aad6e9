//! Handshake object registered under the empty GUID.

use std::sync::Arc;

use pilot_runtime::{ChannelOwner, ChannelOwnerImpl, ConnectionLike, DisposeReason, Error, ParentOrConnection, Result};
use serde_json::Value;

use crate::object_factory::guid_ref;

/// Exists only for the `initialize` exchange.
pub(crate) struct Root {
	base: ChannelOwnerImpl,
}

impl Root {
	pub(crate) fn new(connection: Arc<dyn ConnectionLike>) -> Arc<Self> {
		Arc::new(Self {
			base: ChannelOwnerImpl::new(
				ParentOrConnection::Connection(connection),
				"Root",
				Arc::from(""),
				Value::Null,
			),
		})
	}

	/// Sends `initialize` and returns the GUID of the `Pilot` object.
	pub(crate) async fn initialize(&self) -> Result<String> {
		let response: Value = self
			.channel()
			.send("initialize", serde_json::json!({ "sdkLanguage": "rust" }))
			.await?;
		guid_ref(&response, "pilot")
			.map(str::to_string)
			.ok_or_else(|| Error::ProtocolError("Initialize response missing 'pilot.guid' field".to_string()))
	}

	fn handle_event(&self, method: &str, params: Value) {
		self.base.on_event(method, params);
	}

	fn handle_dispose(&self, reason: DisposeReason) {
		self.base.dispose(reason);
	}
}

pilot_runtime::impl_channel_owner!(Root);
