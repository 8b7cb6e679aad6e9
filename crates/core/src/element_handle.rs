//! Remote DOM element references.

use std::sync::Arc;

use pilot_protocol::ClickOptions;
use pilot_runtime::{ChannelOwner, ChannelOwnerImpl, DisposeReason, ParentOrConnection, Result};
use serde_json::Value;

use crate::file_payload::InputFiles;

const DEFAULT_ACTION_TIMEOUT_MS: f64 = 30_000.0;

/// A handle to an element living in a page.
pub struct ElementHandle {
	base: ChannelOwnerImpl,
}

impl ElementHandle {
	pub(crate) fn new(parent: ParentOrConnection, guid: Arc<str>, initializer: Value) -> Arc<Self> {
		Arc::new(Self {
			base: ChannelOwnerImpl::new(parent, "ElementHandle", guid, initializer),
		})
	}

	/// Sets the files of an `<input type=file>`. An empty list clears it.
	pub async fn set_input_files(&self, files: impl Into<InputFiles>, timeout: Option<f64>) -> Result<()> {
		let payloads = files.into().to_wire().await?;
		self.channel()
			.send_no_result(
				"setInputFiles",
				serde_json::json!({
					"payloads": payloads,
					"timeout": timeout.unwrap_or(DEFAULT_ACTION_TIMEOUT_MS),
				}),
			)
			.await
	}

	pub async fn click(&self, options: Option<ClickOptions>) -> Result<()> {
		let mut params = serde_json::to_value(options.unwrap_or_default())?;
		if params.get("timeout").is_none() {
			params["timeout"] = serde_json::json!(DEFAULT_ACTION_TIMEOUT_MS);
		}
		self.channel().send_no_result("click", params).await
	}

	fn handle_event(&self, method: &str, params: Value) {
		self.base.on_event(method, params);
	}

	fn handle_dispose(&self, reason: DisposeReason) {
		self.base.dispose(reason);
	}
}

pilot_runtime::impl_channel_owner!(ElementHandle);

impl std::fmt::Debug for ElementHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ElementHandle").field("guid", &self.guid()).finish()
	}
}
