//! Response of a [`RequestContext`] fetch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pilot_protocol::{FetchBodyResult, FetchResponseInit, FetchUidParams, HeaderEntry};
use pilot_runtime::{ChannelOwner, Error, Result};
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;

use crate::request_context::RequestContext;

/// Status line, headers and lazily fetched body of one fetch.
///
/// Cheap to clone; clones share the body cache. The body is bound to the
/// owning [`RequestContext`]: once the context is disposed every read fails
/// with [`Error::ResponseDisposed`], even if the bytes were already fetched.
#[derive(Clone)]
pub struct APIResponse {
	inner: Arc<ResponseInner>,
}

struct ResponseInner {
	context: Arc<RequestContext>,
	init: FetchResponseInit,
	body: OnceCell<Vec<u8>>,
	disposed: AtomicBool,
}

impl APIResponse {
	pub(crate) fn new(context: Arc<RequestContext>, init: FetchResponseInit) -> Self {
		Self {
			inner: Arc::new(ResponseInner {
				context,
				init,
				body: OnceCell::new(),
				disposed: AtomicBool::new(false),
			}),
		}
	}

	pub fn url(&self) -> &str {
		&self.inner.init.url
	}

	pub fn status(&self) -> u16 {
		self.inner.init.status
	}

	pub fn status_text(&self) -> &str {
		&self.inner.init.status_text
	}

	/// `true` for statuses in `200..=299`.
	pub fn ok(&self) -> bool {
		(200..=299).contains(&self.status())
	}

	/// Headers keyed by lower-cased name. For repeated names the last value wins;
	/// use [`headers_array`](Self::headers_array) to see every entry.
	pub fn headers(&self) -> HashMap<String, String> {
		self.inner
			.init
			.headers
			.iter()
			.map(|h| (h.name.to_ascii_lowercase(), h.value.clone()))
			.collect()
	}

	/// Headers in wire order with their original casing and duplicates.
	pub fn headers_array(&self) -> &[HeaderEntry] {
		&self.inner.init.headers
	}

	/// Case-insensitive lookup of the last value for `name`.
	pub fn header_value(&self, name: &str) -> Option<&str> {
		self.inner
			.init
			.headers
			.iter()
			.rev()
			.find(|h| h.name.eq_ignore_ascii_case(name))
			.map(|h| h.value.as_str())
	}

	pub(crate) fn fetch_uid(&self) -> &str {
		&self.inner.init.fetch_uid
	}

	fn ensure_alive(&self) -> Result<()> {
		if self.inner.disposed.load(Ordering::SeqCst) || self.inner.context.is_disposed() {
			return Err(Error::ResponseDisposed);
		}
		Ok(())
	}

	/// Returns the body bytes, fetching them from the remote on first use.
	///
	/// # Errors
	///
	/// Returns [`Error::ResponseDisposed`] after the response or its context
	/// was disposed.
	pub async fn body(&self) -> Result<Vec<u8>> {
		self.ensure_alive()?;
		let bytes = self
			.inner
			.body
			.get_or_try_init(|| async {
				let result: FetchBodyResult = self
					.inner
					.context
					.channel()
					.send(
						"fetchResponseBody",
						FetchUidParams {
							fetch_uid: self.fetch_uid().to_string(),
						},
					)
					.await?;
				let Some(binary) = result.binary else {
					return Err(Error::ResponseDisposed);
				};
				STANDARD
					.decode(binary)
					.map_err(|e| Error::ProtocolError(format!("Invalid response body encoding: {e}")))
			})
			.await?;
		// Disposal may have raced with the fetch.
		self.ensure_alive()?;
		Ok(bytes.clone())
	}

	/// Returns the body decoded as UTF-8, replacing invalid sequences.
	pub async fn text(&self) -> Result<String> {
		let body = self.body().await?;
		Ok(String::from_utf8_lossy(&body).into_owned())
	}

	/// Parses the body as JSON.
	pub async fn json<T: DeserializeOwned>(&self) -> Result<T> {
		let body = self.body().await?;
		serde_json::from_slice(&body).map_err(Into::into)
	}

	/// Releases the body on the remote. Later reads fail.
	pub async fn dispose(&self) -> Result<()> {
		if self.inner.disposed.swap(true, Ordering::SeqCst) || self.inner.context.is_disposed() {
			return Ok(());
		}
		self.inner
			.context
			.channel()
			.send_no_result(
				"disposeAPIResponse",
				FetchUidParams {
					fetch_uid: self.fetch_uid().to_string(),
				},
			)
			.await
	}
}

impl fmt::Display for APIResponse {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "APIResponse: {} {}", self.status(), self.status_text())?;
		for header in self.headers_array() {
			write!(f, "\n  {}: {}", header.name, header.value)?;
		}
		Ok(())
	}
}

impl fmt::Debug for APIResponse {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("APIResponse")
			.field("url", &self.url())
			.field("status", &self.status())
			.field("fetch_uid", &self.fetch_uid())
			.finish()
	}
}
