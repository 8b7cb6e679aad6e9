//! HTTP request context: remote-executed fetches with client-side policy.
//!
//! The remote performs single HTTP exchanges ("hops"). Everything around a
//! hop is decided here:
//!
//! - header assembly (user agent, extra headers, per-call overrides, credentials)
//! - body serialization ([`RequestData`](crate::RequestData))
//! - redirect following, including the POST to GET rewrite
//! - proxy routing
//! - timeouts and cancellation on [`dispose`](RequestContext::dispose)

mod config;
mod fetch_options;
mod operation;
mod proxy;
mod redirect;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
pub(crate) use config::ContextConfig;
pub use fetch_options::FetchOptions;
pub use operation::{Operation, OperationState};
use operation::OperationTracker;
use pilot_protocol::{FetchHopParams, FetchHopResult, FetchResponseInit, FetchUidParams, HeaderEntry};
use pilot_runtime::{ChannelOwner, ChannelOwnerImpl, DisposeReason, Error, ParentOrConnection, Result};
use redirect::{is_redirect, resolve_location, switches_to_get};
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::api_response::APIResponse;
use crate::post_data::encode_form;
use crate::timeout_settings::TimeoutSettings;

/// A context for issuing HTTP requests through the remote.
///
/// Created by [`Pilot::new_request_context`](crate::Pilot::new_request_context).
/// Requests are independent and may run concurrently. Disposing the context
/// fails every outstanding request with [`Error::ContextDisposed`] and
/// invalidates the bodies of responses it produced.
pub struct RequestContext {
	base: ChannelOwnerImpl,
	self_ref: Weak<RequestContext>,
	config: OnceLock<ContextConfig>,
	timeouts: TimeoutSettings,
	cancel: CancellationToken,
	disposed: AtomicBool,
	dispose_done: OnceCell<()>,
	operations: OperationTracker,
}

impl RequestContext {
	pub(crate) fn new(parent: ParentOrConnection, guid: Arc<str>, initializer: Value) -> Arc<Self> {
		Arc::new_cyclic(|self_ref| Self {
			base: ChannelOwnerImpl::new(parent, "APIRequestContext", guid, initializer),
			self_ref: self_ref.clone(),
			config: OnceLock::new(),
			timeouts: TimeoutSettings::new(None),
			cancel: CancellationToken::new(),
			disposed: AtomicBool::new(false),
			dispose_done: OnceCell::new(),
			operations: OperationTracker::default(),
		})
	}

	/// Installs the validated options. Only the first call takes effect.
	pub(crate) fn configure(&self, config: ContextConfig, default_timeout: Option<f64>) -> Result<()> {
		self.timeouts.set_default_timeout(default_timeout);
		self.config
			.set(config)
			.map_err(|_| Error::InvalidArgument("Request context is already configured".to_string()))
	}

	fn config(&self) -> &ContextConfig {
		self.config.get_or_init(ContextConfig::default)
	}

	/// The `User-Agent` sent with every request.
	pub fn user_agent(&self) -> &str {
		&self.config().user_agent
	}

	pub fn is_disposed(&self) -> bool {
		self.disposed.load(Ordering::SeqCst)
	}

	/// Operations still awaiting a result.
	pub fn pending_operations(&self) -> Vec<Operation> {
		self.operations.pending()
	}

	/// The most recently settled operations, oldest first.
	pub fn finished_operations(&self) -> Vec<Operation> {
		self.operations.finished()
	}

	/// Sends a request and returns its final response.
	///
	/// The method defaults to `GET`. Redirects are followed up to the
	/// configured limit.
	///
	/// # Errors
	///
	/// - [`Error::ContextDisposed`] if the context is or becomes disposed
	/// - [`Error::Timeout`] when the effective timeout elapses
	/// - [`Error::RequestFailed`] for too many redirects, or a non-2xx status
	///   with `fail_on_status_code`
	/// - [`Error::InvalidArgument`] for malformed URLs or options
	pub async fn fetch(&self, url: &str, options: Option<FetchOptions>) -> Result<APIResponse> {
		if self.is_disposed() {
			return Err(Error::ContextDisposed);
		}
		let options = options.unwrap_or_default();
		options.validate()?;

		let config = self.config();
		let method = options
			.method
			.as_deref()
			.unwrap_or("GET")
			.to_ascii_uppercase();
		let target = config.resolve_url(url, &options.params)?;
		let timeout = self.timeouts.timeout(options.timeout)?;

		let guard = self.operations.begin(&method, target.as_str(), timeout);
		tracing::debug!(operation = guard.id(), %method, url = %target, "fetch");

		let work = self.follow_redirects(config, method, target, &options, timeout);
		let bounded = async {
			match timeout {
				Some(bound) => tokio::time::timeout(bound, work).await.map_err(|_| {
					Error::Timeout(format!("Request timed out after {}ms", bound.as_millis()))
				})?,
				None => work.await,
			}
		};
		let result = tokio::select! {
			biased;
			_ = self.cancel.cancelled() => Err(Error::ContextDisposed),
			result = bounded => result,
		};

		guard.finish(&result);
		result
	}

	pub async fn get(&self, url: &str, options: Option<FetchOptions>) -> Result<APIResponse> {
		self.fetch(url, Some(with_method(options, "GET"))).await
	}

	pub async fn post(&self, url: &str, options: Option<FetchOptions>) -> Result<APIResponse> {
		self.fetch(url, Some(with_method(options, "POST"))).await
	}

	pub async fn put(&self, url: &str, options: Option<FetchOptions>) -> Result<APIResponse> {
		self.fetch(url, Some(with_method(options, "PUT"))).await
	}

	pub async fn patch(&self, url: &str, options: Option<FetchOptions>) -> Result<APIResponse> {
		self.fetch(url, Some(with_method(options, "PATCH"))).await
	}

	pub async fn delete(&self, url: &str, options: Option<FetchOptions>) -> Result<APIResponse> {
		self.fetch(url, Some(with_method(options, "DELETE"))).await
	}

	pub async fn head(&self, url: &str, options: Option<FetchOptions>) -> Result<APIResponse> {
		self.fetch(url, Some(with_method(options, "HEAD"))).await
	}

	async fn follow_redirects(
		&self,
		config: &ContextConfig,
		mut method: String,
		mut url: Url,
		options: &FetchOptions,
		timeout: Option<Duration>,
	) -> Result<APIResponse> {
		let mut headers = request_headers(config, options);
		let mut body = encode_body(options, &mut headers)?;
		let max_redirects = options.max_redirects.unwrap_or(config.max_redirects);
		let ignore_https_errors = options
			.ignore_https_errors
			.unwrap_or(config.ignore_https_errors);
		let mut redirects = 0;

		loop {
			let mut hop_headers = headers.clone();
			if find_header(&hop_headers, "authorization").is_none() {
				if let Some(authorization) = config.authorization_for(&url) {
					hop_headers.push(HeaderEntry::new("authorization", authorization));
				}
			}

			let params = FetchHopParams {
				url: url.to_string(),
				method: method.clone(),
				headers: hop_headers,
				post_data: body.as_ref().map(|b| STANDARD.encode(b)),
				ignore_https_errors,
				proxy: config.proxy.as_ref().and_then(|p| p.route(&url)),
				timeout: timeout.map(|t| t.as_millis() as f64),
			};
			let FetchHopResult { response } = self.channel().send("fetch", params).await?;

			let location = is_redirect(response.status)
				.then(|| find_header(&response.headers, "location").map(str::to_string))
				.flatten();
			let Some(location) = location.filter(|_| max_redirects > 0) else {
				return self.finish_response(response, options, config).await;
			};

			// Intermediate hops are never handed out; release their bodies.
			self.channel().send_no_reply(
				"disposeAPIResponse",
				FetchUidParams {
					fetch_uid: response.fetch_uid.clone(),
				},
			);
			if redirects == max_redirects {
				return Err(Error::RequestFailed("Max redirect count exceeded".to_string()));
			}
			redirects += 1;

			let next = resolve_location(&url, &location)?;
			if switches_to_get(response.status, &method) {
				method = "GET".to_string();
				body = None;
				remove_header(&mut headers, "content-length");
				remove_header(&mut headers, "content-type");
			}
			tracing::debug!(from = %url, to = %next, status = response.status, "following redirect");
			url = next;
		}
	}

	async fn finish_response(
		&self,
		init: FetchResponseInit,
		options: &FetchOptions,
		config: &ContextConfig,
	) -> Result<APIResponse> {
		let context = self.self_ref.upgrade().ok_or(Error::ContextDisposed)?;
		let response = APIResponse::new(context, init);
		if options.fail_on_status_code.unwrap_or(config.fail_on_status_code) && !response.ok() {
			// The caller never sees this response, so its body is released here.
			if let Err(e) = response.dispose().await {
				tracing::debug!(fetch_uid = %response.fetch_uid(), "failed response not released: {e}");
			}
			return Err(Error::RequestFailed(format!(
				"{} {}",
				response.status(),
				response.status_text()
			)));
		}
		Ok(response)
	}

	/// Disposes the context.
	///
	/// Outstanding requests fail with [`Error::ContextDisposed`] and the
	/// remote is told to close their connections. Safe to call repeatedly
	/// and concurrently; every call returns once disposal completed.
	pub async fn dispose(&self) -> Result<()> {
		self.dispose_done
			.get_or_init(|| async {
				self.mark_disposed();
				if let Err(e) = self.channel().send_no_result("dispose", Value::Null).await {
					tracing::debug!(guid = %self.guid(), "dispose not acknowledged: {e}");
				}
			})
			.await;
		Ok(())
	}

	fn mark_disposed(&self) {
		if self.disposed.swap(true, Ordering::SeqCst) {
			return;
		}
		self.cancel.cancel();
		let cancelled = self.operations.cancel_all();
		tracing::debug!(guid = %self.guid(), cancelled, "request context disposed");
	}

	fn handle_event(&self, method: &str, params: Value) {
		self.base.on_event(method, params);
	}

	fn handle_dispose(&self, reason: DisposeReason) {
		self.mark_disposed();
		self.base.dispose(reason);
	}
}

pilot_runtime::impl_channel_owner!(RequestContext);

impl std::fmt::Debug for RequestContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RequestContext")
			.field("guid", &self.guid())
			.field("disposed", &self.is_disposed())
			.finish()
	}
}

fn with_method(options: Option<FetchOptions>, method: &str) -> FetchOptions {
	let mut options = options.unwrap_or_default();
	options.method = Some(method.to_string());
	options
}

fn find_header<'a>(headers: &'a [HeaderEntry], name: &str) -> Option<&'a str> {
	headers
		.iter()
		.rev()
		.find(|h| h.name.eq_ignore_ascii_case(name))
		.map(|h| h.value.as_str())
}

/// Replaces every header named `name` (case-insensitive) with one entry.
fn set_header(headers: &mut Vec<HeaderEntry>, name: &str, value: &str) {
	match headers.iter().position(|h| h.name.eq_ignore_ascii_case(name)) {
		Some(index) => {
			headers[index] = HeaderEntry::new(name, value);
			let mut i = index + 1;
			while i < headers.len() {
				if headers[i].name.eq_ignore_ascii_case(name) {
					headers.remove(i);
				} else {
					i += 1;
				}
			}
		}
		None => headers.push(HeaderEntry::new(name, value)),
	}
}

fn remove_header(headers: &mut Vec<HeaderEntry>, name: &str) {
	headers.retain(|h| !h.name.eq_ignore_ascii_case(name));
}

/// Defaults, then the context's extra headers, then per-call headers.
fn request_headers(config: &ContextConfig, options: &FetchOptions) -> Vec<HeaderEntry> {
	let mut headers = vec![
		HeaderEntry::new("user-agent", config.user_agent.as_str()),
		HeaderEntry::new("accept", "*/*"),
		HeaderEntry::new("accept-encoding", "gzip,deflate,br"),
	];
	for (name, value) in config.extra_headers.iter().chain(options.headers.iter()) {
		set_header(&mut headers, name, value);
	}
	headers
}

/// Serializes the body and sets `content-type` (unless given) and `content-length`.
fn encode_body(options: &FetchOptions, headers: &mut Vec<HeaderEntry>) -> Result<Option<Vec<u8>>> {
	let encoded = match (&options.data, &options.form) {
		(Some(data), _) => data.encode(find_header(headers, "content-type"))?,
		(None, Some(form)) => encode_form(form),
		(None, None) => return Ok(None),
	};
	if find_header(headers, "content-type").is_none() {
		headers.push(HeaderEntry::new("content-type", encoded.default_content_type));
	}
	set_header(headers, "content-length", &encoded.bytes.len().to_string());
	Ok(Some(encoded.bytes))
}

#[cfg(test)]
mod tests {
	use pilot_protocol::RequestContextOptions;
	use serde_json::json;

	use super::*;

	fn names(headers: &[HeaderEntry]) -> Vec<(&str, &str)> {
		headers
			.iter()
			.map(|h| (h.name.as_str(), h.value.as_str()))
			.collect()
	}

	#[test]
	fn test_header_precedence() {
		let config = ContextConfig::from_options(
			&RequestContextOptions::builder()
				.user_agent("My Agent")
				.extra_http_header("My-Secret", "Value")
				.extra_http_header("X-Override", "context")
				.build(),
		)
		.unwrap();
		let options = FetchOptions::new()
			.header("x-override", "call")
			.header("ACCEPT", "application/json");
		let headers = request_headers(&config, &options);
		assert_eq!(
			names(&headers),
			vec![
				("user-agent", "My Agent"),
				("ACCEPT", "application/json"),
				("accept-encoding", "gzip,deflate,br"),
				("My-Secret", "Value"),
				("x-override", "call"),
			]
		);
	}

	#[test]
	fn test_body_sets_length_and_default_type() {
		let options = FetchOptions::new().data(json!({"foo": "bar"}));
		let mut headers = Vec::new();
		let body = encode_body(&options, &mut headers).unwrap().unwrap();
		assert_eq!(body, br#"{"foo":"bar"}"#);
		assert_eq!(find_header(&headers, "content-length"), Some("13"));
		assert_eq!(find_header(&headers, "content-type"), Some("application/json"));

		let options = FetchOptions::new()
			.header("Content-Type", "application/json")
			.data("My post data");
		let mut headers = request_headers(&ContextConfig::default(), &options);
		let body = encode_body(&options, &mut headers).unwrap().unwrap();
		assert_eq!(body, br#""My post data""#);
		assert_eq!(find_header(&headers, "content-type"), Some("application/json"));

		let mut headers = Vec::new();
		assert!(encode_body(&FetchOptions::new(), &mut headers).unwrap().is_none());
		assert!(headers.is_empty());
	}

	#[test]
	fn test_set_header_collapses_duplicates() {
		let mut headers = vec![
			HeaderEntry::new("X-A", "1"),
			HeaderEntry::new("x-b", "2"),
			HeaderEntry::new("x-a", "3"),
		];
		set_header(&mut headers, "x-a", "4");
		assert_eq!(names(&headers), vec![("x-a", "4"), ("x-b", "2")]);
		remove_header(&mut headers, "X-B");
		assert_eq!(headers.len(), 1);
	}
}
