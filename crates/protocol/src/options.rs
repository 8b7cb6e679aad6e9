//! Option structs for pilot API methods.
//!
//! These types represent the configuration options passed to request
//! contexts, pages and waiters. They are designed for serialization to the
//! wire and follow a builder pattern for ergonomic construction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::WaitUntil;

/// Default timeout in milliseconds for page operations and event waits.
pub const DEFAULT_TIMEOUT_MS: f64 = 30000.0;

/// Default number of redirects a request context follows before failing.
pub const DEFAULT_MAX_REDIRECTS: u32 = 20;

/// HTTP credentials attached to requests of a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCredentials {
	/// Username
	pub username: String,
	/// Password
	pub password: String,
	/// Origin to send credentials to (optional)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub origin: Option<String>,
}

impl HttpCredentials {
	/// Creates new HTTP credentials.
	pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
		Self {
			username: username.into(),
			password: password.into(),
			origin: None,
		}
	}

	/// Restricts the credentials to one origin.
	pub fn origin(mut self, origin: impl Into<String>) -> Self {
		self.origin = Some(origin.into());
		self
	}
}

/// Proxy used for every hop of a request context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySettings {
	/// Proxy server, e.g. `http://myproxy.com:3128` or `myproxy.com:3128`
	pub server: String,
	/// Comma-separated hosts that bypass the proxy, e.g. `.example.com, localhost`
	#[serde(skip_serializing_if = "Option::is_none")]
	pub bypass: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub username: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub password: Option<String>,
}

impl ProxySettings {
	pub fn new(server: impl Into<String>) -> Self {
		Self {
			server: server.into(),
			bypass: None,
			username: None,
			password: None,
		}
	}

	pub fn bypass(mut self, bypass: impl Into<String>) -> Self {
		self.bypass = Some(bypass.into());
		self
	}

	/// Sets proxy authentication.
	pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
		self.username = Some(username.into());
		self.password = Some(password.into());
		self
	}
}

/// Options for creating a request context.
///
/// Use [`RequestContextOptions::builder`] for ergonomic construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContextOptions {
	/// User agent sent with every request
	#[serde(skip_serializing_if = "Option::is_none")]
	pub user_agent: Option<String>,

	/// Default timeout for requests in milliseconds (0 disables it)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timeout: Option<f64>,

	/// Headers sent with every request
	#[serde(rename = "extraHTTPHeaders", skip_serializing_if = "Option::is_none")]
	pub extra_http_headers: Option<HashMap<String, String>>,

	/// Credentials for HTTP authentication
	#[serde(skip_serializing_if = "Option::is_none")]
	pub http_credentials: Option<HttpCredentials>,

	/// Network proxy
	#[serde(skip_serializing_if = "Option::is_none")]
	pub proxy: Option<ProxySettings>,

	/// Whether to ignore HTTPS errors
	#[serde(rename = "ignoreHTTPSErrors", skip_serializing_if = "Option::is_none")]
	pub ignore_https_errors: Option<bool>,

	/// Base URL for relative request URLs
	#[serde(rename = "baseURL", skip_serializing_if = "Option::is_none")]
	pub base_url: Option<String>,

	/// Maximum number of redirects to follow
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_redirects: Option<u32>,

	/// Fail requests that answer with a non-2xx status
	#[serde(skip_serializing_if = "Option::is_none")]
	pub fail_on_status_code: Option<bool>,
}

impl RequestContextOptions {
	/// Creates a new builder.
	pub fn builder() -> RequestContextOptionsBuilder {
		RequestContextOptionsBuilder::default()
	}
}

/// Builder for [`RequestContextOptions`].
#[derive(Debug, Clone, Default)]
pub struct RequestContextOptionsBuilder {
	inner: RequestContextOptions,
}

impl RequestContextOptionsBuilder {
	/// Sets the user agent.
	pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.inner.user_agent = Some(user_agent.into());
		self
	}

	/// Sets the default request timeout in milliseconds.
	pub fn timeout(mut self, timeout_ms: f64) -> Self {
		self.inner.timeout = Some(timeout_ms);
		self
	}

	/// Sets extra HTTP headers.
	pub fn extra_http_headers(mut self, headers: HashMap<String, String>) -> Self {
		self.inner.extra_http_headers = Some(headers);
		self
	}

	/// Adds one extra HTTP header.
	pub fn extra_http_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.inner
			.extra_http_headers
			.get_or_insert_with(HashMap::new)
			.insert(name.into(), value.into());
		self
	}

	/// Sets HTTP credentials.
	pub fn http_credentials(mut self, creds: HttpCredentials) -> Self {
		self.inner.http_credentials = Some(creds);
		self
	}

	/// Sets the proxy.
	pub fn proxy(mut self, proxy: ProxySettings) -> Self {
		self.inner.proxy = Some(proxy);
		self
	}

	/// Sets whether HTTPS errors are ignored.
	pub fn ignore_https_errors(mut self, ignore: bool) -> Self {
		self.inner.ignore_https_errors = Some(ignore);
		self
	}

	/// Sets the base URL.
	pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
		self.inner.base_url = Some(base_url.into());
		self
	}

	/// Sets the redirect limit.
	pub fn max_redirects(mut self, max: u32) -> Self {
		self.inner.max_redirects = Some(max);
		self
	}

	/// Sets whether non-2xx statuses fail the request.
	pub fn fail_on_status_code(mut self, fail: bool) -> Self {
		self.inner.fail_on_status_code = Some(fail);
		self
	}

	/// Builds the options.
	pub fn build(self) -> RequestContextOptions {
		self.inner
	}
}

/// Navigation options for `goto()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GotoOptions {
	/// Maximum navigation time in milliseconds
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timeout: Option<f64>,

	/// When to consider navigation succeeded
	#[serde(skip_serializing_if = "Option::is_none")]
	pub wait_until: Option<WaitUntil>,

	/// Referer header value
	#[serde(skip_serializing_if = "Option::is_none")]
	pub referer: Option<String>,
}

impl GotoOptions {
	/// Creates new default options.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the timeout.
	pub fn timeout(mut self, timeout: f64) -> Self {
		self.timeout = Some(timeout);
		self
	}

	/// Sets the wait_until condition.
	pub fn wait_until(mut self, wait_until: WaitUntil) -> Self {
		self.wait_until = Some(wait_until);
		self
	}

	/// Sets the referer header.
	pub fn referer(mut self, referer: impl Into<String>) -> Self {
		self.referer = Some(referer.into());
		self
	}
}

/// Click options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickOptions {
	/// Number of clicks
	#[serde(skip_serializing_if = "Option::is_none")]
	pub click_count: Option<u32>,

	/// Bypass actionability checks
	#[serde(skip_serializing_if = "Option::is_none")]
	pub force: Option<bool>,

	/// Maximum time in milliseconds
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timeout: Option<f64>,
}

impl ClickOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn click_count(mut self, count: u32) -> Self {
		self.click_count = Some(count);
		self
	}

	pub fn force(mut self, force: bool) -> Self {
		self.force = Some(force);
		self
	}

	pub fn timeout(mut self, timeout: f64) -> Self {
		self.timeout = Some(timeout);
		self
	}
}

/// Options for waiting on an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitForEventOptions {
	/// Maximum wait in milliseconds; 0 waits forever, `None` uses the owner's default
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timeout: Option<f64>,
}

impl WaitForEventOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn timeout(mut self, timeout: f64) -> Self {
		self.timeout = Some(timeout);
		self
	}
}
