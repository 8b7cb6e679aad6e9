use pilot_runtime::{Error, Result};

use crate::post_data::RequestData;

/// Per-call options for [`RequestContext::fetch`](super::RequestContext::fetch)
/// and its shorthands.
///
/// Unset fields fall back to the context's configuration.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
	pub method: Option<String>,
	/// Headers overriding the context's extra headers (case-insensitive).
	pub headers: Vec<(String, String)>,
	pub data: Option<RequestData>,
	pub form: Option<Vec<(String, String)>>,
	/// Query parameters appended to the URL.
	pub params: Vec<(String, String)>,
	/// Milliseconds; `0` disables the timeout.
	pub timeout: Option<f64>,
	pub ignore_https_errors: Option<bool>,
	pub max_redirects: Option<u32>,
	pub fail_on_status_code: Option<bool>,
}

impl FetchOptions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the HTTP method, e.g. `"TRACE"`.
	pub fn method(mut self, method: impl Into<String>) -> Self {
		self.method = Some(method.into());
		self
	}

	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}

	pub fn data(mut self, data: impl Into<RequestData>) -> Self {
		self.data = Some(data.into());
		self
	}

	/// Adds a form field sent as `application/x-www-form-urlencoded`.
	pub fn form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.form
			.get_or_insert_with(Vec::new)
			.push((name.into(), value.into()));
		self
	}

	pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.params.push((name.into(), value.into()));
		self
	}

	pub fn timeout(mut self, timeout_ms: f64) -> Self {
		self.timeout = Some(timeout_ms);
		self
	}

	pub fn ignore_https_errors(mut self, ignore: bool) -> Self {
		self.ignore_https_errors = Some(ignore);
		self
	}

	pub fn max_redirects(mut self, max: u32) -> Self {
		self.max_redirects = Some(max);
		self
	}

	pub fn fail_on_status_code(mut self, fail: bool) -> Self {
		self.fail_on_status_code = Some(fail);
		self
	}

	pub(crate) fn validate(&self) -> Result<()> {
		if self.data.is_some() && self.form.is_some() {
			return Err(Error::InvalidArgument(
				"Only one of 'data' or 'form' can be specified".to_string(),
			));
		}
		Ok(())
	}

	/// Returns the last value for `name`, compared case-insensitively.
	pub(crate) fn header_value(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.rev()
			.find(|(n, _)| n.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}
}
