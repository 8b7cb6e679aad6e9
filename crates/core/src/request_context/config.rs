//! Validated request context configuration.

use pilot_protocol::{DEFAULT_MAX_REDIRECTS, RequestContextOptions};
use pilot_runtime::{Error, Result};
use url::Url;

use super::proxy::{ProxyConfig, basic_authorization};
use crate::user_agent::default_user_agent;

#[derive(Debug, Clone, PartialEq)]
struct Credentials {
	authorization: String,
	origin: Option<String>,
}

/// Options of a context after validation, applied to every fetch.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ContextConfig {
	pub user_agent: String,
	pub extra_headers: Vec<(String, String)>,
	credentials: Option<Credentials>,
	pub proxy: Option<ProxyConfig>,
	pub ignore_https_errors: bool,
	base_url: Option<Url>,
	pub max_redirects: u32,
	pub fail_on_status_code: bool,
}

impl Default for ContextConfig {
	fn default() -> Self {
		Self {
			user_agent: default_user_agent().to_string(),
			extra_headers: Vec::new(),
			credentials: None,
			proxy: None,
			ignore_https_errors: false,
			base_url: None,
			max_redirects: DEFAULT_MAX_REDIRECTS,
			fail_on_status_code: false,
		}
	}
}

impl ContextConfig {
	pub fn from_options(options: &RequestContextOptions) -> Result<Self> {
		let mut extra_headers: Vec<(String, String)> = options
			.extra_http_headers
			.iter()
			.flatten()
			.map(|(k, v)| (k.clone(), v.clone()))
			.collect();
		extra_headers.sort();

		let credentials = options
			.http_credentials
			.as_ref()
			.map(|creds| -> Result<Credentials> {
				let origin = creds
					.origin
					.as_deref()
					.map(|o| {
						Url::parse(o)
							.map(|u| u.origin().ascii_serialization())
							.map_err(|e| Error::InvalidArgument(format!("Invalid credentials origin '{o}': {e}")))
					})
					.transpose()?;
				Ok(Credentials {
					authorization: basic_authorization(&creds.username, &creds.password),
					origin,
				})
			})
			.transpose()?;

		let base_url = options
			.base_url
			.as_deref()
			.map(|base| {
				Url::parse(base).map_err(|e| Error::InvalidArgument(format!("Invalid baseURL '{base}': {e}")))
			})
			.transpose()?;

		Ok(Self {
			user_agent: options
				.user_agent
				.clone()
				.unwrap_or_else(|| default_user_agent().to_string()),
			extra_headers,
			credentials,
			proxy: options.proxy.as_ref().map(ProxyConfig::from_settings).transpose()?,
			ignore_https_errors: options.ignore_https_errors.unwrap_or(false),
			base_url,
			max_redirects: options.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS),
			fail_on_status_code: options.fail_on_status_code.unwrap_or(false),
		})
	}

	/// Resolves `url` against the base URL and appends query `params`.
	pub fn resolve_url(&self, url: &str, params: &[(String, String)]) -> Result<Url> {
		let parsed = match &self.base_url {
			Some(base) => base.join(url),
			None => Url::parse(url),
		};
		let mut resolved = parsed.map_err(|e| Error::InvalidArgument(format!("Invalid URL '{url}': {e}")))?;
		if !params.is_empty() {
			let mut pairs = resolved.query_pairs_mut();
			for (name, value) in params {
				pairs.append_pair(name, value);
			}
		}
		Ok(resolved)
	}

	/// `authorization` value to attach preemptively for `target`, if any.
	pub fn authorization_for(&self, target: &Url) -> Option<&str> {
		let creds = self.credentials.as_ref()?;
		match &creds.origin {
			Some(origin) if !origin.eq_ignore_ascii_case(&target.origin().ascii_serialization()) => None,
			_ => Some(&creds.authorization),
		}
	}
}
