//! Proxy routing for fetch hops.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pilot_protocol::{ProxyRoute, ProxySettings};
use pilot_runtime::{Error, Result};
use url::Url;

/// A validated proxy configuration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProxyConfig {
	server: String,
	bypass: Vec<String>,
	authorization: Option<String>,
}

impl ProxyConfig {
	/// Normalizes the server (a bare `host:port` becomes `http://host:port`)
	/// and parses the bypass list.
	pub fn from_settings(settings: &ProxySettings) -> Result<Self> {
		let raw = settings.server.trim();
		let with_scheme = if raw.contains("://") {
			raw.to_string()
		} else {
			format!("http://{raw}")
		};
		let server = Url::parse(&with_scheme)
			.map_err(|e| Error::InvalidArgument(format!("Invalid proxy server '{raw}': {e}")))?;
		if server.host_str().is_none() {
			return Err(Error::InvalidArgument(format!("Invalid proxy server '{raw}': missing host")));
		}

		let bypass = settings
			.bypass
			.as_deref()
			.unwrap_or_default()
			.split(',')
			.map(|rule| rule.trim().to_ascii_lowercase())
			.filter(|rule| !rule.is_empty())
			.collect();

		let authorization = match (&settings.username, &settings.password) {
			(Some(user), password) => Some(basic_authorization(user, password.as_deref().unwrap_or_default())),
			(None, _) => None,
		};

		Ok(Self {
			server: server.as_str().trim_end_matches('/').to_string(),
			bypass,
			authorization,
		})
	}

	fn bypasses(&self, host: &str) -> bool {
		let host = host.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();
		self.bypass.iter().any(|rule| {
			if rule == "*" {
				return true;
			}
			match rule.strip_prefix('.') {
				Some(domain) => host == domain || host.ends_with(rule.as_str()),
				None => host == *rule,
			}
		})
	}

	/// Route for a request to `target`, or `None` if the host bypasses the proxy.
	pub fn route(&self, target: &Url) -> Option<ProxyRoute> {
		let host = target.host_str()?;
		if self.bypasses(host) {
			return None;
		}
		let port = target.port_or_known_default()?;
		Some(ProxyRoute {
			server: self.server.clone(),
			connect_host: format!("{host}:{port}"),
			authorization: self.authorization.clone(),
		})
	}
}

/// `Basic` credentials for an `authorization`-style header.
pub(crate) fn basic_authorization(username: &str, password: &str) -> String {
	format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}
