//! Client-side redirect rules.

use pilot_runtime::{Error, Result};
use url::Url;

pub(crate) fn is_redirect(status: u16) -> bool {
	matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Whether the next hop must become a body-less `GET`.
///
/// 303 rewrites everything but `HEAD`; 301 and 302 rewrite `POST` only.
pub(crate) fn switches_to_get(status: u16, method: &str) -> bool {
	match status {
		303 => !method.eq_ignore_ascii_case("HEAD"),
		301 | 302 => method.eq_ignore_ascii_case("POST"),
		_ => false,
	}
}

/// Resolves a `Location` header against the URL that produced it.
pub(crate) fn resolve_location(current: &Url, location: &str) -> Result<Url> {
	current
		.join(location)
		.map_err(|e| Error::RequestFailed(format!("Invalid redirect location '{location}': {e}")))
}
