//! Request body serialization.

use serde_json::Value;

/// Body of a fetch request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestData {
	/// A structured value. Serialized as JSON unless it is a string and the
	/// request is not a JSON request.
	Json(Value),
	/// Text sent as UTF-8.
	Text(String),
	/// Raw bytes, always sent verbatim.
	Bytes(Vec<u8>),
}

impl From<Value> for RequestData {
	fn from(value: Value) -> Self {
		Self::Json(value)
	}
}

impl From<String> for RequestData {
	fn from(text: String) -> Self {
		Self::Text(text)
	}
}

impl From<&str> for RequestData {
	fn from(text: &str) -> Self {
		Self::Text(text.to_string())
	}
}

impl From<Vec<u8>> for RequestData {
	fn from(bytes: Vec<u8>) -> Self {
		Self::Bytes(bytes)
	}
}

impl From<&[u8]> for RequestData {
	fn from(bytes: &[u8]) -> Self {
		Self::Bytes(bytes.to_vec())
	}
}

/// Serialized body plus the content type to use when the caller set none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EncodedBody {
	pub bytes: Vec<u8>,
	pub default_content_type: &'static str,
}

pub(crate) fn is_json_content_type(content_type: Option<&str>) -> bool {
	content_type
		.and_then(|ct| ct.split(';').next())
		.map(|mime| {
			let mime = mime.trim().to_ascii_lowercase();
			mime == "application/json" || mime.ends_with("+json")
		})
		.unwrap_or(false)
}

impl RequestData {
	/// Encodes the body for a request whose `content-type` header (if any)
	/// is `content_type`.
	///
	/// A string already holding JSON text is passed through unchanged on a
	/// JSON request, so serialized payloads are never encoded twice.
	pub(crate) fn encode(&self, content_type: Option<&str>) -> serde_json::Result<EncodedBody> {
		let json_request = is_json_content_type(content_type);
		let (bytes, default_content_type) = match self {
			Self::Bytes(bytes) => (bytes.clone(), "application/octet-stream"),
			Self::Text(text) | Self::Json(Value::String(text)) if json_request => {
				if serde_json::from_str::<Value>(text).is_ok() {
					(text.as_bytes().to_vec(), "application/json")
				} else {
					(serde_json::to_vec(text)?, "application/json")
				}
			}
			Self::Text(text) | Self::Json(Value::String(text)) => {
				(text.as_bytes().to_vec(), "text/plain")
			}
			Self::Json(value) => (serde_json::to_vec(value)?, "application/json"),
		};
		Ok(EncodedBody {
			bytes,
			default_content_type,
		})
	}
}

/// Encodes form fields as `application/x-www-form-urlencoded`.
pub(crate) fn encode_form(fields: &[(String, String)]) -> EncodedBody {
	let body = fields
		.iter()
		.map(|(name, value)| format!("{}={}", urlencoding::encode(name), urlencoding::encode(value)))
		.collect::<Vec<_>>()
		.join("&");
	EncodedBody {
		bytes: body.into_bytes(),
		default_content_type: "application/x-www-form-urlencoded",
	}
}
