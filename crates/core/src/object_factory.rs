//! Builds typed objects for `__create__` messages.

use std::sync::Arc;

use pilot_runtime::{
	AsyncChannelOwnerResult, ChannelOwner, ConnectionLike, Error, ObjectFactory, ParentOrConnection, Result,
};
use serde_json::Value;

use crate::element_handle::ElementHandle;
use crate::frame::Frame;
use crate::network::{Request, Response};
use crate::page::Page;
use crate::pilot::Pilot;
use crate::request_context::RequestContext;
use crate::worker::Worker;

/// Object factory for every protocol type this crate knows.
pub struct DefaultObjectFactory;

impl ObjectFactory for DefaultObjectFactory {
	fn create_object(
		&self,
		parent: ParentOrConnection,
		type_name: String,
		guid: Arc<str>,
		initializer: Value,
	) -> AsyncChannelOwnerResult<'_> {
		Box::pin(async move {
			let object: Arc<dyn ChannelOwner> = match type_name.as_str() {
				"Pilot" => Pilot::new(parent, guid, initializer),
				"APIRequestContext" => RequestContext::new(parent, guid, initializer),
				"Page" => Page::new(parent, guid, initializer)?,
				"Frame" => Frame::new(parent, guid, initializer),
				"Worker" => Worker::new(parent, guid, initializer),
				"ElementHandle" => ElementHandle::new(parent, guid, initializer),
				"Request" => Request::new(parent, guid, initializer)?,
				"Response" => Response::new(parent, guid, initializer)?,
				_ => return Err(Error::UnknownObjectType(type_name)),
			};
			Ok(object)
		})
	}
}

/// Connection an object under `parent` will belong to.
pub(crate) fn connection_of(parent: &ParentOrConnection) -> Arc<dyn ConnectionLike> {
	match parent {
		ParentOrConnection::Parent(p) => p.connection(),
		ParentOrConnection::Connection(c) => Arc::clone(c),
	}
}

/// Reads `value[field].guid`.
pub(crate) fn guid_ref<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
	value.get(field)?.get("guid")?.as_str()
}

pub(crate) fn downcast_owner<T: ChannelOwner>(object: Arc<dyn ChannelOwner>) -> Result<Arc<T>> {
	let guid = object.guid().to_string();
	object.downcast_arc::<T>().map_err(|other| Error::ObjectNotFound {
		guid: format!("{guid} (found {})", other.type_name()),
		expected: Some(std::any::type_name::<T>()),
	})
}

/// Registered object `guid` if it exists and has type `T`.
pub(crate) fn lookup<T: ChannelOwner>(connection: &Arc<dyn ConnectionLike>, guid: &str) -> Option<Arc<T>> {
	connection
		.try_get_object(guid)
		.and_then(|object| downcast_owner::<T>(object).ok())
}

/// Like [`lookup`], failing with [`Error::ObjectNotFound`].
pub(crate) fn require<T: ChannelOwner>(connection: &Arc<dyn ConnectionLike>, guid: &str) -> Result<Arc<T>> {
	let object = connection.try_get_object(guid).ok_or_else(|| Error::ObjectNotFound {
		guid: guid.to_string(),
		expected: Some(std::any::type_name::<T>()),
	})?;
	downcast_owner(object)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_guid_ref() {
		let value = serde_json::json!({"worker": {"guid": "worker@1"}, "frame": null});
		assert_eq!(guid_ref(&value, "worker"), Some("worker@1"));
		assert_eq!(guid_ref(&value, "frame"), None);
		assert_eq!(guid_ref(&value, "missing"), None);
	}
}
