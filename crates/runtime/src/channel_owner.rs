//! Client-side mirrors of remote objects.
//!
//! Request contexts, pages, frames and workers each live on the remote and
//! are mirrored here as a [`ChannelOwner`]. The mirrors form a tree rooted at
//! the connection. Tearing down a node tears down its subtree, and each node
//! is torn down at most once no matter how many paths reach it (explicit
//! dispose, parent dispose, remote `__dispose__`).

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use downcast_rs::{DowncastSync, impl_downcast};
use parking_lot::Mutex;
use serde_json::Value;

use crate::channel::Channel;
use crate::connection::ConnectionLike;

#[doc(hidden)]
pub mod sealed {
	pub trait Sealed {}
}

/// Why a mirror was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeReason {
	/// Closed or disposed on either side.
	Closed,
	/// Reclaimed by the remote's garbage collector.
	GarbageCollected,
}

/// Where a new mirror hangs: under another object, or directly under the connection.
pub enum ParentOrConnection {
	Parent(Arc<dyn ChannelOwner>),
	Connection(Arc<dyn ConnectionLike>),
}

/// A remote object mirrored on the client.
///
/// Implemented through [`impl_channel_owner!`](crate::impl_channel_owner) only.
pub trait ChannelOwner: sealed::Sealed + DowncastSync {
	fn guid(&self) -> &str;

	/// Remote type name, e.g. `"Page"` or `"Worker"`.
	fn type_name(&self) -> &str;

	/// `None` for children of the connection, or once the parent is gone.
	fn parent(&self) -> Option<Arc<dyn ChannelOwner>>;

	fn connection(&self) -> Arc<dyn ConnectionLike>;

	/// Initial state sent with `__create__`.
	fn initializer(&self) -> &Value;

	fn channel(&self) -> &Channel;

	/// Tears down this object and its subtree. Idempotent.
	fn dispose(&self, reason: DisposeReason);

	/// Re-parents `child` under this object.
	fn adopt(&self, child: Arc<dyn ChannelOwner>);

	fn add_child(&self, guid: Arc<str>, child: Arc<dyn ChannelOwner>);

	fn remove_child(&self, guid: &str);

	/// Routes a remote event to this object.
	fn on_event(&self, method: &str, params: Value);
}

impl_downcast!(sync ChannelOwner);

#[derive(Default)]
struct Subtree {
	children: HashMap<Arc<str>, Arc<dyn ChannelOwner>>,
	disposed: bool,
}

/// State every mirror embeds as its `base` field.
pub struct ChannelOwnerImpl {
	guid: Arc<str>,
	type_name: Arc<str>,
	parent: Option<Weak<dyn ChannelOwner>>,
	channel: Channel,
	initializer: Value,
	subtree: Mutex<Subtree>,
}

impl ChannelOwnerImpl {
	pub fn new(
		parent: ParentOrConnection,
		type_name: impl Into<Arc<str>>,
		guid: Arc<str>,
		initializer: Value,
	) -> Self {
		let (connection, parent) = match parent {
			ParentOrConnection::Parent(owner) => (owner.connection(), Some(Arc::downgrade(&owner))),
			ParentOrConnection::Connection(connection) => (connection, None),
		};
		Self {
			channel: Channel::new(Arc::clone(&guid), connection),
			guid,
			type_name: type_name.into(),
			parent,
			initializer,
			subtree: Mutex::default(),
		}
	}

	pub fn guid(&self) -> &str {
		&self.guid
	}

	pub fn type_name(&self) -> &str {
		&self.type_name
	}

	pub fn parent(&self) -> Option<Arc<dyn ChannelOwner>> {
		self.parent.as_ref()?.upgrade()
	}

	pub fn connection(&self) -> Arc<dyn ConnectionLike> {
		Arc::clone(self.channel.connection())
	}

	pub fn initializer(&self) -> &Value {
		&self.initializer
	}

	pub fn channel(&self) -> &Channel {
		&self.channel
	}

	pub fn is_disposed(&self) -> bool {
		self.subtree.lock().disposed
	}

	/// Unlinks this object from its parent and the registry, then disposes
	/// the children. Later calls are no-ops.
	pub fn dispose(&self, reason: DisposeReason) {
		let children = {
			let mut subtree = self.subtree.lock();
			if subtree.disposed {
				return;
			}
			subtree.disposed = true;
			std::mem::take(&mut subtree.children)
		};

		if let Some(parent) = self.parent() {
			parent.remove_child(&self.guid);
		}
		self.channel.connection().unregister_object(&self.guid);
		for child in children.into_values() {
			child.dispose(reason);
		}
		tracing::debug!(guid = %self.guid, kind = %self.type_name, ?reason, "disposed");
	}

	pub fn adopt(&self, child: Arc<dyn ChannelOwner>) {
		if let Some(previous) = child.parent() {
			previous.remove_child(child.guid());
		}
		self.add_child(Arc::from(child.guid()), child);
	}

	pub fn add_child(&self, guid: Arc<str>, child: Arc<dyn ChannelOwner>) {
		self.subtree.lock().children.insert(guid, child);
	}

	pub fn remove_child(&self, guid: &str) {
		self.subtree.lock().children.remove(guid);
	}

	/// Fallback for events a mirror does not handle.
	pub fn on_event(&self, method: &str, params: Value) {
		tracing::debug!(guid = %self.guid, kind = %self.type_name, method, %params, "ignored event");
	}
}

/// Implements [`ChannelOwner`] for a struct with a `base: ChannelOwnerImpl`
/// field and inherent `handle_event(&self, &str, Value)` and
/// `handle_dispose(&self, DisposeReason)` methods.
#[macro_export]
macro_rules! impl_channel_owner {
	($ty:ty) => {
		impl $crate::channel_owner::sealed::Sealed for $ty {}

		impl $crate::channel_owner::ChannelOwner for $ty {
			fn guid(&self) -> &str {
				self.base.guid()
			}

			fn type_name(&self) -> &str {
				self.base.type_name()
			}

			fn parent(&self) -> Option<std::sync::Arc<dyn $crate::channel_owner::ChannelOwner>> {
				self.base.parent()
			}

			fn connection(&self) -> std::sync::Arc<dyn $crate::connection::ConnectionLike> {
				self.base.connection()
			}

			fn initializer(&self) -> &serde_json::Value {
				self.base.initializer()
			}

			fn channel(&self) -> &$crate::channel::Channel {
				self.base.channel()
			}

			fn dispose(&self, reason: $crate::channel_owner::DisposeReason) {
				self.handle_dispose(reason)
			}

			fn adopt(&self, child: std::sync::Arc<dyn $crate::channel_owner::ChannelOwner>) {
				self.base.adopt(child)
			}

			fn add_child(
				&self,
				guid: std::sync::Arc<str>,
				child: std::sync::Arc<dyn $crate::channel_owner::ChannelOwner>,
			) {
				self.base.add_child(guid, child)
			}

			fn remove_child(&self, guid: &str) {
				self.base.remove_child(guid)
			}

			fn on_event(&self, method: &str, params: serde_json::Value) {
				self.handle_event(method, params)
			}
		}
	};
}
