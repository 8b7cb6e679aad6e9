//! GUID-keyed registry of live remote objects.
//!
//! Lookups happen from the dispatch loop and from owner callbacks at once,
//! hence [`DashMap`]. A waiter arms its [`Notify`] before checking the map,
//! so an insert landing between the check and the wait still wakes it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::channel_owner::ChannelOwner;
use crate::error::{Error, Result};

#[derive(Default)]
pub struct ObjectStore {
	live: DashMap<Arc<str>, Arc<dyn ChannelOwner>>,
	arrivals: DashMap<Arc<str>, Arc<Notify>>,
}

impl ObjectStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, guid: Arc<str>, object: Arc<dyn ChannelOwner>) {
		self.live.insert(Arc::clone(&guid), object);
		if let Some((_, arrived)) = self.arrivals.remove(&guid) {
			arrived.notify_waiters();
		}
	}

	pub fn remove(&self, guid: &str) {
		self.live.remove(guid);
	}

	pub fn try_get(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>> {
		self.live.get(guid).map(|entry| Arc::clone(entry.value()))
	}

	pub fn len(&self) -> usize {
		self.live.len()
	}

	pub fn is_empty(&self) -> bool {
		self.live.is_empty()
	}

	/// Resolves once `guid` is registered, or fails with [`Error::Timeout`].
	pub async fn wait_for(&self, guid: &str, timeout: Duration) -> Result<Arc<dyn ChannelOwner>> {
		let key: Arc<str> = Arc::from(guid);
		let deadline = tokio::time::Instant::now() + timeout;

		loop {
			let arrived = Arc::clone(self.arrivals.entry(Arc::clone(&key)).or_default().value());
			let notified = arrived.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();

			if let Some(object) = self.try_get(&key) {
				return Ok(object);
			}
			if tokio::time::timeout_at(deadline, notified).await.is_err() {
				let kind = guid.split_once('@').map_or("object", |(kind, _)| kind);
				return Err(Error::Timeout(format!(
					"Timeout {}ms exceeded waiting for {kind} object: {guid}",
					timeout.as_millis()
				)));
			}
		}
	}
}
