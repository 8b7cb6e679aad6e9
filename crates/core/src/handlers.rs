//! Listener bookkeeping shared by every event bus.
//!
//! Listener ids are process-unique so a [`Subscription`] can never remove a
//! listener that replaced the one it was created for.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;

/// Unique identifier for a registered listener.
pub type ListenerId = u64;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a new globally-unique listener ID.
pub fn next_listener_id() -> ListenerId {
	NEXT_LISTENER_ID.fetch_add(1, Ordering::SeqCst)
}

/// Synchronous listener invoked with a borrowed event.
pub type ListenerFn<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// One row of a bus's listener table.
pub struct ListenerEntry<E> {
	pub id: ListenerId,
	pub once: bool,
	pub listener: ListenerFn<E>,
}

impl<E> Clone for ListenerEntry<E> {
	fn clone(&self) -> Self {
		Self {
			id: self.id,
			once: self.once,
			listener: Arc::clone(&self.listener),
		}
	}
}

/// URL filter for request/response waiters.
///
/// Plain strings are glob patterns (`**/api/*`); invalid globs fall back to
/// exact comparison.
#[derive(Clone)]
pub enum UrlMatcher {
	Exact(String),
	Glob(glob::Pattern),
	Regex(Regex),
	Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl UrlMatcher {
	/// Compiles a glob pattern, falling back to literal matching on invalid patterns.
	pub fn glob(pattern: &str) -> Self {
		match glob::Pattern::new(pattern) {
			Ok(compiled) => Self::Glob(compiled),
			Err(_) => Self::Exact(pattern.to_string()),
		}
	}

	pub fn predicate<F>(f: F) -> Self
	where
		F: Fn(&str) -> bool + Send + Sync + 'static,
	{
		Self::Predicate(Arc::new(f))
	}

	/// Returns `true` if the URL matches.
	pub fn is_match(&self, url: &str) -> bool {
		match self {
			Self::Exact(expected) => expected == url,
			Self::Glob(pattern) => pattern.matches(url),
			Self::Regex(re) => re.is_match(url),
			Self::Predicate(f) => f(url),
		}
	}
}

impl From<&str> for UrlMatcher {
	fn from(pattern: &str) -> Self {
		Self::glob(pattern)
	}
}

impl From<String> for UrlMatcher {
	fn from(pattern: String) -> Self {
		Self::glob(&pattern)
	}
}

impl From<Regex> for UrlMatcher {
	fn from(re: Regex) -> Self {
		Self::Regex(re)
	}
}

impl fmt::Debug for UrlMatcher {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Exact(s) => f.debug_tuple("Exact").field(s).finish(),
			Self::Glob(p) => f.debug_tuple("Glob").field(&p.as_str()).finish(),
			Self::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
			Self::Predicate(_) => f.write_str("Predicate(..)"),
		}
	}
}

/// RAII handle that unregisters a listener on drop.
///
/// Holds only a weak reference to its bus, so dropping it after the owning
/// page or worker is gone is a no-op.
pub struct Subscription {
	id: ListenerId,
	dropper: Option<Arc<dyn Fn(ListenerId) + Send + Sync>>,
}

impl Subscription {
	/// Creates a subscription with a custom dropper function.
	pub fn new(id: ListenerId, dropper: Arc<dyn Fn(ListenerId) + Send + Sync>) -> Self {
		Self {
			id,
			dropper: Some(dropper),
		}
	}

	/// Returns this subscription's listener ID.
	pub fn id(&self) -> ListenerId {
		self.id
	}

	/// Explicitly unsubscribes. Equivalent to dropping.
	pub fn unsubscribe(mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("active", &self.dropper.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicBool;

	use super::*;

	#[test]
	fn test_listener_id_increments() {
		let id1 = next_listener_id();
		let id2 = next_listener_id();
		assert!(id2 > id1);
	}

	#[test]
	fn test_url_matcher_glob() {
		let matcher = UrlMatcher::from("**/*.png");
		assert!(matcher.is_match("https://example.com/image.png"));
		assert!(matcher.is_match("https://example.com/path/to/image.png"));
		assert!(!matcher.is_match("https://example.com/image.jpg"));
	}

	#[test]
	fn test_url_matcher_exact_and_regex() {
		let matcher = UrlMatcher::from("https://example.com/api");
		assert!(matcher.is_match("https://example.com/api"));
		assert!(!matcher.is_match("https://example.com/api/v2"));

		let matcher = UrlMatcher::from(Regex::new(r"/worker\.js$").unwrap());
		assert!(matcher.is_match("http://localhost/worker.js"));
		assert!(!matcher.is_match("http://localhost/worker.js?x"));

		let matcher = UrlMatcher::glob("[unclosed");
		assert!(matcher.is_match("[unclosed"));
	}

	#[test]
	fn test_subscription_unsubscribe_and_drop() {
		let called = Arc::new(AtomicBool::new(false));
		let flag = Arc::clone(&called);
		let sub = Subscription::new(7, Arc::new(move |id| {
			assert_eq!(id, 7);
			flag.store(true, Ordering::SeqCst);
		}));
		assert!(!called.load(Ordering::SeqCst));
		sub.unsubscribe();
		assert!(called.load(Ordering::SeqCst));

		let called = Arc::new(AtomicBool::new(false));
		let flag = Arc::clone(&called);
		{
			let _sub = Subscription::new(8, Arc::new(move |_| flag.store(true, Ordering::SeqCst)));
		}
		assert!(called.load(Ordering::SeqCst));
	}
}
