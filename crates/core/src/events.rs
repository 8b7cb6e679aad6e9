//! Per-owner event bus.
//!
//! Every page and worker owns one [`EventBus`]. It combines three delivery
//! mechanisms:
//!
//! - **Listeners** registered with [`on`](EventBus::on),
//!   [`once`](EventBus::once) or [`prepend_listener`](EventBus::prepend_listener),
//!   called synchronously from the dispatch loop
//! - **Waiters** created by [`wait_for`](EventBus::wait_for), resolved with the
//!   first matching event emitted after registration
//! - **Streams** from [`stream`](EventBus::stream), backed by a broadcast channel
//!
//! Emission works on a snapshot of the listener table: a listener removed
//! while an event is being dispatched still sees that event, and a listener
//! added during dispatch does not.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use pilot_runtime::{Error, Result};
use tokio::sync::{broadcast, oneshot};
use tokio::time::{Instant, Sleep};

use crate::handlers::{ListenerEntry, ListenerFn, ListenerId, Subscription, next_listener_id};

const STREAM_CAPACITY: usize = 256;

/// An event that can travel on an [`EventBus`].
pub trait BusEvent: Clone + Send + Sync + 'static {
	/// Discriminant used to key listeners and waiters.
	type Kind: Copy + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static;

	fn kind(&self) -> Self::Kind;
}

type InterestHook = Arc<dyn Fn(bool) + Send + Sync>;

struct Waiter<E> {
	id: u64,
	offer: Box<dyn FnMut(&E) -> bool + Send>,
}

struct BusState<E: BusEvent> {
	listeners: HashMap<E::Kind, IndexMap<ListenerId, ListenerEntry<E>>>,
	waiters: HashMap<E::Kind, Vec<Waiter<E>>>,
	interest: HashMap<E::Kind, InterestHook>,
	next_waiter: u64,
	closed: bool,
}

impl<E: BusEvent> BusState<E> {
	fn interest_count(&self, kind: E::Kind) -> usize {
		self.listeners.get(&kind).map_or(0, IndexMap::len)
			+ self.waiters.get(&kind).map_or(0, Vec::len)
	}
}

struct BusInner<E: BusEvent> {
	state: Mutex<BusState<E>>,
	tx: Mutex<Option<broadcast::Sender<E>>>,
}

impl<E: BusEvent> BusInner<E> {
	/// Applies `f` to the table and fires the interest hook for `kind` if the
	/// number of listeners plus waiters crossed zero.
	///
	/// The hook runs under the lock, so concurrent transitions reach it in the
	/// order they happened. It must not call back into the bus.
	fn update<R>(&self, kind: E::Kind, f: impl FnOnce(&mut BusState<E>) -> R) -> R {
		let mut state = self.state.lock();
		let before = state.interest_count(kind) > 0;
		let result = f(&mut state);
		let after = state.interest_count(kind) > 0;
		if before != after && !state.closed {
			if let Some(hook) = state.interest.get(&kind) {
				hook(after);
			}
		}
		result
	}

	fn remove_listener(&self, kind: E::Kind, id: ListenerId) -> bool {
		self.update(kind, |state| {
			let Some(table) = state.listeners.get_mut(&kind) else {
				return false;
			};
			let removed = table.shift_remove(&id).is_some();
			if table.is_empty() {
				state.listeners.remove(&kind);
			}
			removed
		})
	}

	fn remove_waiter(&self, kind: E::Kind, id: u64) {
		self.update(kind, |state| {
			if let Some(waiters) = state.waiters.get_mut(&kind) {
				waiters.retain(|w| w.id != id);
				if waiters.is_empty() {
					state.waiters.remove(&kind);
				}
			}
		});
	}
}

/// Listener table, waiter list and broadcast stream for one owner.
pub struct EventBus<E: BusEvent> {
	inner: Arc<BusInner<E>>,
}

impl<E: BusEvent> Clone for EventBus<E> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<E: BusEvent> Default for EventBus<E> {
	fn default() -> Self {
		Self::new()
	}
}

impl<E: BusEvent> EventBus<E> {
	pub fn new() -> Self {
		let (tx, _) = broadcast::channel(STREAM_CAPACITY);
		Self {
			inner: Arc::new(BusInner {
				state: Mutex::new(BusState {
					listeners: HashMap::new(),
					waiters: HashMap::new(),
					interest: HashMap::new(),
					next_waiter: 0,
					closed: false,
				}),
				tx: Mutex::new(Some(tx)),
			}),
		}
	}

	fn insert<F>(&self, kind: E::Kind, listener: F, once: bool, prepend: bool) -> ListenerId
	where
		F: Fn(&E) + Send + Sync + 'static,
	{
		let id = next_listener_id();
		let entry = ListenerEntry {
			id,
			once,
			listener: Arc::new(listener) as ListenerFn<E>,
		};
		self.inner.update(kind, |state| {
			if state.closed {
				return;
			}
			let table = state.listeners.entry(kind).or_default();
			if prepend {
				table.shift_insert(0, id, entry);
			} else {
				table.insert(id, entry);
			}
		});
		id
	}

	/// Adds a persistent listener after all existing listeners of `kind`.
	pub fn on<F>(&self, kind: E::Kind, listener: F) -> ListenerId
	where
		F: Fn(&E) + Send + Sync + 'static,
	{
		self.insert(kind, listener, false, false)
	}

	/// Adds a listener that is removed before it first runs.
	pub fn once<F>(&self, kind: E::Kind, listener: F) -> ListenerId
	where
		F: Fn(&E) + Send + Sync + 'static,
	{
		self.insert(kind, listener, true, false)
	}

	/// Adds a persistent listener ahead of all existing listeners of `kind`.
	pub fn prepend_listener<F>(&self, kind: E::Kind, listener: F) -> ListenerId
	where
		F: Fn(&E) + Send + Sync + 'static,
	{
		self.insert(kind, listener, false, true)
	}

	/// Removes a listener. Returns `false` if it was not registered.
	pub fn off(&self, kind: E::Kind, id: ListenerId) -> bool {
		self.inner.remove_listener(kind, id)
	}

	/// Adds a persistent listener that is removed when the returned
	/// [`Subscription`] is dropped.
	pub fn subscribe<F>(&self, kind: E::Kind, listener: F) -> Subscription
	where
		F: Fn(&E) + Send + Sync + 'static,
	{
		let id = self.on(kind, listener);
		let weak: Weak<BusInner<E>> = Arc::downgrade(&self.inner);
		Subscription::new(
			id,
			Arc::new(move |id| {
				if let Some(inner) = weak.upgrade() {
					inner.remove_listener(kind, id);
				}
			}),
		)
	}

	/// Registers a waiter for the first event of `kind` accepted by `predicate`.
	///
	/// Registration happens now, not when the returned future is first
	/// polled. `None` waits without bound.
	pub fn wait_for<P>(&self, kind: E::Kind, predicate: P, timeout: Option<Duration>) -> EventWaiter<E>
	where
		P: Fn(&E) -> bool + Send + 'static,
	{
		self.wait_for_map(kind, move |event| predicate(event).then(|| event.clone()), timeout)
	}

	/// Like [`wait_for`](Self::wait_for), but resolves with the first
	/// `Some` returned by `select`.
	///
	/// `select` runs under the bus lock and must not call back into the bus.
	pub fn wait_for_map<T, F>(&self, kind: E::Kind, select: F, timeout: Option<Duration>) -> EventWaiter<T>
	where
		T: Send + 'static,
		F: Fn(&E) -> Option<T> + Send + 'static,
	{
		let (tx, rx) = oneshot::channel();
		let mut tx = Some(tx);
		let offer = Box::new(move |event: &E| match select(event) {
			Some(value) => {
				if let Some(tx) = tx.take() {
					let _ = tx.send(value);
				}
				true
			}
			None => false,
		});

		let id = self.inner.update(kind, |state| {
			if state.closed {
				return None;
			}
			state.next_waiter += 1;
			let id = state.next_waiter;
			state.waiters.entry(kind).or_default().push(Waiter { id, offer });
			Some(id)
		});

		let release = id.map(|id| {
			let weak = Arc::downgrade(&self.inner);
			Box::new(move || {
				if let Some(inner) = weak.upgrade() {
					inner.remove_waiter(kind, id);
				}
			}) as Box<dyn FnOnce() + Send>
		});

		EventWaiter {
			rx,
			deadline: timeout.map(|t| (Instant::now() + t, t)),
			sleep: None,
			event_name: kind.to_string(),
			release,
		}
	}

	/// Delivers `event` to waiters, then listeners, then streams.
	pub fn emit(&self, event: E) {
		let kind = event.kind();
		let snapshot = self.inner.update(kind, |state| {
			if state.closed {
				return None;
			}
			if let Some(waiters) = state.waiters.get_mut(&kind) {
				waiters.retain_mut(|w| !(w.offer)(&event));
				if waiters.is_empty() {
					state.waiters.remove(&kind);
				}
			}

			let table = state.listeners.get_mut(&kind)?;
			let snapshot: Vec<ListenerEntry<E>> = table.values().cloned().collect();
			table.retain(|_, entry| !entry.once);
			if table.is_empty() {
				state.listeners.remove(&kind);
			}
			Some(snapshot)
		});

		for entry in snapshot.into_iter().flatten() {
			(entry.listener)(&event);
		}

		if let Some(tx) = self.inner.tx.lock().as_ref() {
			let _ = tx.send(event);
		}
	}

	/// Returns a stream of every event emitted from now on.
	pub fn stream(&self) -> EventStream<E> {
		let rx = match self.inner.tx.lock().as_ref() {
			Some(tx) => tx.subscribe(),
			None => broadcast::channel(1).1,
		};
		EventStream::new(rx)
	}

	/// Installs a callback fired with `true` when `kind` gains its first
	/// listener or waiter, and with `false` when it loses the last one.
	///
	/// The hook runs under the bus lock and must not call back into the bus.
	pub fn set_interest_hook<F>(&self, kind: E::Kind, hook: F)
	where
		F: Fn(bool) + Send + Sync + 'static,
	{
		self.inner.state.lock().interest.insert(kind, Arc::new(hook));
	}

	pub fn listener_count(&self, kind: E::Kind) -> usize {
		self.inner.state.lock().listeners.get(&kind).map_or(0, IndexMap::len)
	}

	pub fn waiter_count(&self, kind: E::Kind) -> usize {
		self.inner.state.lock().waiters.get(&kind).map_or(0, Vec::len)
	}

	/// Returns `true` if any listener or waiter exists for `kind`.
	pub fn has_interest(&self, kind: E::Kind) -> bool {
		self.inner.state.lock().interest_count(kind) > 0
	}

	pub fn is_closed(&self) -> bool {
		self.inner.state.lock().closed
	}

	/// Stops the bus. Pending waiters fail with [`Error::ChannelClosed`],
	/// listeners are released and streams end.
	pub fn close(&self) {
		let (listeners, waiters) = {
			let mut state = self.inner.state.lock();
			if state.closed {
				return;
			}
			state.closed = true;
			state.interest.clear();
			(
				std::mem::take(&mut state.listeners),
				std::mem::take(&mut state.waiters),
			)
		};
		drop(listeners);
		drop(waiters);
		self.inner.tx.lock().take();
	}
}

/// Future returned by [`EventBus::wait_for`].
///
/// Dropping it unregisters the waiter.
#[must_use = "waiters do nothing unless awaited"]
pub struct EventWaiter<T> {
	rx: oneshot::Receiver<T>,
	deadline: Option<(Instant, Duration)>,
	sleep: Option<Pin<Box<Sleep>>>,
	event_name: String,
	release: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> EventWaiter<T> {
	fn timeout_error(&self, bound: Duration) -> Error {
		Error::Timeout(format!(
			"Timeout {}ms exceeded while waiting for event \"{}\"",
			bound.as_millis(),
			self.event_name
		))
	}
}

impl<T> Future for EventWaiter<T> {
	type Output = Result<T>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();
		match Pin::new(&mut this.rx).poll(cx) {
			Poll::Ready(Ok(value)) => return Poll::Ready(Ok(value)),
			Poll::Ready(Err(_)) => return Poll::Ready(Err(Error::ChannelClosed)),
			Poll::Pending => {}
		}

		if let Some((deadline, bound)) = this.deadline {
			let sleep = this
				.sleep
				.get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)));
			if sleep.as_mut().poll(cx).is_ready() {
				return Poll::Ready(Err(this.timeout_error(bound)));
			}
		}
		Poll::Pending
	}
}

impl<T> Drop for EventWaiter<T> {
	fn drop(&mut self) {
		if let Some(release) = self.release.take() {
			release();
		}
	}
}

impl<T> fmt::Debug for EventWaiter<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventWaiter")
			.field("event", &self.event_name)
			.field("timeout", &self.deadline.map(|(_, bound)| bound))
			.finish()
	}
}

/// Broadcast receiver that logs and skips lag instead of failing.
pub struct EventStream<E: Clone + Send + 'static> {
	rx: broadcast::Receiver<E>,
}

impl<E: Clone + Send + 'static> EventStream<E> {
	pub(crate) fn new(rx: broadcast::Receiver<E>) -> Self {
		Self { rx }
	}

	/// Receives the next event, or `None` once the owner closed.
	pub async fn recv(&mut self) -> Option<E> {
		loop {
			match self.rx.recv().await {
				Ok(event) => return Some(event),
				Err(broadcast::error::RecvError::Lagged(n)) => {
					tracing::warn!(dropped = n, "Event stream lagged, dropped events");
				}
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	}

	/// Returns an already-queued event without waiting.
	pub fn try_recv(&mut self) -> Option<E> {
		loop {
			match self.rx.try_recv() {
				Ok(event) => return Some(event),
				Err(broadcast::error::TryRecvError::Lagged(n)) => {
					tracing::warn!(dropped = n, "Event stream lagged, dropped events");
				}
				Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => {
					return None;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	enum Kind {
		Ping,
		Pong,
	}

	impl fmt::Display for Kind {
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			f.write_str(match self {
				Kind::Ping => "ping",
				Kind::Pong => "pong",
			})
		}
	}

	#[derive(Debug, Clone, PartialEq)]
	struct Ev(Kind, u32);

	impl BusEvent for Ev {
		type Kind = Kind;

		fn kind(&self) -> Kind {
			self.0
		}
	}

	fn recorder(bus: &EventBus<Ev>, log: &Arc<Mutex<Vec<String>>>, tag: &'static str, once: bool) -> ListenerId {
		let log = Arc::clone(log);
		let f = move |e: &Ev| log.lock().push(format!("{tag}{}", e.1));
		if once { bus.once(Kind::Ping, f) } else { bus.on(Kind::Ping, f) }
	}

	#[test]
	fn test_registration_order_and_prepend() {
		let bus = EventBus::new();
		let log = Arc::new(Mutex::new(Vec::new()));
		recorder(&bus, &log, "a", false);
		recorder(&bus, &log, "b", false);
		let l = Arc::clone(&log);
		bus.prepend_listener(Kind::Ping, move |e: &Ev| l.lock().push(format!("first{}", e.1)));

		bus.emit(Ev(Kind::Ping, 1));
		assert_eq!(*log.lock(), vec!["first1", "a1", "b1"]);
	}

	#[test]
	fn test_once_runs_once_and_off_removes() {
		let bus = EventBus::new();
		let log = Arc::new(Mutex::new(Vec::new()));
		recorder(&bus, &log, "once", true);
		let id = recorder(&bus, &log, "on", false);

		bus.emit(Ev(Kind::Ping, 1));
		assert!(bus.off(Kind::Ping, id));
		assert!(!bus.off(Kind::Ping, id));
		bus.emit(Ev(Kind::Ping, 2));
		assert_eq!(*log.lock(), vec!["once1", "on1"]);
		assert_eq!(bus.listener_count(Kind::Ping), 0);
	}

	#[test]
	fn test_emission_uses_snapshot() {
		let bus = EventBus::new();
		let hits = Arc::new(AtomicUsize::new(0));

		let late_hits = Arc::clone(&hits);
		let inner_bus = bus.clone();
		let victim = Arc::new(Mutex::new(None::<ListenerId>));
		let victim_ref = Arc::clone(&victim);
		bus.on(Kind::Ping, move |_| {
			// Remove the next listener and add a new one mid-dispatch.
			if let Some(id) = victim_ref.lock().take() {
				inner_bus.off(Kind::Ping, id);
			}
			let h = Arc::clone(&late_hits);
			inner_bus.on(Kind::Ping, move |_| {
				h.fetch_add(100, Ordering::SeqCst);
			});
		});
		let h = Arc::clone(&hits);
		let id = bus.on(Kind::Ping, move |_| {
			h.fetch_add(1, Ordering::SeqCst);
		});
		*victim.lock() = Some(id);

		bus.emit(Ev(Kind::Ping, 1));
		// The removed listener still ran; the added one did not.
		assert_eq!(hits.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn test_subscription_drop_unregisters() {
		let bus = EventBus::new();
		let hits = Arc::new(AtomicUsize::new(0));
		let h = Arc::clone(&hits);
		let sub = bus.subscribe(Kind::Pong, move |_| {
			h.fetch_add(1, Ordering::SeqCst);
		});
		bus.emit(Ev(Kind::Pong, 1));
		drop(sub);
		bus.emit(Ev(Kind::Pong, 2));
		assert_eq!(hits.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_waiters_fan_out_and_do_not_replay() {
		let bus = EventBus::new();
		bus.emit(Ev(Kind::Ping, 0));

		let w1 = bus.wait_for(Kind::Ping, |_| true, None);
		let w2 = bus.wait_for(Kind::Ping, |e| e.1 == 2, None);
		bus.emit(Ev(Kind::Ping, 1));
		bus.emit(Ev(Kind::Ping, 2));

		assert_eq!(w1.await.unwrap(), Ev(Kind::Ping, 1));
		assert_eq!(w2.await.unwrap(), Ev(Kind::Ping, 2));
		assert_eq!(bus.waiter_count(Kind::Ping), 0);
	}

	#[tokio::test]
	async fn test_waiter_timeout_states_bound() {
		let bus: EventBus<Ev> = EventBus::new();
		let err = bus
			.wait_for(Kind::Pong, |_| true, Some(Duration::from_millis(15)))
			.await
			.unwrap_err();
		assert!(err.is_timeout());
		assert_eq!(err.to_string(), "Timeout 15ms exceeded while waiting for event \"pong\"");
		assert_eq!(bus.waiter_count(Kind::Pong), 0);
	}

	#[tokio::test]
	async fn test_dropped_waiter_unregisters() {
		let bus: EventBus<Ev> = EventBus::new();
		let waiter = bus.wait_for(Kind::Ping, |_| true, None);
		assert_eq!(bus.waiter_count(Kind::Ping), 1);
		drop(waiter);
		assert_eq!(bus.waiter_count(Kind::Ping), 0);
	}

	#[tokio::test]
	async fn test_close_fails_waiters_and_ends_streams() {
		let bus: EventBus<Ev> = EventBus::new();
		let waiter = bus.wait_for(Kind::Ping, |_| true, None);
		let mut stream = bus.stream();
		bus.close();

		assert!(matches!(waiter.await, Err(Error::ChannelClosed)));
		assert!(stream.recv().await.is_none());
		assert!(matches!(
			bus.wait_for(Kind::Ping, |_| true, None).await,
			Err(Error::ChannelClosed)
		));
	}

	#[tokio::test]
	async fn test_stream_receives_events() {
		let bus = EventBus::new();
		let mut stream = bus.stream();
		bus.emit(Ev(Kind::Pong, 42));
		assert_eq!(stream.recv().await, Some(Ev(Kind::Pong, 42)));
		assert!(stream.try_recv().is_none());
	}

	#[test]
	fn test_interest_hook_fires_on_transitions() {
		let bus: EventBus<Ev> = EventBus::new();
		let log = Arc::new(Mutex::new(Vec::new()));
		let l = Arc::clone(&log);
		bus.set_interest_hook(Kind::Ping, move |on| l.lock().push(on));

		let a = bus.on(Kind::Ping, |_| {});
		let b = bus.on(Kind::Ping, |_| {});
		let waiter = bus.wait_for(Kind::Ping, |_| true, None);
		bus.off(Kind::Ping, a);
		bus.off(Kind::Ping, b);
		assert_eq!(*log.lock(), vec![true]);
		drop(waiter);
		assert_eq!(*log.lock(), vec![true, false]);

		bus.once(Kind::Ping, |_| {});
		bus.emit(Ev(Kind::Ping, 1));
		assert_eq!(*log.lock(), vec![true, false, true, false]);
	}

	#[test]
	fn test_interest_hook_alternates_across_threads() {
		let bus: EventBus<Ev> = EventBus::new();
		let log = Arc::new(Mutex::new(Vec::new()));
		let l = Arc::clone(&log);
		bus.set_interest_hook(Kind::Ping, move |on| l.lock().push(on));

		let threads: Vec<_> = (0..4)
			.map(|_| {
				let bus = bus.clone();
				std::thread::spawn(move || {
					for _ in 0..500 {
						drop(bus.wait_for(Kind::Ping, |_| true, None));
					}
				})
			})
			.collect();
		for thread in threads {
			thread.join().expect("toggler");
		}

		let log = log.lock();
		assert!(!log.is_empty());
		assert_eq!(log.first(), Some(&true));
		assert_eq!(log.last(), Some(&false));
		assert!(log.windows(2).all(|pair| pair[0] != pair[1]), "transitions out of order: {log:?}");
	}
}
