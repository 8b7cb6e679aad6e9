//! Bookkeeping for in-flight fetches of one request context.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Finished operations kept for inspection.
const HISTORY_LEN: usize = 32;

/// Lifecycle of one fetch. `Pending` moves to exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
	Pending,
	Resolved,
	Rejected,
	Cancelled,
}

impl OperationState {
	pub fn is_terminal(self) -> bool {
		self != OperationState::Pending
	}
}

/// Snapshot of one operation.
#[derive(Debug, Clone)]
pub struct Operation {
	pub id: u64,
	pub method: String,
	pub url: String,
	pub started_at: Instant,
	pub timeout: Option<Duration>,
	pub state: OperationState,
}

#[derive(Default)]
struct Table {
	next_id: u64,
	pending: BTreeMap<u64, Operation>,
	finished: VecDeque<Operation>,
}

impl Table {
	fn settle(&mut self, id: u64, state: OperationState) -> bool {
		let Some(mut op) = self.pending.remove(&id) else {
			return false;
		};
		op.state = state;
		if self.finished.len() == HISTORY_LEN {
			self.finished.pop_front();
		}
		self.finished.push_back(op);
		true
	}
}

/// Shared table of a context's operations.
#[derive(Clone, Default)]
pub(crate) struct OperationTracker {
	table: Arc<Mutex<Table>>,
}

impl OperationTracker {
	/// Registers a pending operation. The guard cancels it if dropped unsettled.
	pub fn begin(&self, method: &str, url: &str, timeout: Option<Duration>) -> OperationGuard {
		let mut table = self.table.lock();
		table.next_id += 1;
		let id = table.next_id;
		table.pending.insert(
			id,
			Operation {
				id,
				method: method.to_string(),
				url: url.to_string(),
				started_at: Instant::now(),
				timeout,
				state: OperationState::Pending,
			},
		);
		OperationGuard {
			id,
			tracker: self.clone(),
		}
	}

	/// Moves every pending operation to `Cancelled`. Returns how many moved.
	pub fn cancel_all(&self) -> usize {
		let mut table = self.table.lock();
		let ids: Vec<u64> = table.pending.keys().copied().collect();
		ids.into_iter()
			.filter(|id| table.settle(*id, OperationState::Cancelled))
			.count()
	}

	pub fn pending(&self) -> Vec<Operation> {
		self.table.lock().pending.values().cloned().collect()
	}

	/// Most recently finished operations, oldest first.
	pub fn finished(&self) -> Vec<Operation> {
		self.table.lock().finished.iter().cloned().collect()
	}

	fn settle(&self, id: u64, state: OperationState) -> bool {
		self.table.lock().settle(id, state)
	}
}

/// Settles its operation exactly once; `Cancelled` if dropped unsettled.
pub(crate) struct OperationGuard {
	id: u64,
	tracker: OperationTracker,
}

impl OperationGuard {
	pub fn id(&self) -> u64 {
		self.id
	}

	/// Records the outcome. A no-op if the operation already settled.
	pub fn finish<T>(self, result: &pilot_runtime::Result<T>) {
		let state = match result {
			Ok(_) => OperationState::Resolved,
			Err(e) if e.is_disposed() => OperationState::Cancelled,
			Err(_) => OperationState::Rejected,
		};
		self.tracker.settle(self.id, state);
	}
}

impl Drop for OperationGuard {
	fn drop(&mut self) {
		self.tracker.settle(self.id, OperationState::Cancelled);
	}
}
