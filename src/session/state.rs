//! Session phase tracking and the pending-operation chain

use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

/// Where the session is in the monitor handover cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
	/// Nothing running, no monitor attached
	Idle,
	/// Monitor owns the port, no operation running
	MonitorAttached,
	/// Monitor is being detached for an operation
	Suspending,
	/// An operation owns the port
	OperationRunning,
	/// Operation finished, monitor is being reattached
	Resuming,
}

impl SessionPhase {
	/// An operation is between admission and completion
	pub fn is_busy(self) -> bool {
		matches!(
			self,
			SessionPhase::Suspending | SessionPhase::OperationRunning | SessionPhase::Resuming
		)
	}
}

impl fmt::Display for SessionPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SessionPhase::Idle => "idle",
			SessionPhase::MonitorAttached => "monitor attached",
			SessionPhase::Suspending => "suspending monitor",
			SessionPhase::OperationRunning => "operation running",
			SessionPhase::Resuming => "resuming monitor",
		};
		f.write_str(name)
	}
}

/// Admission ticket for one submitted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
	epoch: u64,
}

/// Ordering state of submitted operations.
///
/// Every submission is stamped with the current epoch. A preempting submission
/// starts a new epoch; operations stamped with an older epoch that have not
/// started yet are discarded when they reach the slot.
#[derive(Debug, Default)]
pub struct PendingChain {
	epoch: u64,
	waiting: usize,
}

impl PendingChain {
	pub fn submit(&mut self, preempt: bool) -> Ticket {
		if preempt {
			self.preempt();
		}
		self.waiting += 1;
		Ticket { epoch: self.epoch }
	}

	/// Start a new epoch, returning how many operations were waiting
	pub fn preempt(&mut self) -> usize {
		self.epoch += 1;
		self.waiting
	}

	/// The ticket reached the slot; true when it may run
	pub fn admit(&mut self, ticket: Ticket) -> bool {
		self.waiting = self.waiting.saturating_sub(1);
		ticket.epoch == self.epoch
	}

	/// Submitted operations that have not reached the slot yet
	pub fn waiting(&self) -> usize {
		self.waiting
	}

	pub fn epoch(&self) -> u64 {
		self.epoch
	}
}

/// Coordinator-owned session state
pub struct SessionState {
	phase_tx: watch::Sender<SessionPhase>,
	chain: Mutex<PendingChain>,
}

impl SessionState {
	pub fn new() -> Self {
		let (phase_tx, _) = watch::channel(SessionPhase::Idle);
		Self { phase_tx, chain: Mutex::new(PendingChain::default()) }
	}

	pub fn phase(&self) -> SessionPhase {
		*self.phase_tx.borrow()
	}

	pub fn set_phase(&self, phase: SessionPhase) {
		let previous = self.phase_tx.send_replace(phase);
		if previous != phase {
			tracing::trace!("session phase {} -> {}", previous, phase);
		}
	}

	pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
		self.phase_tx.subscribe()
	}

	pub fn chain(&self) -> MutexGuard<'_, PendingChain> {
		self.chain.lock().unwrap_or_else(|e| e.into_inner())
	}
}

impl Default for SessionState {
	fn default() -> Self {
		Self::new()
	}
}
