//! Callback traits for progress reporting and link status notices

use std::time::Duration;

use crate::error::ErrorKind;
use crate::logging::*;
use crate::types::{FileFailure, SyncPhase};

type ProgressFn = dyn Fn(ProgressStats) + Send + Sync;
type FailureFn = dyn Fn(&FileFailure) + Send + Sync;
type NoticeFn = dyn Fn(&LinkNotice) + Send + Sync;

/// Progress statistics during sync workflows
#[derive(Debug, Clone)]
pub struct ProgressStats {
	/// Current workflow phase
	pub phase: SyncPhase,

	/// Files processed so far in this phase
	pub files_processed: usize,

	/// Total files this phase will process (0 while unknown)
	pub files_total: usize,

	/// Device path being processed
	pub current: Option<String>,

	/// Elapsed time since the workflow started
	pub elapsed: Duration,
}

/// Callbacks for a running sync workflow
pub trait SyncCallbacks: Send + Sync {
	/// Called with progress updates
	fn on_progress(&self, _stats: ProgressStats) {}

	/// Called when a single file fails and the batch moves on
	fn on_file_failed(&self, _failure: &FileFailure) {}
}

/// Default callback implementation that does nothing
pub struct NoCallbacks;

impl SyncCallbacks for NoCallbacks {}

/// Outward link status notice (port busy, device gone)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkNotice {
	pub kind: ErrorKind,
	pub port: Option<String>,
	pub message: String,
}

/// Receives rate-limited link status notices
pub trait StatusCallback: Send + Sync {
	fn on_notice(&self, notice: &LinkNotice);
}

/// Status callback that drops every notice
pub struct NoStatusCallback;

impl StatusCallback for NoStatusCallback {
	fn on_notice(&self, _notice: &LinkNotice) {}
}

/// Status callback that logs notices as warnings
pub struct LogStatusCallback;

impl StatusCallback for LogStatusCallback {
	fn on_notice(&self, notice: &LinkNotice) {
		let port = notice.port.as_deref().unwrap_or("(no port)");
		match notice.kind {
			ErrorKind::PortBusy => {
				warn!("Port {} is busy or not accessible: {}", port, notice.message)
			}
			ErrorKind::TransientDisconnect => {
				warn!("Board on {} disconnected or not responding: {}", port, notice.message)
			}
			_ => warn!("{}: {}", port, notice.message),
		}
	}
}

/// Builder for callbacks using function closures
pub struct CallbackBuilder {
	progress: Option<Box<ProgressFn>>,
	file_failed: Option<Box<FailureFn>>,
	notice: Option<Box<NoticeFn>>,
}

impl CallbackBuilder {
	pub fn new() -> Self {
		CallbackBuilder { progress: None, file_failed: None, notice: None }
	}

	pub fn on_progress<F>(mut self, callback: F) -> Self
	where
		F: Fn(ProgressStats) + Send + Sync + 'static,
	{
		self.progress = Some(Box::new(callback));
		self
	}

	pub fn on_file_failed<F>(mut self, callback: F) -> Self
	where
		F: Fn(&FileFailure) + Send + Sync + 'static,
	{
		self.file_failed = Some(Box::new(callback));
		self
	}

	pub fn on_notice<F>(mut self, callback: F) -> Self
	where
		F: Fn(&LinkNotice) + Send + Sync + 'static,
	{
		self.notice = Some(Box::new(callback));
		self
	}

	/// Build a handler usable both as sync callbacks and as a status callback
	pub fn build(self) -> CompositeCallbacks {
		CompositeCallbacks {
			progress: self.progress,
			file_failed: self.file_failed,
			notice: self.notice,
		}
	}
}

impl Default for CallbackBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Closure-backed callbacks produced by [`CallbackBuilder`]
pub struct CompositeCallbacks {
	progress: Option<Box<ProgressFn>>,
	file_failed: Option<Box<FailureFn>>,
	notice: Option<Box<NoticeFn>>,
}

impl SyncCallbacks for CompositeCallbacks {
	fn on_progress(&self, stats: ProgressStats) {
		if let Some(ref callback) = self.progress {
			callback(stats);
		}
	}

	fn on_file_failed(&self, failure: &FileFailure) {
		if let Some(ref callback) = self.file_failed {
			callback(failure);
		}
	}
}

impl StatusCallback for CompositeCallbacks {
	fn on_notice(&self, notice: &LinkNotice) {
		if let Some(ref callback) = self.notice {
			callback(notice);
		}
	}
}
