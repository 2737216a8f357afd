//! Session coordination
//!
//! The coordinator owns the serial port. Every device operation is admitted through
//! a single slot, so at most one collaborator call is ever in flight. If a monitor
//! holds the port it is detached before the operation and reattached to the same
//! port afterwards, even when the operation fails.

mod link;
pub mod monitor;
mod state;

pub use link::{Link, LinkTiming};
pub use monitor::{MonitorSession, ProcessMonitor};
pub use state::{PendingChain, SessionPhase, SessionState, Ticket};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use crate::callbacks::StatusCallback;
use crate::config::Config;
use crate::device::Device;
use crate::error::{ErrorKind, ExecError};
use crate::executor::DeviceExecutor;
use crate::logging::*;

/// How an operation is admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
	/// Discard operations that are queued but not started yet
	pub preempt: bool,
}

impl RunOptions {
	/// Explicit user operations jump the queue
	pub fn preempting() -> Self {
		Self { preempt: true }
	}

	/// Background work (tree listings) waits its turn
	pub fn queued() -> Self {
		Self { preempt: false }
	}
}

/// Handover timing of the coordinator
#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
	pub auto_suspend: bool,
	pub settle_after_detach: Duration,
	pub pre_list_delay: Duration,
}

impl SessionTiming {
	pub fn from_config(config: &Config) -> Self {
		Self {
			auto_suspend: config.auto_suspend,
			settle_after_detach: config.settle_after_detach(),
			pre_list_delay: config.pre_list_delay(),
		}
	}
}

/// Resumes notices, and restores the resting phase if an operation is dropped midway
struct OperationGuard<'a> {
	coordinator: &'a Coordinator,
	finished: bool,
}

impl Drop for OperationGuard<'_> {
	fn drop(&mut self) {
		self.coordinator.link.resume_notices();
		if !self.finished {
			self.coordinator.state.set_phase(self.coordinator.resting_phase());
		}
	}
}

pub struct Coordinator {
	link: Arc<Link>,
	monitor: Option<Arc<dyn MonitorSession>>,
	state: SessionState,
	slot: Mutex<()>,
	timing: SessionTiming,
}

impl Coordinator {
	pub fn new(link: Link, timing: SessionTiming) -> Self {
		Self {
			link: Arc::new(link),
			monitor: None,
			state: SessionState::new(),
			slot: Mutex::new(()),
			timing,
		}
	}

	pub fn from_config(
		config: &Config,
		executor: Arc<dyn DeviceExecutor>,
		status: Arc<dyn StatusCallback>,
	) -> Self {
		let link =
			Link::new(executor, config.resolved_port(), LinkTiming::from_config(config), status);
		Self::new(link, SessionTiming::from_config(config))
	}

	pub fn with_monitor(mut self, monitor: Arc<dyn MonitorSession>) -> Self {
		self.monitor = Some(monitor);
		self
	}

	pub fn link(&self) -> &Link {
		&self.link
	}

	pub fn timing(&self) -> SessionTiming {
		self.timing
	}

	pub fn phase(&self) -> SessionPhase {
		self.state.phase()
	}

	pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
		self.state.subscribe()
	}

	fn monitor_attached(&self) -> bool {
		self.monitor.as_ref().map(|m| m.is_attached()).unwrap_or(false)
	}

	fn resting_phase(&self) -> SessionPhase {
		if self.monitor_attached() {
			SessionPhase::MonitorAttached
		} else {
			SessionPhase::Idle
		}
	}

	/// Run `op` with exclusive use of the port.
	///
	/// Operations start in submission order. A preempting submission discards
	/// operations that are still waiting (they fail with `Preempted`) but never
	/// interrupts the one in flight.
	pub async fn run<T, E, F, Fut>(&self, options: RunOptions, op: F) -> Result<T, E>
	where
		F: FnOnce(Device) -> Fut,
		Fut: Future<Output = Result<T, E>>,
		E: From<ExecError>,
	{
		let ticket = self.state.chain().submit(options.preempt);
		let _slot = self.slot.lock().await;
		if !self.state.chain().admit(ticket) {
			debug!("queued operation discarded by preemption");
			return Err(ExecError::preempted().into());
		}

		let suspended = if self.timing.auto_suspend {
			self.monitor.clone().filter(|m| m.is_attached())
		} else {
			None
		};
		let port = self.link.port();

		if let Some(monitor) = &suspended {
			self.state.set_phase(SessionPhase::Suspending);
			monitor::detach(monitor.as_ref()).await;
			tokio::time::sleep(self.timing.settle_after_detach).await;
		}

		self.state.set_phase(SessionPhase::OperationRunning);
		let result = {
			let mut guard = OperationGuard { coordinator: self, finished: false };
			self.link.suppress_notices();
			let result = op(Device::new(self.link.clone())).await;
			guard.finished = true;
			result
		};

		if let Some(monitor) = &suspended {
			self.state.set_phase(SessionPhase::Resuming);
			match &port {
				Some(port) => {
					if let Err(e) = monitor.attach(port).await {
						warn!("failed to reattach monitor on {}: {}", port, e);
					}
				}
				None => warn!("no port selected, monitor not reattached"),
			}
		}
		self.state.set_phase(self.resting_phase());

		result
	}

	/// Discard every operation that has not started yet
	pub fn preempt(&self) -> usize {
		let discarded = self.state.chain().preempt();
		if discarded > 0 {
			info!("discarding {} queued operation(s)", discarded);
		}
		discarded
	}

	/// Hard-cancel: drop queued operations and kill the call in flight
	pub fn cancel(&self) {
		self.preempt();
		self.link.kill_current();
	}

	/// Give the port to a monitor
	pub async fn attach_monitor(&self) -> Result<(), ExecError> {
		let monitor = self
			.monitor
			.clone()
			.ok_or_else(|| ExecError::new(ErrorKind::Failed, "", "no monitor configured"))?;
		let port = self.link.port().ok_or_else(|| ExecError::port_not_selected("monitor"))?;

		let _slot = self.slot.lock().await;
		if !monitor.is_attached() {
			monitor
				.attach(&port)
				.await
				.map_err(|e| ExecError::new(ErrorKind::Failed, "monitor", e.to_string()))?;
		}
		self.state.set_phase(self.resting_phase());
		Ok(())
	}

	/// Release the link: drop queued work, close any monitor and go idle
	pub async fn release(&self) {
		self.preempt();
		let _slot = self.slot.lock().await;
		if let Some(monitor) = self.monitor.as_ref().filter(|m| m.is_attached()) {
			monitor::detach(monitor.as_ref()).await;
		}
		self.state.set_phase(SessionPhase::Idle);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::callbacks::NoStatusCallback;
	use crate::executor::Invocation;
	use async_trait::async_trait;
	use std::io;
	use std::sync::atomic::{AtomicBool, Ordering};
	use std::sync::Mutex as StdMutex;

	struct Echo;

	#[async_trait]
	impl DeviceExecutor for Echo {
		async fn execute(&self, call: &Invocation) -> Result<String, ExecError> {
			Ok(call.verb.as_str().to_string())
		}

		fn kill_current(&self) {}
	}

	/// Monitor that records key writes and attach calls
	#[derive(Default)]
	struct FakeMonitor {
		attached: AtomicBool,
		log: StdMutex<Vec<String>>,
	}

	#[async_trait]
	impl MonitorSession for FakeMonitor {
		fn is_attached(&self) -> bool {
			self.attached.load(Ordering::SeqCst)
		}

		async fn send_keys(&self, keys: &[u8]) -> io::Result<()> {
			self.log.lock().unwrap().push(format!("keys {:?}", keys));
			Ok(())
		}

		async fn finish_detach(&self) {
			self.attached.store(false, Ordering::SeqCst);
			self.log.lock().unwrap().push("detached".to_string());
		}

		async fn attach(&self, port: &str) -> io::Result<()> {
			self.attached.store(true, Ordering::SeqCst);
			self.log.lock().unwrap().push(format!("attach {}", port));
			Ok(())
		}
	}

	fn coordinator(port: Option<&str>) -> Coordinator {
		let timing = LinkTiming {
			retry_delay: Duration::from_millis(1),
			list_timeout: Duration::from_secs(1),
			notice_cooldown: Duration::from_secs(6),
		};
		let link = Link::new(Arc::new(Echo), port.map(String::from), timing, Arc::new(NoStatusCallback));
		Coordinator::new(
			link,
			SessionTiming {
				auto_suspend: true,
				settle_after_detach: Duration::from_millis(1),
				pre_list_delay: Duration::ZERO,
			},
		)
	}

	#[tokio::test]
	async fn test_monitor_detached_and_reattached_on_same_port() {
		let monitor = Arc::new(FakeMonitor::default());
		let coord = coordinator(Some("/dev/ttyUSB0")).with_monitor(monitor.clone());
		coord.attach_monitor().await.unwrap();
		assert_eq!(coord.phase(), SessionPhase::MonitorAttached);

		let seen = monitor.clone();
		let out: Result<String, ExecError> = coord
			.run(RunOptions::preempting(), |device| async move {
				assert!(!seen.is_attached());
				device.call(Invocation::new(crate::executor::Verb::Mkdir).path("/lib")).await
			})
			.await;
		assert_eq!(out.unwrap(), "mkdir");

		let log = monitor.log.lock().unwrap().clone();
		assert_eq!(
			log,
			vec![
				"attach /dev/ttyUSB0".to_string(),
				"keys [29]".to_string(),
				"keys [113]".to_string(),
				"keys [13]".to_string(),
				"detached".to_string(),
				"attach /dev/ttyUSB0".to_string(),
			]
		);
		assert_eq!(coord.phase(), SessionPhase::MonitorAttached);
	}

	#[tokio::test]
	async fn test_monitor_reattached_after_failure() {
		let monitor = Arc::new(FakeMonitor::default());
		let coord = coordinator(Some("/dev/ttyUSB0")).with_monitor(monitor.clone());
		coord.attach_monitor().await.unwrap();

		let out: Result<(), ExecError> = coord
			.run(RunOptions::preempting(), |_device| async {
				Err(ExecError::new(ErrorKind::Failed, "mkdir", "boom"))
			})
			.await;
		assert!(out.is_err());
		assert!(monitor.is_attached());
	}

	#[tokio::test]
	async fn test_no_monitor_stays_idle() {
		let coord = coordinator(Some("/dev/ttyUSB0"));
		let mut phases = coord.subscribe();
		let out: Result<u32, ExecError> =
			coord.run(RunOptions::queued(), |_device| async { Ok(7) }).await;
		assert_eq!(out.unwrap(), 7);
		assert_eq!(coord.phase(), SessionPhase::Idle);
		assert!(phases.has_changed().unwrap());
		assert_eq!(*phases.borrow_and_update(), SessionPhase::Idle);
	}

	#[tokio::test]
	async fn test_attach_monitor_needs_port() {
		let coord = coordinator(None).with_monitor(Arc::new(FakeMonitor::default()));
		let err = coord.attach_monitor().await.unwrap_err();
		assert_eq!(err.kind, ErrorKind::PortNotSelected);
	}

	#[tokio::test]
	async fn test_release_goes_idle() {
		let monitor = Arc::new(FakeMonitor::default());
		let coord = coordinator(Some("/dev/ttyUSB0")).with_monitor(monitor.clone());
		coord.attach_monitor().await.unwrap();
		coord.release().await;
		assert!(!monitor.is_attached());
		assert_eq!(coord.phase(), SessionPhase::Idle);
	}
}
