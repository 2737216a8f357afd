//! Instrumented collaborator calls: port resolution, deadlines, retry and notices

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::callbacks::{LinkNotice, StatusCallback};
use crate::config::{normalize_port, Config, AUTO_PORT};
use crate::error::{ErrorKind, ExecError};
use crate::executor::{DeviceExecutor, Invocation};
use crate::logging::*;

/// Timing knobs of the link
#[derive(Debug, Clone, Copy)]
pub struct LinkTiming {
	pub retry_delay: Duration,
	pub list_timeout: Duration,
	pub notice_cooldown: Duration,
}

impl LinkTiming {
	pub fn from_config(config: &Config) -> Self {
		Self {
			retry_delay: config.retry_delay(),
			list_timeout: config.list_timeout(),
			notice_cooldown: config.notice_cooldown(),
		}
	}
}

/// Rate limiter for outward notices.
///
/// While suppressed, the latest notice is held back and delivered (still subject
/// to the cooldown) once suppression ends.
struct NoticeGate {
	callback: Arc<dyn StatusCallback>,
	cooldown: Duration,
	last_shown: Mutex<Option<Instant>>,
	suppressed: AtomicBool,
	deferred: Mutex<Option<LinkNotice>>,
}

impl NoticeGate {
	fn raise(&self, notice: LinkNotice) {
		if self.suppressed.load(Ordering::SeqCst) {
			*lock(&self.deferred) = Some(notice);
			return;
		}
		self.emit(notice);
	}

	fn emit(&self, notice: LinkNotice) {
		let now = Instant::now();
		{
			let mut last = lock(&self.last_shown);
			if let Some(shown) = *last {
				if now.duration_since(shown) < self.cooldown {
					debug!("notice within cooldown dropped: {}", notice.message);
					return;
				}
			}
			*last = Some(now);
		}
		self.callback.on_notice(&notice);
	}

	fn suppress(&self) {
		self.suppressed.store(true, Ordering::SeqCst);
	}

	fn resume(&self) {
		self.suppressed.store(false, Ordering::SeqCst);
		let deferred = lock(&self.deferred).take();
		if let Some(notice) = deferred {
			self.emit(notice);
		}
	}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Single path through which every collaborator call travels
pub struct Link {
	executor: Arc<dyn DeviceExecutor>,
	port: Mutex<Option<String>>,
	timing: LinkTiming,
	notices: NoticeGate,
}

impl Link {
	pub fn new(
		executor: Arc<dyn DeviceExecutor>,
		port: Option<String>,
		timing: LinkTiming,
		status: Arc<dyn StatusCallback>,
	) -> Self {
		Self {
			executor,
			port: Mutex::new(port),
			timing,
			notices: NoticeGate {
				callback: status,
				cooldown: timing.notice_cooldown,
				last_shown: Mutex::new(None),
				suppressed: AtomicBool::new(false),
				deferred: Mutex::new(None),
			},
		}
	}

	/// Currently selected concrete port
	pub fn port(&self) -> Option<String> {
		lock(&self.port).clone()
	}

	/// Select a port; "auto" or an empty string clears the selection
	pub fn set_port(&self, port: &str) {
		let port = normalize_port(port);
		let resolved = if port.is_empty() || port == AUTO_PORT { None } else { Some(port) };
		*lock(&self.port) = resolved;
	}

	pub(crate) fn suppress_notices(&self) {
		self.notices.suppress();
	}

	pub(crate) fn resume_notices(&self) {
		self.notices.resume();
	}

	pub(crate) fn kill_current(&self) {
		self.executor.kill_current();
	}

	/// Execute one call.
	///
	/// Fails fast with `PortNotSelected` when the verb needs a port and none is set.
	/// A `TransientDisconnect` is retried exactly once after the retry delay. Final
	/// busy or disconnect failures raise a rate-limited notice.
	pub async fn call(&self, mut call: Invocation) -> Result<String, ExecError> {
		let verb = call.verb;
		if verb.needs_port() {
			match self.port() {
				Some(port) => call.port = Some(port),
				None => return Err(ExecError::port_not_selected(verb.as_str())),
			}
		}

		let mut retried = false;
		loop {
			match self.execute_once(&call).await {
				Ok(output) => return Ok(output),
				Err(e) if e.kind.is_retryable() && !retried => {
					retried = true;
					debug!("{} failed ({}), retrying in {:?}", verb, e.message, self.timing.retry_delay);
					tokio::time::sleep(self.timing.retry_delay).await;
				}
				Err(e) => {
					if e.kind.is_link_status() {
						self.notices.raise(LinkNotice {
							kind: e.kind,
							port: call.port.clone(),
							message: e.message.clone(),
						});
					}
					return Err(e);
				}
			}
		}
	}

	async fn execute_once(&self, call: &Invocation) -> Result<String, ExecError> {
		if !call.verb.is_listing() {
			return self.executor.execute(call).await;
		}
		match tokio::time::timeout(self.timing.list_timeout, self.executor.execute(call)).await {
			Ok(result) => result,
			Err(_) => Err(ExecError::new(
				ErrorKind::Timeout,
				call.verb.as_str(),
				format!("no answer within {} ms", self.timing.list_timeout.as_millis()),
			)),
		}
	}
}
