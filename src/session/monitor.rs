//! Interactive serial monitor sessions
//!
//! The monitor holds the port while attached. Before any protocol call the
//! coordinator drives the monitor's quit key sequence, and afterwards respawns it on
//! the same port.

use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::logging::*;

/// Keys sent to quit the monitor, each followed by a pause: Ctrl-], `q`, Enter
pub const DETACH_SEQUENCE: &[(&[u8], u64)] = &[(b"\x1d", 120), (b"q", 60), (b"\r", 200)];

/// How long a quitting monitor gets before it is killed
const EXIT_GRACE: Duration = Duration::from_secs(2);

#[async_trait]
pub trait MonitorSession: Send + Sync {
	fn is_attached(&self) -> bool;

	/// Write raw keys to the monitor's terminal
	async fn send_keys(&self, keys: &[u8]) -> io::Result<()>;

	/// Called after the detach sequence; the port must be free on return
	async fn finish_detach(&self);

	/// Start a fresh monitor on `port`
	async fn attach(&self, port: &str) -> io::Result<()>;
}

/// Run the detach sequence against a monitor
pub async fn detach(monitor: &dyn MonitorSession) {
	for (keys, pause_ms) in DETACH_SEQUENCE {
		if let Err(e) = monitor.send_keys(keys).await {
			debug!("monitor key write failed: {}", e);
			break;
		}
		tokio::time::sleep(Duration::from_millis(*pause_ms)).await;
	}
	monitor.finish_detach().await;
}

struct MonitorProcess {
	child: Child,
	stdin: Option<ChildStdin>,
}

/// Monitor running as a child process: `<command...> <port> <baud>`.
///
/// Output goes straight to the parent's terminal.
pub struct ProcessMonitor {
	command: Vec<String>,
	baud: u32,
	attached: AtomicBool,
	process: Mutex<Option<MonitorProcess>>,
}

impl ProcessMonitor {
	pub fn new(command: Vec<String>, baud: u32) -> Self {
		Self { command, baud, attached: AtomicBool::new(false), process: Mutex::new(None) }
	}

	pub fn from_config(config: &Config) -> Self {
		Self::new(config.monitor_command.clone(), config.baud_rate)
	}
}

#[async_trait]
impl MonitorSession for ProcessMonitor {
	fn is_attached(&self) -> bool {
		self.attached.load(Ordering::SeqCst)
	}

	async fn send_keys(&self, keys: &[u8]) -> io::Result<()> {
		let mut process = self.process.lock().await;
		match process.as_mut().and_then(|p| p.stdin.as_mut()) {
			Some(stdin) => {
				stdin.write_all(keys).await?;
				stdin.flush().await
			}
			None => Err(io::Error::new(io::ErrorKind::NotConnected, "monitor not running")),
		}
	}

	async fn finish_detach(&self) {
		let taken = self.process.lock().await.take();
		self.attached.store(false, Ordering::SeqCst);
		let Some(mut process) = taken else {
			return;
		};

		// Closing stdin ends monitors that ignored the quit keys
		drop(process.stdin.take());
		match tokio::time::timeout(EXIT_GRACE, process.child.wait()).await {
			Ok(Ok(status)) => debug!("monitor exited with {}", status),
			Ok(Err(e)) => warn!("waiting for monitor failed: {}", e),
			Err(_) => {
				warn!("monitor did not quit, killing it");
				if let Err(e) = process.child.kill().await {
					warn!("failed to kill monitor: {}", e);
				}
			}
		}
	}

	async fn attach(&self, port: &str) -> io::Result<()> {
		let (program, args) = self
			.command
			.split_first()
			.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty monitor command"))?;

		let mut child = tokio::process::Command::new(program)
			.args(args)
			.arg(port)
			.arg(self.baud.to_string())
			.stdin(Stdio::piped())
			.kill_on_drop(true)
			.spawn()?;
		let stdin = child.stdin.take();

		*self.process.lock().await = Some(MonitorProcess { child, stdin });
		self.attached.store(true, Ordering::SeqCst);
		info!("monitor attached to {}", port);
		Ok(())
	}
}
