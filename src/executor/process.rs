//! Protocol executor backed by an external process per call

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::sync::Notify;

use super::{DeviceExecutor, Invocation};
use crate::config::Config;
use crate::error::{ErrorKind, ExecError};
use crate::logging::*;

/// Spawns `<program> <base args> --baud <n> <verb> ...` for every call
pub struct ProcessExecutor {
	program: String,
	base_args: Vec<String>,
	baud: u32,
	cwd: Option<PathBuf>,
	cancel: Notify,
}

impl ProcessExecutor {
	pub fn new(command: &[String], baud: u32) -> Result<Self, ExecError> {
		let (program, base_args) = command
			.split_first()
			.ok_or_else(|| ExecError::new(ErrorKind::Failed, "", "empty tool command"))?;
		Ok(Self {
			program: program.clone(),
			base_args: base_args.to_vec(),
			baud,
			cwd: None,
			cancel: Notify::new(),
		})
	}

	pub fn from_config(config: &Config) -> Result<Self, ExecError> {
		Self::new(&config.tool_command, config.baud_rate)
	}

	/// Run the tool from this directory
	pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
		self.cwd = Some(cwd.into());
		self
	}
}

#[async_trait]
impl DeviceExecutor for ProcessExecutor {
	async fn execute(&self, call: &Invocation) -> Result<String, ExecError> {
		let verb = call.verb.as_str();
		let mut cmd = tokio::process::Command::new(&self.program);
		cmd.args(&self.base_args)
			.args(call.to_args(self.baud))
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		if let Some(cwd) = &self.cwd {
			cmd.current_dir(cwd);
		}

		// Registered before spawning so a cancel racing the spawn is not lost
		let cancelled = self.cancel.notified();
		tokio::pin!(cancelled);
		cancelled.as_mut().enable();

		let child = cmd.spawn().map_err(|e| {
			ExecError::new(
				ErrorKind::Failed,
				verb,
				format!("Failed to spawn '{}': {}", self.program, e),
			)
		})?;
		debug!("spawned {} for {}", self.program, verb);

		tokio::select! {
			output = child.wait_with_output() => {
				let output = output.map_err(|e| ExecError::new(ErrorKind::Failed, verb, e.to_string()))?;
				if output.status.success() {
					Ok(String::from_utf8_lossy(&output.stdout).into_owned())
				} else {
					let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
					let message = if stderr.is_empty() {
						format!("{} exited with {}", verb, output.status)
					} else {
						stderr
					};
					Err(ExecError::from_output(verb, message))
				}
			}
			_ = &mut cancelled => {
				// Dropping the wait future kills the child (kill_on_drop)
				warn!("{} cancelled, tool process killed", verb);
				Err(ExecError::new(ErrorKind::Cancelled, verb, "cancelled by user"))
			}
		}
	}

	fn kill_current(&self) {
		self.cancel.notify_waiters();
	}
}
