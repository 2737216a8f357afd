//! Signal handlers for graceful termination

use std::sync::Arc;
use tracing::{debug, warn};

use crate::session::Coordinator;

/// Kill the in-flight tool call on SIGINT/SIGTERM, then exit.
///
/// The tool process holds the serial port; leaving it behind would keep the port
/// busy for the next run.
pub fn setup_signal_handlers(coordinator: Arc<Coordinator>) {
	tokio::spawn(async move {
		use tokio::signal;

		let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("Failed to setup SIGTERM handler: {}. Process will not handle SIGTERM gracefully.", e);
				return;
			}
		};

		let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("Failed to setup SIGINT handler: {}. Process will not handle SIGINT gracefully.", e);
				return;
			}
		};

		let code = tokio::select! {
			_ = sigterm.recv() => {
				debug!("Received SIGTERM, cancelling device operation...");
				143 // 128 + SIGTERM(15)
			}
			_ = sigint.recv() => {
				debug!("Received SIGINT, cancelling device operation...");
				130 // 128 + SIGINT(2)
			}
		};

		coordinator.cancel();
		// Give kill_on_drop a moment to reap the child
		tokio::time::sleep(std::time::Duration::from_millis(50)).await;
		std::process::exit(code);
	});
}

// vim: ts=4
