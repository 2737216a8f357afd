//! Progress display callback for the CLI

pub mod constants;

use std::io::Write;
use std::sync::Mutex;
use std::time::Instant;
use tracing::info;

use crate::callbacks::{ProgressStats, SyncCallbacks};
use crate::types::{FileFailure, SyncPhase};

/// Progress display constants
pub use constants::*;

/// Shared state for progress tracking
#[derive(Debug)]
pub struct ProgressState {
	pub current_phase: Mutex<Option<SyncPhase>>,
	pub last_update: Mutex<Option<Instant>>,
}

impl ProgressState {
	pub fn new() -> Self {
		Self { current_phase: Mutex::new(None), last_update: Mutex::new(None) }
	}
}

impl Default for ProgressState {
	fn default() -> Self {
		Self::new()
	}
}

/// CLI progress callback: phase changes go to the log, transfers get a bar on stderr
pub struct CliProgressCallback {
	state: ProgressState,
}

impl CliProgressCallback {
	pub fn new() -> Self {
		Self { state: ProgressState::new() }
	}

	/// Clear the progress line before other output
	pub fn finish(&self) {
		if self.state.last_update.lock().unwrap_or_else(|e| e.into_inner()).take().is_some() {
			let _ = writeln!(std::io::stderr());
		}
	}
}

impl Default for CliProgressCallback {
	fn default() -> Self {
		Self::new()
	}
}

/// Render one progress line
pub fn render_line(stats: &ProgressStats) -> String {
	let ratio = if stats.files_total > 0 {
		stats.files_processed as f64 / stats.files_total as f64
	} else {
		0.0
	};
	let filled = (ratio.clamp(0.0, 1.0) * PROGRESS_BAR_WIDTH as f64) as usize;
	let bar = format!("[{}{}]", "=".repeat(filled), " ".repeat(PROGRESS_BAR_WIDTH - filled));

	let label = match stats.phase {
		SyncPhase::Uploading => "Uploading",
		SyncPhase::Downloading => "Downloading",
		_ => "Working",
	};
	let current = stats.current.as_deref().unwrap_or("");
	let current = if current.chars().count() > MAX_PATH_DISPLAY {
		let tail: String = current.chars().rev().take(MAX_PATH_DISPLAY - 3).collect();
		format!("...{}", tail.chars().rev().collect::<String>())
	} else {
		current.to_string()
	};

	format!(
		"  {}: {} {}/{} {:<width$}",
		label,
		bar,
		stats.files_processed,
		stats.files_total,
		current,
		width = MAX_PATH_DISPLAY
	)
}

impl SyncCallbacks for CliProgressCallback {
	fn on_progress(&self, stats: ProgressStats) {
		{
			let mut phase = self.state.current_phase.lock().unwrap_or_else(|e| e.into_inner());
			if *phase != Some(stats.phase) {
				*phase = Some(stats.phase);
				info!("→ {:?} phase...", stats.phase);
			}
		}

		if !matches!(stats.phase, SyncPhase::Uploading | SyncPhase::Downloading) {
			return;
		}

		// Throttle, but always draw the final state
		let mut last = self.state.last_update.lock().unwrap_or_else(|e| e.into_inner());
		let complete = stats.files_total > 0 && stats.files_processed == stats.files_total;
		if let Some(previous) = *last {
			if !complete && previous.elapsed().as_millis() < UPDATE_THROTTLE_MS {
				return;
			}
		}
		*last = Some(Instant::now());
		drop(last);

		let _ = write!(std::io::stderr(), "\r{}", render_line(&stats));
		let _ = std::io::stderr().flush();
	}

	fn on_file_failed(&self, failure: &FileFailure) {
		let _ = writeln!(
			std::io::stderr(),
			"\r  ✗ {} ({}): {}",
			failure.path,
			failure.kind,
			failure.message
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	fn stats(done: usize, total: usize, current: &str) -> ProgressStats {
		ProgressStats {
			phase: SyncPhase::Uploading,
			files_processed: done,
			files_total: total,
			current: Some(current.to_string()),
			elapsed: Duration::ZERO,
		}
	}

	#[test]
	fn test_render_half_bar() {
		let line = render_line(&stats(5, 10, "/lib/m.py"));
		assert!(line.starts_with("  Uploading: [==============="));
		assert!(line.contains(" 5/10 /lib/m.py"));
	}

	#[test]
	fn test_render_long_path_truncated() {
		let long = format!("/{}", "x".repeat(100));
		let line = render_line(&stats(0, 0, &long));
		assert!(line.contains("..."));
		assert!(!line.contains(&long));
	}
}

// vim: ts=4
