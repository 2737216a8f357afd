//! Upload on save
//!
//! Bridges `notify` events from the watcher thread into tokio and hands each
//! written file to [`BoardSync::upload_saved`] once it has been quiet for
//! [`SETTLE`]. Editors tend to write a file in several steps, so events are
//! coalesced per path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::SyncError;
use crate::logging::*;
use crate::sync::BoardSync;

/// Quiet time before a written file is uploaded
pub const SETTLE: Duration = Duration::from_millis(300);

/// Paths whose content an event says was written
pub fn written_paths(event: &notify::Event) -> Vec<PathBuf> {
	match event.kind {
		EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => {
			event.paths.clone()
		}
		// Save-by-rename lands on the last path
		EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both)) => {
			event.paths.last().cloned().into_iter().collect()
		}
		_ => Vec::new(),
	}
}

/// Per-path debounce
#[derive(Debug)]
pub struct SettleQueue {
	settle: Duration,
	pending: HashMap<PathBuf, Instant>,
}

impl SettleQueue {
	pub fn new(settle: Duration) -> Self {
		Self { settle, pending: HashMap::new() }
	}

	/// Note a write; a later write to the same path pushes its deadline back
	pub fn push(&mut self, path: PathBuf, now: Instant) {
		self.pending.insert(path, now + self.settle);
	}

	/// Earliest pending deadline
	pub fn next_deadline(&self) -> Option<Instant> {
		self.pending.values().min().copied()
	}

	/// Remove and return the paths that have settled by `now`, sorted
	pub fn take_ready(&mut self, now: Instant) -> Vec<PathBuf> {
		let mut ready: Vec<PathBuf> =
			self.pending.iter().filter(|(_, due)| **due <= now).map(|(p, _)| p.clone()).collect();
		for path in &ready {
			self.pending.remove(path);
		}
		ready.sort();
		ready
	}

	pub fn is_empty(&self) -> bool {
		self.pending.is_empty()
	}
}

fn watch_error(e: notify::Error) -> SyncError {
	SyncError::Other { message: format!("file watcher: {}", e) }
}

/// Watch the workspace and upload saved files until the process is stopped.
///
/// Fails right away when auto-sync on save is disabled for the workspace.
pub async fn watch_and_upload(board: &BoardSync) -> Result<(), SyncError> {
	if !board.config().auto_sync_on_save {
		return Err("autoSyncOnSave is disabled for this workspace".to_string().into());
	}

	let (tx, mut rx) = mpsc::channel::<PathBuf>(1024);
	let mut watcher = RecommendedWatcher::new(
		move |res: Result<notify::Event, notify::Error>| match res {
			Ok(event) => {
				for path in written_paths(&event) {
					if let Err(e) = tx.blocking_send(path) {
						debug!("save event dropped: {}", e);
					}
				}
			}
			Err(e) => warn!("File watcher error: {}", e),
		},
		notify::Config::default(),
	)
	.map_err(watch_error)?;
	watcher.watch(board.workspace(), RecursiveMode::Recursive).map_err(watch_error)?;
	info!("Watching {} for saved files", board.workspace().display());

	let mut queue = SettleQueue::new(SETTLE);
	loop {
		let received = match queue.next_deadline() {
			Some(deadline) => tokio::select! {
				path = rx.recv() => path.map(Some),
				_ = tokio::time::sleep_until(deadline) => Some(None),
			},
			None => rx.recv().await.map(Some),
		};
		match received {
			Some(Some(path)) => queue.push(path, Instant::now()),
			Some(None) => {}
			None => break,
		}

		for path in queue.take_ready(Instant::now()) {
			if !path.is_file() {
				continue;
			}
			match board.upload_saved(&path).await {
				Ok(Some(target)) => info!("{} -> {}", path.display(), target),
				Ok(None) => {}
				Err(e) => warn!("Upload of {} failed: {}", path.display(), e),
			}
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};

	fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
		paths.iter().fold(notify::Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
	}

	#[test]
	fn test_written_paths() {
		let created = event(EventKind::Create(CreateKind::File), &["/ws/a.py"]);
		assert_eq!(written_paths(&created), vec![PathBuf::from("/ws/a.py")]);

		let written = event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &["/ws/b.py"]);
		assert_eq!(written_paths(&written), vec![PathBuf::from("/ws/b.py")]);

		let renamed =
			event(EventKind::Modify(ModifyKind::Name(RenameMode::Both)), &["/ws/.b.swp", "/ws/b.py"]);
		assert_eq!(written_paths(&renamed), vec![PathBuf::from("/ws/b.py")]);

		let removed = event(EventKind::Remove(RemoveKind::File), &["/ws/c.py"]);
		assert!(written_paths(&removed).is_empty());
		let read = event(EventKind::Access(AccessKind::Any), &["/ws/c.py"]);
		assert!(written_paths(&read).is_empty());
	}

	#[test]
	fn test_settle_queue_coalesces_writes() {
		let start = Instant::now();
		let mut queue = SettleQueue::new(Duration::from_millis(100));
		queue.push(PathBuf::from("/ws/a.py"), start);
		queue.push(PathBuf::from("/ws/b.py"), start);
		queue.push(PathBuf::from("/ws/a.py"), start + Duration::from_millis(50));

		assert_eq!(queue.next_deadline(), Some(start + Duration::from_millis(100)));
		assert_eq!(queue.take_ready(start + Duration::from_millis(100)), vec![PathBuf::from("/ws/b.py")]);
		assert!(queue.take_ready(start + Duration::from_millis(120)).is_empty());
		assert_eq!(queue.take_ready(start + Duration::from_millis(150)), vec![PathBuf::from("/ws/a.py")]);
		assert!(queue.is_empty());
	}
}

// vim: ts=4
