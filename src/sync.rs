//! Sync workflows between the workspace and the board
//!
//! Every workflow admits exactly one coordinator operation for its device calls, so
//! a whole batch runs with the monitor detached once.

use std::collections::{BTreeSet, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::callbacks::{ProgressStats, SyncCallbacks};
use crate::config::{Config, WORKSPACE_DIR};
use crate::device::Device;
use crate::diff::{cross_diff, diff_manifests, CrossDiff, DiffMarkers, ManifestDiff};
use crate::error::{ErrorKind, ExecError, SyncError};
use crate::exclusion::{ensure_ignore_file, IgnoreRuleSet};
use crate::logging::*;
use crate::manifest::{build_manifest, load_manifest, save_manifest, Manifest};
use crate::paths;
use crate::session::{Coordinator, RunOptions};
use crate::tree_cache::RemoteTreeCache;
use crate::types::{BatchReport, FileFailure, RemoteStat, SyncPhase, WipeResult};

/// Which side wins in a diff-then-sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	ToBoard,
	ToLocal,
}

/// Errors that end a batch instead of being counted per file
fn is_batch_fatal(kind: ErrorKind) -> bool {
	matches!(kind, ErrorKind::PortNotSelected | ErrorKind::Cancelled)
}

struct Progress<'a> {
	callbacks: &'a dyn SyncCallbacks,
	started: Instant,
}

impl<'a> Progress<'a> {
	fn new(callbacks: &'a dyn SyncCallbacks) -> Self {
		Self { callbacks, started: Instant::now() }
	}

	fn report(&self, phase: SyncPhase, done: usize, total: usize, current: Option<&str>) {
		self.callbacks.on_progress(ProgressStats {
			phase,
			files_processed: done,
			files_total: total,
			current: current.map(String::from),
			elapsed: self.started.elapsed(),
		});
	}

	fn failed(&self, report: &mut BatchReport, path: String, kind: ErrorKind, message: String) {
		warn!("{} failed: {}", path, message);
		let failure = FileFailure { path, kind, message };
		self.callbacks.on_file_failed(&failure);
		report.failed.push(failure);
	}
}

/// Workspace bound to a board
pub struct BoardSync {
	workspace: PathBuf,
	config: Config,
	coordinator: Arc<Coordinator>,
	markers: Arc<DiffMarkers>,
	cache: Arc<RemoteTreeCache>,
}

impl BoardSync {
	/// Bind `workspace` to the board behind `coordinator`.
	///
	/// The workspace is canonicalized so local paths handed to the tool stay valid
	/// whatever its working directory. The tree cache lists through the coordinator
	/// and shows local-only files from the shared diff markers.
	pub fn new(
		workspace: impl AsRef<Path>,
		config: Config,
		coordinator: Arc<Coordinator>,
	) -> Result<Self, SyncError> {
		let workspace = std::fs::canonicalize(workspace.as_ref())?;
		let rules = IgnoreRuleSet::load(&workspace)?;
		let markers = Arc::new(DiffMarkers::new());
		let cache = Arc::new(RemoteTreeCache::new(
			&config.root_path,
			rules,
			coordinator.clone(),
			markers.clone(),
		));
		Ok(Self { workspace, config, coordinator, markers, cache })
	}

	pub fn workspace(&self) -> &Path {
		&self.workspace
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn coordinator(&self) -> &Arc<Coordinator> {
		&self.coordinator
	}

	pub fn markers(&self) -> &Arc<DiffMarkers> {
		&self.markers
	}

	pub fn cache(&self) -> &Arc<RemoteTreeCache> {
		&self.cache
	}

	fn root(&self) -> &str {
		paths::normalize_root(&self.config.root_path)
	}

	fn manifest_path(&self) -> PathBuf {
		Config::manifest_path(&self.workspace)
	}

	/// Create the workspace state directory, the default ignore file and an
	/// initial manifest. Returns true if anything was created.
	pub async fn ensure_initialized(&self) -> Result<bool, SyncError> {
		let created_ignore = ensure_ignore_file(&self.workspace)?;
		let manifest_path = self.manifest_path();
		if manifest_path.exists() {
			return Ok(created_ignore);
		}

		let (_, manifest) = self.scan().await?;
		save_manifest(&manifest_path, &manifest)?;
		info!("Initialized {} in {}", WORKSPACE_DIR, self.workspace.display());
		Ok(true)
	}

	/// Load the ignore rules and snapshot the workspace
	pub async fn scan(&self) -> Result<(IgnoreRuleSet, Manifest), SyncError> {
		let rules = IgnoreRuleSet::load(&self.workspace)?;
		let workspace = self.workspace.clone();
		let walk_rules = rules.clone();
		let manifest = tokio::task::spawn_blocking(move || build_manifest(&workspace, &walk_rules))
			.await
			.map_err(|e| SyncError::Other { message: format!("manifest scan panicked: {}", e) })??;
		Ok((rules, manifest))
	}

	/// Local changes since the last saved manifest
	pub async fn local_changes(&self) -> Result<ManifestDiff, SyncError> {
		let (_, current) = self.scan().await?;
		let previous = load_manifest(&self.manifest_path())
			.unwrap_or_else(|| Manifest::empty(self.workspace.display().to_string()));
		Ok(diff_manifests(&previous, &current))
	}

	/// Create every missing ancestor directory of `target`, outermost first.
	///
	/// Best effort: a failing mkdir usually means the directory exists already.
	async fn ensure_remote_dirs(&self, device: &Device, target: &str, ensured: &mut HashSet<String>) {
		let root = self.root();
		let mut dirs = paths::device_ancestors(target, root);
		dirs.retain(|d| d != root && d != "/");
		for dir in dirs.into_iter().rev() {
			if !ensured.insert(dir.clone()) {
				continue;
			}
			match device.mkdir(&dir).await {
				Ok(()) => self.cache.add_created_dir(&dir),
				Err(e) => debug!("mkdir {} skipped: {}", dir, e),
			}
		}
	}

	/// Upload one file; per-file errors go to the report, fatal ones are returned
	async fn upload_one(
		&self,
		device: &Device,
		rel: &str,
		ensured: &mut HashSet<String>,
		report: &mut BatchReport,
		progress: &Progress<'_>,
	) -> Result<(), SyncError> {
		let target = paths::to_device_path(rel, self.root());
		let local = paths::to_local_path(&self.workspace, rel);
		self.ensure_remote_dirs(device, &target, ensured).await;
		match device.upload_replacing(&local, &target).await {
			Ok(()) => {
				self.cache.add_node(&target, false);
				report.transferred.push(target);
				Ok(())
			}
			Err(e) if is_batch_fatal(e.kind) => Err(e.into()),
			Err(e) => {
				progress.failed(report, target, e.kind, e.message);
				Ok(())
			}
		}
	}

	/// Record a file known to be on the board, with its directories, in the cached tree
	fn record_remote_file(&self, source: &str) {
		let mut dirs = paths::device_ancestors(source, self.root());
		dirs.retain(|d| d != self.root() && d != "/");
		for dir in dirs.iter().rev() {
			self.cache.add_node(dir, true);
		}
		self.cache.add_node(source, false);
	}

	/// Download one file; per-file errors go to the report, fatal ones are returned
	async fn download_one(
		&self,
		device: &Device,
		rel: &str,
		report: &mut BatchReport,
		progress: &Progress<'_>,
	) -> Result<(), SyncError> {
		let source = paths::to_device_path(rel, self.root());
		if !paths::is_contained(rel) {
			warn!("{} skipped: path leaves the workspace", source);
			report.skipped.push(source);
			return Ok(());
		}
		let local = paths::to_local_path(&self.workspace, rel);
		if let Some(parent) = local.parent() {
			if let Err(e) = tokio::fs::create_dir_all(parent).await {
				progress.failed(report, source, ErrorKind::LocalIo, e.to_string());
				return Ok(());
			}
		}
		match device.cp_from(&source, &local).await {
			Ok(()) => {
				self.record_remote_file(&source);
				report.transferred.push(source);
				Ok(())
			}
			Err(e) if is_batch_fatal(e.kind) => Err(e.into()),
			Err(e) => {
				progress.failed(report, source, e.kind, e.message);
				Ok(())
			}
		}
	}

	/// Copy the saved manifest next to the synced tree on the board
	async fn push_manifest_copy(
		&self,
		device: &Device,
		ensured: &mut HashSet<String>,
		report: &mut BatchReport,
	) {
		let target = self.config.device_manifest_path();
		self.ensure_remote_dirs(device, &target, ensured).await;
		if let Err(e) = device.cp_to(&self.manifest_path(), &target).await {
			warn!("Could not store manifest on the board: {}", e);
			report.warnings.push(format!("manifest copy: {}", e));
		}
	}

	/// Upload every non-ignored workspace file
	pub async fn push_all(&self, callbacks: &dyn SyncCallbacks) -> Result<BatchReport, SyncError> {
		let progress = Progress::new(callbacks);
		self.ensure_initialized().await?;

		progress.report(SyncPhase::Scanning, 0, 0, None);
		let (_, manifest) = self.scan().await?;
		let files: Vec<String> = manifest.files.keys().cloned().collect();
		let total = files.len();

		let report = self
			.coordinator
			.run(RunOptions::preempting(), |device| async move {
				let mut report = BatchReport::default();
				let mut ensured = HashSet::new();
				for (done, rel) in files.iter().enumerate() {
					progress.report(SyncPhase::Uploading, done, total, Some(rel.as_str()));
					self.upload_one(&device, rel, &mut ensured, &mut report, &progress).await?;
				}
				progress.report(SyncPhase::Uploading, total, total, None);

				save_manifest(&self.manifest_path(), &manifest)?;
				self.push_manifest_copy(&device, &mut ensured, &mut report).await;
				Ok::<_, SyncError>(report)
			})
			.await?;

		self.markers.clear();
		self.cache.sync_placeholders();
		info!(
			"Uploaded {} of {} files ({} failed)",
			report.transferred.len(),
			total,
			report.failed.len()
		);
		Ok(report)
	}

	/// Download every non-ignored file under the device root
	pub async fn pull_all(&self, callbacks: &dyn SyncCallbacks) -> Result<BatchReport, SyncError> {
		let progress = Progress::new(callbacks);
		self.ensure_initialized().await?;
		let rules = IgnoreRuleSet::load(&self.workspace)?;
		let root = self.root().to_string();

		let report = self
			.coordinator
			.run(RunOptions::preempting(), |device| async move {
				progress.report(SyncPhase::Listing, 0, 0, None);
				let remote = device.tree_stats(&root).await?;
				let files = remote_files(&remote, &root, &rules);
				let total = files.len();

				let mut report = BatchReport::default();
				for (done, rel) in files.iter().enumerate() {
					progress.report(SyncPhase::Downloading, done, total, Some(rel.as_str()));
					self.download_one(&device, rel, &mut report, &progress).await?;
				}
				progress.report(SyncPhase::Downloading, total, total, None);
				Ok::<_, SyncError>(report)
			})
			.await?;

		let (_, manifest) = self.scan().await?;
		save_manifest(&self.manifest_path(), &manifest)?;
		self.markers.clear();
		self.cache.sync_placeholders();
		info!("Downloaded {} files ({} failed)", report.transferred.len(), report.failed.len());
		Ok(report)
	}

	/// Compare the workspace with the board and record the result
	pub async fn check_diffs(&self, callbacks: &dyn SyncCallbacks) -> Result<CrossDiff, SyncError> {
		let progress = Progress::new(callbacks);
		self.ensure_initialized().await?;

		progress.report(SyncPhase::Scanning, 0, 0, None);
		let (rules, manifest) = self.scan().await?;
		let root = self.root().to_string();

		let remote = self
			.coordinator
			.run(RunOptions::preempting(), |device| {
				let root = root.clone();
				async move { device.tree_stats(&root).await }
			})
			.await?;

		progress.report(SyncPhase::Comparing, 0, 0, None);
		let diff = cross_diff(&manifest, &remote, &rules, &root);
		info!(
			"{} changed, {} only on board, {} only local",
			diff.changed.len(),
			diff.remote_only.len(),
			diff.local_only.len()
		);
		self.markers.set(diff.clone(), &root);
		self.cache.sync_placeholders();
		for rel in &diff.remote_only {
			self.record_remote_file(&paths::to_device_path(rel, &root));
		}
		Ok(diff)
	}

	/// Transfer the files recorded by the last check in one direction.
	///
	/// Candidates are re-validated against a fresh device listing. Once the batch
	/// completes the recorded diff keeps only the files that failed, so a second
	/// run retries just those.
	pub async fn sync_diffs(
		&self,
		direction: Direction,
		callbacks: &dyn SyncCallbacks,
	) -> Result<BatchReport, SyncError> {
		let diff = self.markers.files().ok_or(SyncError::NoDiffState)?;
		let progress = Progress::new(callbacks);
		let rules = IgnoreRuleSet::load(&self.workspace)?;
		let root = self.root().to_string();

		let report = self
			.coordinator
			.run(RunOptions::preempting(), |device| async move {
				progress.report(SyncPhase::Listing, 0, 0, None);
				let remote = device.tree_stats(&root).await?;
				let live: BTreeSet<String> = remote_files(&remote, &root, &rules).into_iter().collect();

				let mut report = BatchReport::default();
				match direction {
					Direction::ToBoard => {
						let mut targets = Vec::new();
						for rel in diff.changed.iter().chain(diff.local_only.iter()) {
							let still_valid = diff.local_only.contains(rel) || live.contains(rel);
							let local = paths::to_local_path(&self.workspace, rel);
							if !still_valid || rules.is_ignored(rel, false) || !local.is_file() {
								report.skipped.push(paths::to_device_path(rel, &root));
							} else {
								targets.push(rel.clone());
							}
						}

						let total = targets.len();
						let mut ensured = HashSet::new();
						for (done, rel) in targets.iter().enumerate() {
							progress.report(SyncPhase::Uploading, done, total, Some(rel.as_str()));
							self.upload_one(&device, rel, &mut ensured, &mut report, &progress).await?;
						}
						progress.report(SyncPhase::Uploading, total, total, None);
					}
					Direction::ToLocal => {
						let mut targets = Vec::new();
						for rel in diff.changed.iter().chain(diff.remote_only.iter()) {
							if live.contains(rel) {
								targets.push(rel.clone());
							} else {
								report.skipped.push(paths::to_device_path(rel, &root));
							}
						}

						let total = targets.len();
						for (done, rel) in targets.iter().enumerate() {
							progress.report(SyncPhase::Downloading, done, total, Some(rel.as_str()));
							self.download_one(&device, rel, &mut report, &progress).await?;
						}
						progress.report(SyncPhase::Downloading, total, total, None);
					}
				}
				Ok::<_, SyncError>(report)
			})
			.await?;

		let failed: BTreeSet<String> =
			report.failed.iter().map(|f| paths::to_local_relative(&f.path, self.root())).collect();
		self.markers.retain(&failed);
		self.cache.sync_placeholders();
		info!(
			"Synced {} differing files ({} failed, {} skipped)",
			report.transferred.len(),
			report.failed.len(),
			report.skipped.len()
		);
		Ok(report)
	}

	/// Delete everything under the device root
	pub async fn wipe_remote(&self, callbacks: &dyn SyncCallbacks) -> Result<WipeResult, SyncError> {
		let progress = Progress::new(callbacks);
		let root = self.root().to_string();

		progress.report(SyncPhase::Wiping, 0, 0, Some(root.as_str()));
		let result = self
			.coordinator
			.run(RunOptions::preempting(), |device| {
				let root = root.clone();
				async move { device.wipe_path(&root).await }
			})
			.await?;

		self.cache.reset_dir(&root);
		self.markers.clear();
		if result.errors.is_empty() {
			info!("Deleted {} entries under {}", result.deleted_count, root);
		} else {
			warn!(
				"Deleted {} entries under {}, {} errors",
				result.deleted_count,
				root,
				result.errors.len()
			);
		}
		Ok(result)
	}

	/// Upload a single workspace file, creating its board directories first.
	/// Returns the device path written.
	pub async fn upload_file(&self, rel: &str) -> Result<String, SyncError> {
		let rel = rel.trim_start_matches('/');
		if !paths::is_contained(rel) {
			return Err(format!("{} is not a file inside the workspace", rel).into());
		}
		let local = paths::to_local_path(&self.workspace, rel);
		if !local.is_file() {
			return Err(io::Error::new(
				io::ErrorKind::NotFound,
				format!("{} does not exist", local.display()),
			)
			.into());
		}
		let target = paths::to_device_path(rel, self.root());
		let dest = target.as_str();

		self.coordinator
			.run(RunOptions::preempting(), |device| async move {
				let mut ensured = HashSet::new();
				self.ensure_remote_dirs(&device, dest, &mut ensured).await;
				device.upload_replacing(&local, dest).await
			})
			.await?;

		self.cache.add_node(&target, false);
		info!("Uploaded {}", target);
		Ok(target)
	}

	/// Download a single board file into the workspace and return its local path
	pub async fn download_file(&self, device_path: &str) -> Result<PathBuf, SyncError> {
		let rel = paths::to_local_relative(device_path, self.root());
		if !paths::is_under_root(device_path, self.root()) || !paths::is_contained(&rel) {
			return Err(format!("{} is not under {}", device_path, self.root()).into());
		}
		let local = paths::to_local_path(&self.workspace, &rel);
		if let Some(parent) = local.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		let dest = local.as_path();

		self.coordinator
			.run(RunOptions::preempting(), |device| async move { device.cp_from(device_path, dest).await })
			.await?;

		self.record_remote_file(device_path);
		info!("Downloaded {}", device_path);
		Ok(local)
	}

	/// Create one directory on the board; its parent must exist
	pub async fn mkdir(&self, path: &str) -> Result<(), SyncError> {
		self.coordinator
			.run(RunOptions::preempting(), |device| async move { device.mkdir(path).await })
			.await?;
		self.cache.add_created_dir(path);
		Ok(())
	}

	/// Delete a board file or directory tree, and with `also_local` its workspace
	/// counterpart too.
	pub async fn delete(&self, path: &str, also_local: bool) -> Result<(), SyncError> {
		if !paths::is_under_root(path, self.root()) {
			return Err(format!("Refusing to delete {}; use wipe for the whole root", path).into());
		}

		self.coordinator
			.run(RunOptions::preempting(), |device| async move {
				match device.delete_any(path).await {
					Ok(()) => Ok(()),
					Err(e) if is_batch_fatal(e.kind) => Err(e),
					// delete_any may refuse a non-empty directory
					Err(e) => match device.file_info(path).await {
						Some(info) if info.is_dir => device.delete_folder_recursive(path).await,
						_ => Err(e),
					},
				}
			})
			.await?;
		self.cache.remove_node(path);
		info!("Deleted {}", path);

		if also_local {
			let rel = paths::to_local_relative(path, self.root());
			if paths::is_contained(&rel) {
				remove_local(&paths::to_local_path(&self.workspace, &rel)).await?;
			}
		}
		Ok(())
	}

	/// Rename a board file or directory in place, along with its workspace
	/// counterpart when there is one. Returns the new device path.
	pub async fn rename(&self, path: &str, new_name: &str) -> Result<String, SyncError> {
		if new_name.is_empty() || new_name.contains('/') || new_name == "." || new_name == ".." {
			return Err(format!("Invalid name: {:?}", new_name).into());
		}
		if !paths::is_under_root(path, self.root()) {
			return Err(format!("{} is not under {}", path, self.root()).into());
		}
		let target = paths::device_join(&paths::device_parent(path), new_name);
		let dest = target.as_str();

		let is_dir = self
			.coordinator
			.run(RunOptions::preempting(), |device| async move {
				if device.file_exists(dest).await {
					return Err(SyncError::Other { message: format!("{} already exists", dest) });
				}
				let is_dir = device.file_info(path).await.is_some_and(|info| info.is_dir);
				device.mv(path, dest).await?;
				Ok(is_dir)
			})
			.await?;

		self.cache.remove_node(path);
		self.cache.add_node(&target, is_dir);

		let from = paths::to_local_relative(path, self.root());
		let to = paths::to_local_relative(&target, self.root());
		if paths::is_contained(&from) && paths::is_contained(&to) {
			let local_from = paths::to_local_path(&self.workspace, &from);
			if local_from.exists() {
				let local_to = paths::to_local_path(&self.workspace, &to);
				if let Err(e) = tokio::fs::rename(&local_from, &local_to).await {
					warn!("Local rename of {} failed: {}", local_from.display(), e);
				}
			}
		}
		info!("Renamed {} to {}", path, target);
		Ok(target)
	}

	/// Upload a file the editor just saved, when auto-sync on save is enabled.
	///
	/// Files outside the workspace and ignored files are left alone. Returns the
	/// device path written, or None when nothing was uploaded.
	pub async fn upload_saved(&self, local: &Path) -> Result<Option<String>, SyncError> {
		if !self.config.auto_sync_on_save {
			return Ok(None);
		}
		let local = tokio::fs::canonicalize(local).await?;
		let Some(rel) = paths::workspace_relative(&self.workspace, &local) else {
			debug!("{} is outside the workspace", local.display());
			return Ok(None);
		};
		let rules = IgnoreRuleSet::load(&self.workspace)?;
		if rules.is_ignored(&rel, false) {
			debug!("{} is ignored", rel);
			return Ok(None);
		}
		self.upload_file(&rel).await.map(Some)
	}

	/// Serial ports the tool can see
	pub async fn list_ports(&self) -> Result<Vec<String>, ExecError> {
		self.coordinator.run(RunOptions::preempting(), |device| async move { device.devs().await }).await
	}

	/// Run a workspace script on the board and return its output
	pub async fn run_file(&self, local: &Path) -> Result<String, ExecError> {
		self.coordinator
			.run(RunOptions::preempting(), |device| async move { device.run_file(local).await })
			.await
	}

	/// Soft-reset the board (best effort)
	pub async fn reset(&self) -> Result<(), ExecError> {
		self.coordinator
			.run(RunOptions::preempting(), |device| async move {
				device.reset().await;
				Ok(())
			})
			.await
	}
}

/// Remove a local file or directory tree; a missing path is fine
async fn remove_local(path: &Path) -> io::Result<()> {
	let result = match tokio::fs::symlink_metadata(path).await {
		Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
		Ok(_) => tokio::fs::remove_file(path).await,
		Err(e) => Err(e),
	};
	match result {
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
		other => other,
	}
}

/// Workspace-relative paths of the non-ignored files in a device listing
fn remote_files(remote: &[RemoteStat], root: &str, rules: &IgnoreRuleSet) -> Vec<String> {
	remote
		.iter()
		.filter(|s| !s.is_dir)
		.map(|s| paths::to_local_relative(&s.path, root))
		.filter(|rel| !rel.is_empty() && !rules.is_ignored(rel, false))
		.collect()
}
