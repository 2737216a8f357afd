//! Local tree snapshots
//!
//! A manifest is a flat map of workspace-relative POSIX paths to size and mtime. It is
//! built fresh on every scan and never mutated afterwards.

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ManifestError;
use crate::exclusion::IgnoreRuleSet;
use crate::logging::*;

/// Current manifest format version
pub const MANIFEST_VERSION: u32 = 1;

/// Size and modification time of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
	pub size: u64,
	/// Modification time in whole milliseconds since the epoch
	pub mtime: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
	pub version: u32,
	pub sync_id: String,
	pub root: String,
	pub generated_at: u64,
	pub files: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
	/// Manifest with a fresh sync id and timestamp
	pub fn new(root: impl Into<String>, files: BTreeMap<String, ManifestEntry>) -> Self {
		Self {
			version: MANIFEST_VERSION,
			sync_id: uuid::Uuid::new_v4().to_string(),
			root: root.into(),
			generated_at: now_millis(),
			files,
		}
	}

	pub fn empty(root: impl Into<String>) -> Self {
		Self::new(root, BTreeMap::new())
	}

	/// Copy of this manifest under a new sync id
	pub fn with_new_id(&self, sync_id: impl Into<String>) -> Self {
		Self { sync_id: sync_id.into(), generated_at: now_millis(), ..self.clone() }
	}

	pub fn len(&self) -> usize {
		self.files.len()
	}

	pub fn is_empty(&self) -> bool {
		self.files.is_empty()
	}

	pub fn get(&self, rel_path: &str) -> Option<&ManifestEntry> {
		self.files.get(rel_path)
	}

	pub fn contains(&self, rel_path: &str) -> bool {
		self.files.contains_key(rel_path)
	}
}

/// Result of a scan: the manifest plus entries that could not be read
#[derive(Debug)]
pub struct ManifestScan {
	pub manifest: Manifest,
	/// One message per unreadable entry; its subtree is missing from the manifest
	pub skipped: Vec<String>,
}

/// Snapshot the tree under `root`, pruning ignored entries.
///
/// Ignored directories are never descended into. A read failure on an entry drops
/// that entry (and its subtree) but the rest of the walk continues. Only an
/// unreadable root fails the whole build.
pub fn scan_manifest(root: &Path, rules: &IgnoreRuleSet) -> Result<ManifestScan, ManifestError> {
	fs::read_dir(root).map_err(|e| ManifestError::RootUnreadable {
		path: root.display().to_string(),
		source: e,
	})?;

	let filter_root = root.to_path_buf();
	let filter_rules = rules.clone();
	let walker = WalkBuilder::new(root)
		.standard_filters(false)
		.hidden(false)
		.follow_links(false)
		.sort_by_file_name(|a, b| a.cmp(b))
		.filter_entry(move |entry| {
			if entry.depth() == 0 {
				return true;
			}
			let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
			match relative_posix(&filter_root, entry.path()) {
				Some(rel) => !filter_rules.is_ignored(&rel, is_dir),
				None => true,
			}
		})
		.build();

	let mut files = BTreeMap::new();
	let mut skipped = Vec::new();

	for result in walker {
		let entry = match result {
			Ok(entry) => entry,
			Err(e) => {
				warn!("Skipping unreadable entry: {}", e);
				skipped.push(e.to_string());
				continue;
			}
		};

		let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
		if !is_file {
			continue;
		}

		let rel = match relative_posix(root, entry.path()) {
			Some(rel) => rel,
			None => continue,
		};

		match entry.metadata() {
			Ok(meta) => {
				let mtime = meta
					.modified()
					.ok()
					.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
					.map(|d| d.as_millis() as u64)
					.unwrap_or(0);
				files.insert(rel, ManifestEntry { size: meta.len(), mtime });
			}
			Err(e) => {
				warn!("Cannot stat {}: {}", rel, e);
				skipped.push(format!("{}: {}", rel, e));
			}
		}
	}

	debug!("Scanned {} files under {} ({} skipped)", files.len(), root.display(), skipped.len());

	Ok(ManifestScan { manifest: Manifest::new(root.display().to_string(), files), skipped })
}

/// Snapshot the tree under `root`, discarding the list of skipped entries
pub fn build_manifest(root: &Path, rules: &IgnoreRuleSet) -> Result<Manifest, ManifestError> {
	scan_manifest(root, rules).map(|scan| scan.manifest)
}

/// Write a manifest as pretty JSON, creating the parent directory
pub fn save_manifest(path: &Path, manifest: &Manifest) -> Result<(), ManifestError> {
	let save_err =
		|e: std::io::Error| ManifestError::SaveFailed { path: path.display().to_string(), source: e };

	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).map_err(save_err)?;
	}
	let json = serde_json::to_string_pretty(manifest)
		.map_err(|e| ManifestError::Encode(e.to_string()))?;
	fs::write(path, json).map_err(save_err)
}

/// Read a manifest; a missing or corrupt file yields None
pub fn load_manifest(path: &Path) -> Option<Manifest> {
	let text = fs::read_to_string(path).ok()?;
	match serde_json::from_str(&text) {
		Ok(manifest) => Some(manifest),
		Err(e) => {
			warn!("Ignoring corrupt manifest {}: {}", path.display(), e);
			None
		}
	}
}

fn relative_posix(root: &Path, path: &Path) -> Option<String> {
	let rel = path.strip_prefix(root).ok()?;
	let parts: Vec<String> =
		rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
	if parts.is_empty() {
		None
	} else {
		Some(parts.join("/"))
	}
}

fn now_millis() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
