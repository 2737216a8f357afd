//! Manifest and cross-tree comparison
//!
//! `diff_manifests` compares two local snapshots. `cross_diff` compares a local snapshot
//! with a live device listing using size-only equality (the device clock is not
//! trusted). Display sets add ancestor directories for tree decoration; sync
//! workflows only ever consume the file-level sets.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use crate::exclusion::IgnoreRuleSet;
use crate::manifest::Manifest;
use crate::paths;
use crate::types::RemoteStat;

/// Result of comparing two manifests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
	/// Keys new in `next`, or present in both with a different size or mtime
	pub changed_or_new: Vec<String>,
	/// Keys of `prev` missing from `next`
	pub deleted: Vec<String>,
}

impl ManifestDiff {
	pub fn is_empty(&self) -> bool {
		self.changed_or_new.is_empty() && self.deleted.is_empty()
	}
}

pub fn diff_manifests(prev: &Manifest, next: &Manifest) -> ManifestDiff {
	let changed_or_new = next
		.files
		.iter()
		.filter(|(path, entry)| prev.files.get(*path) != Some(*entry))
		.map(|(path, _)| path.clone())
		.collect();
	let deleted =
		prev.files.keys().filter(|path| !next.files.contains_key(*path)).cloned().collect();
	ManifestDiff { changed_or_new, deleted }
}

/// File-level result of comparing the workspace with the device.
///
/// All three sets hold workspace-relative paths and are pairwise disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossDiff {
	/// On both sides with different sizes
	pub changed: BTreeSet<String>,
	/// On the device only
	pub remote_only: BTreeSet<String>,
	/// In the workspace only
	pub local_only: BTreeSet<String>,
}

impl CrossDiff {
	pub fn is_empty(&self) -> bool {
		self.changed.is_empty() && self.remote_only.is_empty() && self.local_only.is_empty()
	}

	pub fn total(&self) -> usize {
		self.changed.len() + self.remote_only.len() + self.local_only.len()
	}
}

/// Compare a local manifest with a recursive device listing.
///
/// Device entries are projected to workspace-relative paths under `root` and filtered
/// through the ignore rules before comparison. Directories in the listing are skipped.
pub fn cross_diff(
	local: &Manifest,
	remote: &[RemoteStat],
	rules: &IgnoreRuleSet,
	root: &str,
) -> CrossDiff {
	let mut diff = CrossDiff::default();
	let mut seen_remote = BTreeSet::new();

	for stat in remote.iter().filter(|s| !s.is_dir) {
		let rel = paths::to_local_relative(&stat.path, root);
		if rel.is_empty() || rules.is_ignored(&rel, false) {
			continue;
		}
		match local.files.get(&rel) {
			Some(entry) if entry.size != stat.size => {
				diff.changed.insert(rel.clone());
			}
			Some(_) => {}
			None => {
				diff.remote_only.insert(rel.clone());
			}
		}
		seen_remote.insert(rel);
	}

	for rel in local.files.keys() {
		if !seen_remote.contains(rel) {
			diff.local_only.insert(rel.clone());
		}
	}

	diff
}

/// Device-path sets for tree decoration, each augmented with ancestor directories
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffDisplay {
	pub changed: BTreeSet<String>,
	pub remote_only: BTreeSet<String>,
	pub local_only: BTreeSet<String>,
}

/// Build the decoration-only sets; never feed these to a sync workflow
pub fn decorate(diff: &CrossDiff, root: &str) -> DiffDisplay {
	let augment = |set: &BTreeSet<String>| {
		let mut out = BTreeSet::new();
		for rel in set {
			let device = paths::to_device_path(rel, root);
			out.extend(paths::device_ancestors(&device, root));
			out.insert(device);
		}
		out
	};
	DiffDisplay {
		changed: augment(&diff.changed),
		remote_only: augment(&diff.remote_only),
		local_only: augment(&diff.local_only),
	}
}

#[derive(Debug, Clone)]
struct DiffState {
	root: String,
	files: CrossDiff,
	display: DiffDisplay,
}

/// Holder for the most recent cross diff.
///
/// Shared explicitly between the sync workflows that set and clear it and the tree
/// cache that shows local-only files as placeholders.
#[derive(Debug, Default)]
pub struct DiffMarkers {
	state: Mutex<Option<DiffState>>,
}

impl DiffMarkers {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, Option<DiffState>> {
		self.state.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Record a fresh diff, replacing any earlier one
	pub fn set(&self, files: CrossDiff, root: &str) {
		let display = decorate(&files, root);
		*self.lock() = Some(DiffState { root: root.to_string(), files, display });
	}

	pub fn clear(&self) {
		*self.lock() = None;
	}

	/// Narrow the recorded diff to `rels`; nothing left clears it
	pub fn retain(&self, rels: &BTreeSet<String>) {
		let mut state = self.lock();
		let Some(current) = state.as_mut() else {
			return;
		};
		current.files.changed.retain(|r| rels.contains(r));
		current.files.remote_only.retain(|r| rels.contains(r));
		current.files.local_only.retain(|r| rels.contains(r));
		if current.files.is_empty() {
			*state = None;
		} else {
			current.display = decorate(&current.files, &current.root);
		}
	}

	/// A check has run and its result has not been consumed yet
	pub fn has_state(&self) -> bool {
		self.lock().is_some()
	}

	/// File-level sets of the last check
	pub fn files(&self) -> Option<CrossDiff> {
		self.lock().as_ref().map(|s| s.files.clone())
	}

	/// Decoration sets of the last check
	pub fn display(&self) -> Option<DiffDisplay> {
		self.lock().as_ref().map(|s| s.display.clone())
	}

	/// Device paths of local-only files (no ancestor directories)
	pub fn local_only_files(&self) -> Vec<String> {
		match self.lock().as_ref() {
			Some(state) => state
				.files
				.local_only
				.iter()
				.map(|rel| paths::to_device_path(rel, &state.root))
				.collect(),
			None => Vec::new(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::manifest::ManifestEntry;
	use std::collections::BTreeMap;

	fn manifest(entries: &[(&str, u64, u64)]) -> Manifest {
		let files: BTreeMap<String, ManifestEntry> = entries
			.iter()
			.map(|(p, size, mtime)| (p.to_string(), ManifestEntry { size: *size, mtime: *mtime }))
			.collect();
		Manifest::new("/ws", files)
	}

	fn stat(path: &str, size: u64) -> RemoteStat {
		RemoteStat { path: path.to_string(), is_dir: false, size, mtime: 0 }
	}

	fn dir(path: &str) -> RemoteStat {
		RemoteStat { path: path.to_string(), is_dir: true, size: 0, mtime: 0 }
	}

	/// Small deterministic generator so the mutation test needs no extra crate
	struct Lcg(u64);

	impl Lcg {
		fn next(&mut self) -> u64 {
			self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
			self.0 >> 33
		}
	}

	#[test]
	fn test_diff_with_itself_is_empty() {
		let m = manifest(&[("a.py", 1, 10), ("b/c.py", 2, 20)]);
		let diff = diff_manifests(&m, &m);
		assert!(diff.changed_or_new.is_empty());
		assert!(diff.deleted.is_empty());
		assert!(diff.is_empty());
	}

	#[test]
	fn test_diff_detects_each_kind() {
		let prev = manifest(&[("same.py", 1, 1), ("size.py", 1, 1), ("time.py", 1, 1), ("gone.py", 1, 1)]);
		let next = manifest(&[("same.py", 1, 1), ("size.py", 2, 1), ("time.py", 1, 2), ("new.py", 1, 1)]);

		let diff = diff_manifests(&prev, &next);

		assert_eq!(diff.changed_or_new, vec!["new.py", "size.py", "time.py"]);
		assert_eq!(diff.deleted, vec!["gone.py"]);
	}

	#[test]
	fn test_diff_randomized_mutations() {
		let mut rng = Lcg(0x5eed);
		for round in 0..200 {
			let count = (rng.next() % 20) as usize;
			let base: Vec<(String, u64, u64)> =
				(0..count).map(|i| (format!("d{}/f{}.py", i % 3, i), rng.next() % 50, rng.next() % 50)).collect();
			let prev = Manifest::new(
				"/ws",
				base.iter().map(|(p, s, m)| (p.clone(), ManifestEntry { size: *s, mtime: *m })).collect(),
			);

			let mut next_files = prev.files.clone();
			let mut expected_changed = BTreeSet::new();
			let mut expected_deleted = BTreeSet::new();
			for (path, _, _) in &base {
				match rng.next() % 5 {
					0 => {
						next_files.remove(path);
						expected_deleted.insert(path.clone());
					}
					1 => {
						if let Some(e) = next_files.get_mut(path) {
							e.size += 1 + rng.next() % 3;
						}
						expected_changed.insert(path.clone());
					}
					2 => {
						if let Some(e) = next_files.get_mut(path) {
							e.mtime += 1 + rng.next() % 3;
						}
						expected_changed.insert(path.clone());
					}
					_ => {}
				}
			}
			for n in 0..(rng.next() % 4) {
				let path = format!("new/{}-{}.py", round, n);
				next_files.insert(path.clone(), ManifestEntry { size: 1, mtime: 1 });
				expected_changed.insert(path);
			}
			let next = Manifest::new("/ws", next_files);

			let diff = diff_manifests(&prev, &next);

			let changed: BTreeSet<String> = diff.changed_or_new.into_iter().collect();
			let deleted: BTreeSet<String> = diff.deleted.into_iter().collect();
			assert_eq!(changed, expected_changed, "round {}", round);
			assert_eq!(deleted, expected_deleted, "round {}", round);
		}
	}

	#[test]
	fn test_cross_diff_size_only() {
		let local = manifest(&[("x.py", 12, 100)]);
		let remote = vec![stat("/x.py", 9)];

		let diff = cross_diff(&local, &remote, &IgnoreRuleSet::default(), "/");

		assert_eq!(diff.changed.iter().collect::<Vec<_>>(), vec!["x.py"]);
		assert!(diff.remote_only.is_empty());
		assert!(diff.local_only.is_empty());
	}

	#[test]
	fn test_cross_diff_ignores_mtime() {
		let local = manifest(&[("x.py", 12, 100)]);
		let remote = vec![RemoteStat { path: "/x.py".to_string(), is_dir: false, size: 12, mtime: 999 }];
		assert!(cross_diff(&local, &remote, &IgnoreRuleSet::default(), "/").is_empty());
	}

	#[test]
	fn test_cross_diff_sides_and_filtering() {
		let local = manifest(&[("main.py", 5, 1), ("lib/util.py", 3, 1), ("new.py", 1, 1)]);
		let remote = vec![
			dir("/app/lib"),
			stat("/app/main.py", 5),
			stat("/app/lib/util.py", 4),
			stat("/app/boot.py", 7),
			stat("/app/__pycache__/x.pyc", 7),
			stat("/app/.boardsync/manifest.json", 300),
		];
		let rules = IgnoreRuleSet::compile(&["__pycache__/", ".boardsync/"]).unwrap();

		let diff = cross_diff(&local, &remote, &rules, "/app");

		assert_eq!(diff.changed.iter().collect::<Vec<_>>(), vec!["lib/util.py"]);
		assert_eq!(diff.remote_only.iter().collect::<Vec<_>>(), vec!["boot.py"]);
		assert_eq!(diff.local_only.iter().collect::<Vec<_>>(), vec!["new.py"]);
		assert_eq!(diff.total(), 3);
	}

	#[test]
	fn test_decorate_adds_ancestors_separately() {
		let mut diff = CrossDiff::default();
		diff.changed.insert("a/b/c.py".to_string());
		diff.local_only.insert("top.py".to_string());

		let display = decorate(&diff, "/");

		assert!(display.changed.contains("/a/b/c.py"));
		assert!(display.changed.contains("/a/b"));
		assert!(display.changed.contains("/a"));
		assert!(display.local_only.contains("/top.py"));
		// File-level set stays untouched
		assert_eq!(diff.changed.len(), 1);
	}

	#[test]
	fn test_markers_lifecycle() {
		let markers = DiffMarkers::new();
		assert!(!markers.has_state());
		assert!(markers.local_only_files().is_empty());

		let mut diff = CrossDiff::default();
		diff.local_only.insert("b/c.py".to_string());
		markers.set(diff.clone(), "/app");

		assert!(markers.has_state());
		assert_eq!(markers.files(), Some(diff));
		assert_eq!(markers.local_only_files(), vec!["/app/b/c.py"]);
		assert!(markers.display().unwrap().local_only.contains("/app/b"));

		markers.clear();
		assert!(!markers.has_state());
		assert_eq!(markers.display(), None);
	}

	#[test]
	fn test_markers_narrowed_to_leftovers() {
		let markers = DiffMarkers::new();
		let mut diff = CrossDiff::default();
		diff.changed.insert("main.py".to_string());
		diff.local_only.insert("lib/a.py".to_string());
		diff.local_only.insert("lib/b.py".to_string());
		markers.set(diff, "/");

		markers.retain(&BTreeSet::from(["lib/b.py".to_string()]));
		let left = markers.files().unwrap();
		assert!(left.changed.is_empty());
		assert_eq!(left.local_only, BTreeSet::from(["lib/b.py".to_string()]));
		assert_eq!(markers.local_only_files(), vec!["/lib/b.py"]);
		assert!(markers.display().unwrap().local_only.contains("/lib"));

		markers.retain(&BTreeSet::new());
		assert!(!markers.has_state());
	}
}
