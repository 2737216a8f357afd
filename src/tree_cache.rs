//! Cached view of the device tree
//!
//! One entry per listed directory. A present entry is always the complete child
//! list of that directory; local mutations only touch entries that already exist,
//! except for directories the caller knows to be freshly created.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::diff::DiffMarkers;
use crate::error::ExecError;
use crate::exclusion::IgnoreRuleSet;
use crate::logging::*;
use crate::paths;
use crate::session::{Coordinator, RunOptions};
use crate::types::{sibling_order, DirEntry, NodeKind, RemoteNode};

/// Lists one device directory
#[async_trait]
pub trait ChildLister: Send + Sync {
	async fn list_children(&self, path: &str) -> Result<Vec<DirEntry>, ExecError>;
}

/// Listings go through the coordinator without preempting anything, after a short
/// pause that lets the port settle after the previous operation.
#[async_trait]
impl ChildLister for Coordinator {
	async fn list_children(&self, path: &str) -> Result<Vec<DirEntry>, ExecError> {
		let delay = self.timing().pre_list_delay;
		self.run(RunOptions::queued(), |device| async move {
			if !delay.is_zero() {
				tokio::time::sleep(delay).await;
			}
			device.ls_typed(path).await
		})
		.await
	}
}

/// What changed in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeChange {
	/// Children of this directory were (re)listed or edited
	Dir(String),
	/// Everything was dropped
	Cleared,
}

#[derive(Default)]
struct CacheInner {
	dirs: HashMap<String, Vec<RemoteNode>>,
	force_next: HashSet<String>,
}

pub struct RemoteTreeCache {
	root: String,
	rules: IgnoreRuleSet,
	lister: Arc<dyn ChildLister>,
	markers: Arc<DiffMarkers>,
	inner: Mutex<CacheInner>,
	changes: broadcast::Sender<TreeChange>,
}

impl RemoteTreeCache {
	pub fn new(
		root: &str,
		rules: IgnoreRuleSet,
		lister: Arc<dyn ChildLister>,
		markers: Arc<DiffMarkers>,
	) -> Self {
		let (changes, _) = broadcast::channel(64);
		Self {
			root: paths::normalize_root(root).to_string(),
			rules,
			lister,
			markers,
			inner: Mutex::new(CacheInner::default()),
			changes,
		}
	}

	pub fn root(&self) -> &str {
		&self.root
	}

	fn lock(&self) -> MutexGuard<'_, CacheInner> {
		self.inner.lock().unwrap_or_else(|e| e.into_inner())
	}

	fn notify(&self, change: TreeChange) {
		// No receivers is fine
		let _ = self.changes.send(change);
	}

	pub fn subscribe(&self) -> broadcast::Receiver<TreeChange> {
		self.changes.subscribe()
	}

	fn ignored(&self, path: &str, is_dir: bool) -> bool {
		self.rules.is_ignored(&paths::to_local_relative(path, &self.root), is_dir)
	}

	/// Whether `path` currently has a cached child list
	pub fn is_cached(&self, path: &str) -> bool {
		self.lock().dirs.contains_key(path)
	}

	/// Children of a device directory.
	///
	/// Served from the cache unless absent or a one-shot refresh was requested.
	/// A failed listing leaves the cache untouched.
	pub async fn get_children(&self, path: &str) -> Result<Vec<RemoteNode>, ExecError> {
		{
			let inner = self.lock();
			if !inner.force_next.contains(path) {
				if let Some(children) = inner.dirs.get(path) {
					return Ok(children.clone());
				}
			}
		}

		let entries = self.lister.list_children(path).await?;
		let children = self.build_children(path, entries);

		{
			let mut inner = self.lock();
			inner.force_next.remove(path);
			inner.dirs.insert(path.to_string(), children.clone());
		}
		self.notify(TreeChange::Dir(path.to_string()));
		Ok(children)
	}

	/// Bypass the cache on the next `get_children(path)`
	pub fn request_refresh(&self, path: &str) {
		self.lock().force_next.insert(path.to_string());
		self.notify(TreeChange::Dir(path.to_string()));
	}

	/// Fresh listing of `path`, replacing its entry
	pub async fn refresh(&self, path: &str) -> Result<Vec<RemoteNode>, ExecError> {
		self.lock().force_next.insert(path.to_string());
		self.get_children(path).await
	}

	fn build_children(&self, dir: &str, entries: Vec<DirEntry>) -> Vec<RemoteNode> {
		let mut children: Vec<RemoteNode> = entries
			.into_iter()
			.filter(|e| !e.name.is_empty())
			.filter_map(|e| {
				let path = paths::device_join(dir, &e.name);
				let rel = paths::to_local_relative(&path, &self.root);
				if self.rules.is_ignored(&rel, e.is_dir) {
					return None;
				}
				let kind = if e.is_dir { NodeKind::Dir } else { NodeKind::File };
				Some(RemoteNode::new(kind, e.name, path))
			})
			.collect();

		merge_placeholders(dir, &mut children, &self.markers.local_only_files());
		children.sort_by(sibling_order);
		children
	}

	/// Re-apply the local-only placeholders of the current diff to every cached
	/// directory without listing anything.
	///
	/// Stale placeholders are dropped and new ones merged in; listed nodes are kept.
	pub fn sync_placeholders(&self) {
		let local_only = self.markers.local_only_files();
		let mut touched = Vec::new();
		{
			let mut inner = self.lock();
			for (dir, children) in inner.dirs.iter_mut() {
				let before = children.len();
				let had_placeholders = children.iter().any(|n| n.local_only);
				children.retain(|n| !n.local_only);
				merge_placeholders(dir, children, &local_only);
				if had_placeholders || children.len() != before {
					children.sort_by(sibling_order);
					touched.push(dir.clone());
				}
			}
		}
		for dir in touched {
			self.notify(TreeChange::Dir(dir));
		}
	}

	/// Record a node created on the device.
	///
	/// Inserted into the parent's list only if the parent is cached; an uncached
	/// parent is listed on its next access. Ignored paths are never added.
	pub fn add_node(&self, path: &str, is_dir: bool) {
		let parent = paths::device_parent(path);
		let name = paths::device_name(path).to_string();
		let kind = if is_dir { NodeKind::Dir } else { NodeKind::File };
		if self.ignored(path, is_dir) {
			return;
		}
		{
			let mut inner = self.lock();
			let Some(children) = inner.dirs.get_mut(&parent) else {
				return;
			};
			children.retain(|n| n.name != name);
			children.push(RemoteNode::new(kind, name, path));
			children.sort_by(sibling_order);
		}
		self.notify(TreeChange::Dir(parent));
	}

	/// Record a directory the caller just created, so its (empty) child list is known
	pub fn add_created_dir(&self, path: &str) {
		if self.ignored(path, true) {
			return;
		}
		self.add_node(path, true);
		self.reset_dir(path);
	}

	/// Record a deletion; a deleted directory's own entry is dropped too
	pub fn remove_node(&self, path: &str) {
		let parent = paths::device_parent(path);
		let name = paths::device_name(path);
		{
			let mut inner = self.lock();
			if let Some(children) = inner.dirs.get_mut(&parent) {
				children.retain(|n| n.name != name);
			}
			let prefix = format!("{}/", path.trim_end_matches('/'));
			inner.dirs.retain(|dir, _| dir != path && !dir.starts_with(&prefix));
		}
		self.notify(TreeChange::Dir(parent));
	}

	/// Mark `path` as known-empty (after a wipe or a fresh mkdir)
	pub fn reset_dir(&self, path: &str) {
		{
			let mut inner = self.lock();
			let prefix = if path == "/" { "/".to_string() } else { format!("{}/", path) };
			inner.dirs.retain(|dir, _| !dir.starts_with(&prefix));
			inner.dirs.insert(path.to_string(), Vec::new());
			inner.force_next.remove(path);
		}
		self.notify(TreeChange::Dir(path.to_string()));
	}

	/// Drop everything
	pub fn clear(&self) {
		{
			let mut inner = self.lock();
			inner.dirs.clear();
			inner.force_next.clear();
		}
		debug!("remote tree cache cleared");
		self.notify(TreeChange::Cleared);
	}
}

/// Append placeholders for local-only files directly under `dir` that have no listed node
fn merge_placeholders(dir: &str, children: &mut Vec<RemoteNode>, local_only: &[String]) {
	let known: HashSet<String> = children.iter().map(|n| n.name.clone()).collect();
	for local in local_only {
		if paths::device_parent(local) != dir {
			continue;
		}
		let name = paths::device_name(local).to_string();
		if !known.contains(&name) {
			let mut node = RemoteNode::new(NodeKind::File, name, local.clone());
			node.local_only = true;
			children.push(node);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::diff::CrossDiff;
	use std::sync::atomic::{AtomicUsize, Ordering};

	/// Lister with a fixed tree that counts calls
	struct FakeLister {
		tree: HashMap<String, Vec<DirEntry>>,
		calls: AtomicUsize,
	}

	impl FakeLister {
		fn new(tree: &[(&str, &[(&str, bool)])]) -> Self {
			let tree = tree
				.iter()
				.map(|(dir, entries)| {
					let entries = entries
						.iter()
						.map(|(name, is_dir)| DirEntry { name: name.to_string(), is_dir: *is_dir })
						.collect();
					(dir.to_string(), entries)
				})
				.collect();
			Self { tree, calls: AtomicUsize::new(0) }
		}
	}

	#[async_trait]
	impl ChildLister for FakeLister {
		async fn list_children(&self, path: &str) -> Result<Vec<DirEntry>, ExecError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Ok(self.tree.get(path).cloned().unwrap_or_default())
		}
	}

	fn cache_with(lister: Arc<FakeLister>, markers: Arc<DiffMarkers>) -> RemoteTreeCache {
		let rules = IgnoreRuleSet::compile(&["__pycache__/"]).unwrap();
		RemoteTreeCache::new("/", rules, lister, markers)
	}

	fn names(nodes: &[RemoteNode]) -> Vec<&str> {
		nodes.iter().map(|n| n.name.as_str()).collect()
	}

	#[tokio::test]
	async fn test_listing_cached_and_sorted() {
		let lister = Arc::new(FakeLister::new(&[(
			"/",
			&[("main.py", false), ("lib", true), ("__pycache__", true), ("boot.py", false)][..],
		)]));
		let cache = cache_with(lister.clone(), Arc::new(DiffMarkers::new()));

		let children = cache.get_children("/").await.unwrap();
		assert_eq!(names(&children), vec!["lib", "boot.py", "main.py"]);
		assert_eq!(children[0].path, "/lib");

		cache.get_children("/").await.unwrap();
		assert_eq!(lister.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_refresh_is_one_shot() {
		let lister = Arc::new(FakeLister::new(&[("/", &[("a.py", false)][..])]));
		let cache = cache_with(lister.clone(), Arc::new(DiffMarkers::new()));

		cache.get_children("/").await.unwrap();
		cache.request_refresh("/");
		cache.get_children("/").await.unwrap();
		cache.get_children("/").await.unwrap();
		assert_eq!(lister.calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_add_and_remove_nodes() {
		let lister = Arc::new(FakeLister::new(&[("/", &[("a.py", false)][..])]));
		let cache = cache_with(lister.clone(), Arc::new(DiffMarkers::new()));
		let mut changes = cache.subscribe();

		cache.get_children("/").await.unwrap();
		cache.add_created_dir("/lib");
		cache.add_node("/lib/m.py", false);
		cache.add_node("/a.py", false);

		assert_eq!(names(&cache.get_children("/").await.unwrap()), vec!["lib", "a.py"]);
		assert_eq!(names(&cache.get_children("/lib").await.unwrap()), vec!["m.py"]);
		assert_eq!(lister.calls.load(Ordering::SeqCst), 1);
		assert_eq!(changes.recv().await.unwrap(), TreeChange::Dir("/".to_string()));

		cache.remove_node("/lib");
		assert_eq!(names(&cache.get_children("/").await.unwrap()), vec!["a.py"]);
		assert!(!cache.is_cached("/lib"));
	}

	#[tokio::test]
	async fn test_add_under_uncached_parent_keeps_it_unknown() {
		let lister = Arc::new(FakeLister::new(&[("/lib", &[("x.py", false)][..])]));
		let cache = cache_with(lister.clone(), Arc::new(DiffMarkers::new()));

		cache.add_node("/lib/new.py", false);
		assert!(!cache.is_cached("/lib"));
		assert_eq!(names(&cache.get_children("/lib").await.unwrap()), vec!["x.py"]);
	}

	#[tokio::test]
	async fn test_reset_and_clear() {
		let lister = Arc::new(FakeLister::new(&[
			("/", &[("lib", true)][..]),
			("/lib", &[("x.py", false)][..]),
		]));
		let cache = cache_with(lister.clone(), Arc::new(DiffMarkers::new()));
		cache.get_children("/").await.unwrap();
		cache.get_children("/lib").await.unwrap();

		cache.reset_dir("/");
		assert!(cache.get_children("/").await.unwrap().is_empty());
		assert!(!cache.is_cached("/lib"));

		cache.clear();
		assert!(!cache.is_cached("/"));
		cache.get_children("/").await.unwrap();
		assert_eq!(lister.calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn test_local_only_placeholders() {
		let lister = Arc::new(FakeLister::new(&[("/", &[("a.py", false)][..])]));
		let markers = Arc::new(DiffMarkers::new());
		let mut diff = CrossDiff::default();
		diff.local_only.insert("new.py".to_string());
		diff.local_only.insert("lib/deep.py".to_string());
		markers.set(diff, "/");

		let cache = cache_with(lister, markers);
		let children = cache.get_children("/").await.unwrap();
		assert_eq!(names(&children), vec!["a.py", "new.py"]);
		assert!(children[1].local_only);
		assert!(!children[0].local_only);
	}

	#[tokio::test]
	async fn test_placeholders_follow_markers_without_listing() {
		let lister = Arc::new(FakeLister::new(&[("/", &[("a.py", false)][..])]));
		let markers = Arc::new(DiffMarkers::new());
		let cache = cache_with(lister.clone(), markers.clone());
		cache.get_children("/").await.unwrap();

		let mut diff = CrossDiff::default();
		diff.local_only.insert("new.py".to_string());
		markers.set(diff, "/");
		cache.sync_placeholders();
		let children = cache.get_children("/").await.unwrap();
		assert_eq!(names(&children), vec!["a.py", "new.py"]);
		assert!(children[1].local_only);

		markers.clear();
		cache.sync_placeholders();
		assert_eq!(names(&cache.get_children("/").await.unwrap()), vec!["a.py"]);
		assert_eq!(lister.calls.load(Ordering::SeqCst), 1);
	}
}
