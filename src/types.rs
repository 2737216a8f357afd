use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
	Dir,
	File,
}

/// One entry of the device tree
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RemoteNode {
	pub kind: NodeKind,
	pub name: String,
	/// Absolute path on the device
	pub path: String,
	/// Placeholder for a workspace file the device does not have yet
	#[serde(default)]
	pub local_only: bool,
}

impl RemoteNode {
	pub fn new(kind: NodeKind, name: impl Into<String>, path: impl Into<String>) -> Self {
		Self { kind, name: name.into(), path: path.into(), local_only: false }
	}

	pub fn is_dir(&self) -> bool {
		self.kind == NodeKind::Dir
	}
}

/// Sibling order: directories first, then by name
pub fn sibling_order(a: &RemoteNode, b: &RemoteNode) -> Ordering {
	match (a.kind, b.kind) {
		(NodeKind::Dir, NodeKind::File) => Ordering::Less,
		(NodeKind::File, NodeKind::Dir) => Ordering::Greater,
		_ => a.name.cmp(&b.name),
	}
}

/// Entry returned by `ls_typed`
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
	pub name: String,
	pub is_dir: bool,
}

/// Entry returned by `tree_stats`
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStat {
	pub path: String,
	pub is_dir: bool,
	#[serde(default)]
	pub size: u64,
	#[serde(default)]
	pub mtime: u64,
}

/// Parsed `file_info` answer (`mode|size|dir|ro`)
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FileInfo {
	pub mode: u32,
	pub size: u64,
	pub is_dir: bool,
	pub is_readonly: bool,
}

/// Answer of `wipe_path`
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct WipeResult {
	#[serde(default)]
	pub deleted_count: u64,
	#[serde(default)]
	pub errors: Vec<String>,
}

/// Phase of a sync workflow, reported through progress callbacks
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SyncPhase {
	Scanning,
	Listing,
	Comparing,
	Uploading,
	Downloading,
	Wiping,
}

/// A file that could not be transferred; the batch continued without it
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FileFailure {
	/// Device path of the file
	pub path: String,
	pub kind: crate::error::ErrorKind,
	pub message: String,
}

/// Outcome of a batch transfer
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct BatchReport {
	/// Device paths transferred successfully
	pub transferred: Vec<String>,
	pub failed: Vec<FileFailure>,
	/// Candidates dropped before transfer (ignored, vanished locally or remotely)
	pub skipped: Vec<String>,
	/// Non-fatal problems outside the per-file loop
	pub warnings: Vec<String>,
}

impl BatchReport {
	pub fn attempted(&self) -> usize {
		self.transferred.len() + self.failed.len()
	}

	pub fn is_clean(&self) -> bool {
		self.failed.is_empty()
	}
}
