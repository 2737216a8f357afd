//! Projection between absolute device paths and workspace-relative paths

use std::path::{Component, Path, PathBuf};

/// Root path without a trailing slash ("/" stays "/")
pub fn normalize_root(root: &str) -> &str {
	if root == "/" {
		root
	} else {
		let trimmed = root.trim_end_matches('/');
		if trimmed.is_empty() {
			"/"
		} else {
			trimmed
		}
	}
}

/// Map an absolute device path to a POSIX relative path under `root`.
///
/// Paths outside the root fall back to the path without its leading slash.
pub fn to_local_relative(device_path: &str, root: &str) -> String {
	let root = normalize_root(root);
	if root == "/" {
		return device_path.trim_start_matches('/').to_string();
	}
	if device_path == root {
		return String::new();
	}
	match device_path.strip_prefix(root).and_then(|rest| rest.strip_prefix('/')) {
		Some(rest) => rest.to_string(),
		None => device_path.trim_start_matches('/').to_string(),
	}
}

/// True for device paths strictly below `root`
pub fn is_under_root(device_path: &str, root: &str) -> bool {
	let root = normalize_root(root);
	if root == "/" {
		return device_path.len() > 1 && device_path.starts_with('/');
	}
	device_path.strip_prefix(root).is_some_and(|rest| rest.len() > 1 && rest.starts_with('/'))
}

/// Map a POSIX relative path to an absolute device path under `root`
pub fn to_device_path(rel_path: &str, root: &str) -> String {
	let rel = rel_path.trim_start_matches('/');
	let root = normalize_root(root);
	if rel.is_empty() {
		root.to_string()
	} else if root == "/" {
		format!("/{}", rel)
	} else {
		format!("{}/{}", root, rel)
	}
}

/// Local filesystem path of a relative path under the workspace
pub fn to_local_path(workspace: &Path, rel_path: &str) -> PathBuf {
	let mut path = workspace.to_path_buf();
	for segment in rel_path.split('/').filter(|s| !s.is_empty()) {
		path.push(segment);
	}
	path
}

/// Whether a relative path stays inside the directory it is joined onto.
///
/// Rejects empty paths and any `.` or `..` segment.
pub fn is_contained(rel_path: &str) -> bool {
	let mut segments = rel_path.split('/').filter(|s| !s.is_empty()).peekable();
	segments.peek().is_some() && segments.all(|s| s != "." && s != ".." && !s.contains('\\'))
}

/// POSIX path of `local` relative to `workspace`, if it lies inside it
pub fn workspace_relative(workspace: &Path, local: &Path) -> Option<String> {
	let rest = local.strip_prefix(workspace).ok()?;
	let mut segments = Vec::new();
	for component in rest.components() {
		match component {
			Component::Normal(name) => segments.push(name.to_str()?.to_string()),
			_ => return None,
		}
	}
	if segments.is_empty() {
		None
	} else {
		Some(segments.join("/"))
	}
}

/// Parent directory of an absolute device path ("/" for top-level entries)
pub fn device_parent(path: &str) -> String {
	match path.rfind('/') {
		Some(0) | None => "/".to_string(),
		Some(pos) => path[..pos].to_string(),
	}
}

/// Last segment of a device path
pub fn device_name(path: &str) -> &str {
	path.rsplit('/').next().unwrap_or(path)
}

/// Join a child name onto a device directory
pub fn device_join(dir: &str, name: &str) -> String {
	if dir == "/" || dir.is_empty() {
		format!("/{}", name)
	} else {
		format!("{}/{}", dir.trim_end_matches('/'), name)
	}
}

/// All ancestor directories of a device path, nearest first, stopping at `root`
pub fn device_ancestors(path: &str, root: &str) -> Vec<String> {
	let root = normalize_root(root);
	let mut out = Vec::new();
	let mut current = path.to_string();
	while current != "/" && current != root && current.contains('/') {
		current = device_parent(&current);
		out.push(current.clone());
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_relative_under_slash_root() {
		assert_eq!(to_local_relative("/x.py", "/"), "x.py");
		assert_eq!(to_local_relative("/lib/a.py", "/"), "lib/a.py");
	}

	#[test]
	fn test_relative_under_nested_root() {
		assert_eq!(to_local_relative("/app/lib/a.py", "/app"), "lib/a.py");
		assert_eq!(to_local_relative("/app/lib/a.py", "/app/"), "lib/a.py");
		assert_eq!(to_local_relative("/app", "/app"), "");
		assert_eq!(to_local_relative("/other/a.py", "/app"), "other/a.py");
		assert_eq!(to_local_relative("/apple/a.py", "/app"), "apple/a.py");
	}

	#[test]
	fn test_device_path() {
		assert_eq!(to_device_path("x.py", "/"), "/x.py");
		assert_eq!(to_device_path("b/c.py", "/app/"), "/app/b/c.py");
		assert_eq!(to_device_path("", "/app"), "/app");
	}

	#[test]
	fn test_parent_and_name() {
		assert_eq!(device_parent("/x.py"), "/");
		assert_eq!(device_parent("/b/c.py"), "/b");
		assert_eq!(device_parent("x.py"), "/");
		assert_eq!(device_name("/b/c.py"), "c.py");
		assert_eq!(device_join("/", "a"), "/a");
		assert_eq!(device_join("/b", "a"), "/b/a");
	}

	#[test]
	fn test_ancestors() {
		assert_eq!(device_ancestors("/a/b/c.py", "/"), vec!["/a/b", "/a", "/"]);
		assert_eq!(device_ancestors("/app/a/c.py", "/app"), vec!["/app/a", "/app"]);
		assert!(device_ancestors("/", "/").is_empty());
	}

	#[test]
	fn test_containment() {
		assert!(is_contained("lib/a.py"));
		assert!(is_contained("a..b.py"));
		assert!(!is_contained("../etc/passwd"));
		assert!(!is_contained("lib/../../x"));
		assert!(!is_contained("./a.py"));
		assert!(!is_contained(""));
		assert!(!is_contained("/"));
	}

	#[test]
	fn test_workspace_relative() {
		let ws = Path::new("/ws");
		assert_eq!(workspace_relative(ws, &ws.join("lib").join("a.py")).as_deref(), Some("lib/a.py"));
		assert_eq!(workspace_relative(ws, Path::new("/other/a.py")), None);
		assert_eq!(workspace_relative(ws, ws), None);
	}

	#[test]
	fn test_local_path() {
		let p = to_local_path(Path::new("/ws"), "b/c.py");
		assert_eq!(p, Path::new("/ws").join("b").join("c.py"));
	}

	#[test]
	fn test_under_root() {
		assert!(is_under_root("/app/main.py", "/app/"));
		assert!(!is_under_root("/app", "/app"));
		assert!(!is_under_root("/apple/x.py", "/app"));
		assert!(is_under_root("/x.py", "/"));
		assert!(!is_under_root("/", "/"));
	}
}
