//! Ignore file handling: built-in defaults plus the workspace `syncignore`

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::WORKSPACE_DIR;
use crate::error::ExclusionError;
use crate::logging::*;

/// Name of the per-workspace ignore file inside the workspace directory
pub const IGNORE_FILE: &str = "syncignore";

/// Rules that always apply, even without an ignore file
pub fn default_patterns() -> Vec<String> {
	[
		".git/",
		".vscode/",
		"node_modules/",
		"dist/",
		"out/",
		"build/",
		"__pycache__/",
		".DS_Store",
		".boardsync/",
	]
	.iter()
	.map(|s| s.to_string())
	.collect()
}

/// Location of the ignore file for a workspace root
pub fn ignore_file_path(root: &Path) -> PathBuf {
	root.join(WORKSPACE_DIR).join(IGNORE_FILE)
}

/// Parser for ignore files
pub struct IgnoreFileParser;

impl IgnoreFileParser {
	/// Parse a single ignore file and return patterns.
	///
	/// A missing file yields no patterns.
	pub fn parse_file(path: &Path) -> Result<Vec<String>, ExclusionError> {
		match fs::read_to_string(path) {
			Ok(contents) => Ok(Self::parse_contents(&contents)),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
			Err(e) => Err(ExclusionError::IgnoreFileError(format!(
				"Failed to read {}: {}",
				path.display(),
				e
			))),
		}
	}

	/// Parse ignore file contents
	pub fn parse_contents(contents: &str) -> Vec<String> {
		contents
			.lines()
			.filter_map(|line| {
				let line = line.trim();

				// Skip empty lines and comments
				if line.is_empty() || line.starts_with('#') {
					return None;
				}

				Some(line.to_string())
			})
			.collect()
	}
}

/// Default contents written when a workspace has no ignore file yet
pub fn default_ignore_file_contents() -> String {
	let groups: &[(&str, &[&str])] = &[
		("VCS", &[".git/", ".svn/", ".hg/"][..]),
		("IDE/Editor", &[".vscode/", ".idea/", ".vs/"][..]),
		("OS", &[".DS_Store", "Thumbs.db"][..]),
		(
			"Node/JS",
			&["node_modules/", "dist/", "out/", "build/", ".cache/", "coverage/", "*.log"][..],
		),
		("Python", &["__pycache__/", "*.py[cod]", ".venv/", "venv/", ".pytest_cache/"][..]),
	];

	let mut out = String::from(
		"# syncignore: files that are never mirrored to the board.\n\
		 # Paths are relative to the workspace root.\n",
	);
	for (title, patterns) in groups {
		out.push('\n');
		out.push_str(&format!("# {}\n", title));
		for pattern in patterns.iter() {
			out.push_str(pattern);
			out.push('\n');
		}
	}
	out
}

/// Write the default ignore file unless one already exists.
///
/// Returns true if a file was created.
pub fn ensure_ignore_file(root: &Path) -> io::Result<bool> {
	let path = ignore_file_path(root);
	if path.exists() {
		return Ok(false);
	}
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)?;
	}
	fs::write(&path, default_ignore_file_contents())?;
	info!("Created default ignore file {}", path.display());
	Ok(true)
}
