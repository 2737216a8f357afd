//! Glob-style ignore pattern compilation

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::ExclusionError;

/// A single compiled ignore pattern
///
/// Grammar:
/// - `**` spans any number of path segments, including none
/// - `*` stays within one segment, `?` matches one character
/// - a trailing `/` restricts the pattern to directories
/// - a leading `/` anchors the pattern to the root, otherwise it floats to any depth
#[derive(Debug, Clone)]
pub struct IgnorePattern {
	/// Original pattern string
	pub pattern: String,

	/// Pattern only applies to directories
	pub dir_only: bool,

	/// Pattern must match from the root
	pub anchored: bool,

	glob: GlobSet,
}

impl IgnorePattern {
	/// Compile a pattern string
	pub fn compile(pattern: &str) -> Result<Self, ExclusionError> {
		let trimmed = pattern.trim();
		let anchored = trimmed.starts_with('/');
		let dir_only = trimmed.ends_with('/');
		let core = trimmed.trim_start_matches('/').trim_end_matches('/');

		if core.is_empty() {
			return Err(ExclusionError::InvalidPattern(format!("{:?}: empty pattern", pattern)));
		}

		let mut bodies = vec![core.to_string()];
		if !anchored && !core.starts_with("**/") && core != "**" {
			bodies.push(format!("**/{}", core));
		}

		let mut builder = GlobSetBuilder::new();
		for body in &bodies {
			let glob = GlobBuilder::new(body)
				.literal_separator(true)
				.backslash_escape(true)
				.build()
				.map_err(|e| ExclusionError::InvalidPattern(format!("{}: {}", pattern, e)))?;
			builder.add(glob);
		}
		let glob = builder.build().map_err(|e| {
			ExclusionError::InvalidPattern(format!("Failed to build pattern {}: {}", pattern, e))
		})?;

		Ok(Self { pattern: trimmed.to_string(), dir_only, anchored, glob })
	}

	/// Check a normalized relative path against this pattern alone
	///
	/// Ancestors are not consulted here; see `IgnoreRuleSet::is_ignored`.
	pub fn matches(&self, rel_path: &str, is_dir: bool) -> bool {
		if self.dir_only && !is_dir {
			return false;
		}
		self.glob.is_match(rel_path)
	}
}
