//! Ignore rules
//!
//! Compiles glob-style patterns into a `(relPath, isDir) -> bool` predicate shared by
//! the manifest walk, the cross diff and the remote tree listing.

mod ignore;
mod patterns;

pub use self::ignore::{
	default_ignore_file_contents, default_patterns, ensure_ignore_file, ignore_file_path,
	IgnoreFileParser, IGNORE_FILE,
};
pub use patterns::IgnorePattern;

use std::path::Path;

use crate::error::ExclusionError;
use crate::logging::*;

/// Ordered list of compiled ignore patterns.
///
/// A path is ignored when any pattern accepts the path itself or one of its ancestor
/// directories, so evaluation order has no effect on the result.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRuleSet {
	rules: Vec<IgnorePattern>,
}

impl IgnoreRuleSet {
	/// Compile a list of patterns
	pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ExclusionError> {
		let rules = patterns
			.iter()
			.map(|p| IgnorePattern::compile(p.as_ref()))
			.collect::<Result<Vec<_>, _>>()?;
		Ok(Self { rules })
	}

	/// Built-in defaults plus the workspace ignore file, if any
	pub fn load(root: &Path) -> Result<Self, ExclusionError> {
		let mut patterns = default_patterns();
		let extra = IgnoreFileParser::parse_file(&ignore_file_path(root))?;
		debug!("Loaded {} ignore patterns from workspace", extra.len());
		patterns.extend(extra);
		Self::compile(&patterns)
	}

	/// Number of compiled patterns
	pub fn len(&self) -> usize {
		self.rules.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rules.is_empty()
	}

	/// Check whether a relative path is ignored.
	///
	/// Backslashes are treated as separators and leading `./` or `/` is dropped, so the
	/// result does not depend on how the caller spelled the path.
	pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
		let normalized = normalize_rel(rel_path);
		if normalized.is_empty() || self.rules.is_empty() {
			return false;
		}

		if self.rules.iter().any(|r| r.matches(&normalized, is_dir)) {
			return true;
		}

		// Anything beneath an ignored directory is ignored too
		let mut end = normalized.len();
		while let Some(pos) = normalized[..end].rfind('/') {
			let ancestor = &normalized[..pos];
			if self.rules.iter().any(|r| r.matches(ancestor, true)) {
				return true;
			}
			end = pos;
		}

		false
	}

	/// Borrow the rule set as a plain predicate
	pub fn matcher(&self) -> impl Fn(&str, bool) -> bool + '_ {
		move |rel, is_dir| self.is_ignored(rel, is_dir)
	}
}

fn normalize_rel(path: &str) -> String {
	let unified = path.replace('\\', "/");
	let mut rel = unified.as_str();
	while let Some(rest) = rel.strip_prefix("./") {
		rel = rest;
	}
	rel.trim_start_matches('/').trim_end_matches('/').to_string()
}
