//! Protocol-executor boundary
//!
//! The device protocol is spoken by an external tool invoked once per verb. This module
//! describes those invocations and the trait the session layer drives them through.

mod process;

pub use process::ProcessExecutor;

use async_trait::async_trait;
use std::fmt;

use crate::error::ExecError;

/// Verbs understood by the protocol executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
	LsTyped,
	Mkdir,
	CpFrom,
	CpTo,
	UploadReplacing,
	DeleteAny,
	DeleteFolderRecursive,
	FileExists,
	FileInfo,
	TreeStats,
	WipePath,
	RunFile,
	Reset,
	Devs,
	Mv,
}

impl Verb {
	pub fn as_str(self) -> &'static str {
		match self {
			Verb::LsTyped => "ls_typed",
			Verb::Mkdir => "mkdir",
			Verb::CpFrom => "cp_from",
			Verb::CpTo => "cp_to",
			Verb::UploadReplacing => "upload_replacing",
			Verb::DeleteAny => "delete_any",
			Verb::DeleteFolderRecursive => "delete_folder_recursive",
			Verb::FileExists => "file_exists",
			Verb::FileInfo => "file_info",
			Verb::TreeStats => "tree_stats",
			Verb::WipePath => "wipe_path",
			Verb::RunFile => "run_file",
			Verb::Reset => "reset",
			Verb::Devs => "devs",
			Verb::Mv => "mv",
		}
	}

	/// Every verb except port enumeration needs a concrete port
	pub fn needs_port(self) -> bool {
		!matches!(self, Verb::Devs)
	}

	/// Discrete listing calls run under the short listing deadline
	pub fn is_listing(self) -> bool {
		matches!(self, Verb::LsTyped | Verb::FileExists | Verb::FileInfo | Verb::Devs)
	}
}

impl fmt::Display for Verb {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One call to the protocol executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
	pub verb: Verb,
	/// Resolved port; filled in by the link right before execution
	pub port: Option<String>,
	/// Named arguments in order (`--path`, `--src`, `--dst`)
	pub args: Vec<(&'static str, String)>,
}

impl Invocation {
	pub fn new(verb: Verb) -> Self {
		Self { verb, port: None, args: Vec::new() }
	}

	pub fn arg(mut self, name: &'static str, value: impl Into<String>) -> Self {
		self.args.push((name, value.into()));
		self
	}

	pub fn path(self, path: impl Into<String>) -> Self {
		self.arg("path", path)
	}

	pub fn src(self, src: impl Into<String>) -> Self {
		self.arg("src", src)
	}

	pub fn dst(self, dst: impl Into<String>) -> Self {
		self.arg("dst", dst)
	}

	/// Value of a named argument
	pub fn get(&self, name: &str) -> Option<&str> {
		self.args.iter().find(|(n, _)| *n == name).map(|(_, v)| v.as_str())
	}

	/// Command line tail: `--baud <n> <verb> [--port <p>] [--<name> <value>]...`
	pub fn to_args(&self, baud: u32) -> Vec<String> {
		let mut out = vec!["--baud".to_string(), baud.to_string(), self.verb.as_str().to_string()];
		if let Some(port) = &self.port {
			out.push("--port".to_string());
			out.push(port.clone());
		}
		for (name, value) in &self.args {
			out.push(format!("--{}", name));
			out.push(value.clone());
		}
		out
	}
}

/// Runs invocations against the device.
///
/// Implementations only execute and report; retry, classification policy and
/// serialization live in the session layer.
#[async_trait]
pub trait DeviceExecutor: Send + Sync {
	/// Execute one call and return its standard output
	async fn execute(&self, call: &Invocation) -> Result<String, ExecError>;

	/// Forcibly terminate whatever call is currently running
	fn kill_current(&self);
}
