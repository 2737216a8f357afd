//! Configuration for board sync
//!
//! The configuration follows a priority chain:
//! 1. Built-in defaults (`Config::default()`)
//! 2. Workspace file (`<root>/.boardsync/config.toml` or `config.json`)
//! 3. Environment variables (`BOARDSYNC_*` prefix)
//! 4. CLI flags (highest priority, applied by the caller)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use crate::error::ConfigError;
use crate::logging::*;

/// Per-workspace state directory under the local root
pub const WORKSPACE_DIR: &str = ".boardsync";

/// Manifest file name inside the workspace directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Port value meaning "no concrete port chosen"
pub const AUTO_PORT: &str = "auto";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	// ========================================================================
	// LINK
	// ========================================================================
	/// Serial port identifier, or "auto" when none has been chosen
	pub port: String,

	/// Baud rate passed to every collaborator call
	pub baud_rate: u32,

	/// Program and leading arguments of the protocol executor
	pub tool_command: Vec<String>,

	/// Program and leading arguments of the interactive monitor
	pub monitor_command: Vec<String>,

	// ========================================================================
	// SYNC
	// ========================================================================
	/// Absolute directory on the device that mirrors the workspace root
	pub root_path: String,

	/// Upload a file whenever it is saved (`upload_saved`, `boardsync watch`)
	pub auto_sync_on_save: bool,

	// ========================================================================
	// SESSION TIMING
	// ========================================================================
	/// Detach the monitor around link operations
	pub auto_suspend: bool,

	/// Settle delay before a listing issued by the tree view
	pub pre_list_delay_ms: u64,

	/// Delay before the single retry of a disconnect-classified failure
	pub retry_delay_ms: u64,

	/// Minimum spacing between busy/disconnect notices
	pub notice_cooldown_ms: u64,

	/// Deadline for discrete listing calls
	pub list_timeout_ms: u64,

	/// Settle delay after the monitor released the port
	pub settle_after_detach_ms: u64,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			port: AUTO_PORT.to_string(),
			baud_rate: 115200,
			tool_command: vec!["python3".to_string(), "pyserial_tool.py".to_string()],
			monitor_command: vec![
				"python3".to_string(),
				"-m".to_string(),
				"serial.tools.miniterm".to_string(),
			],
			root_path: "/".to_string(),
			auto_sync_on_save: false,
			auto_suspend: true,
			pre_list_delay_ms: 150,
			retry_delay_ms: 300,
			notice_cooldown_ms: 6000,
			list_timeout_ms: 10_000,
			settle_after_detach_ms: 400,
		}
	}
}

impl Config {
	/// Load configuration for a workspace: defaults, then the workspace file, then env
	pub fn load(workspace: &Path) -> Result<Self, ConfigError> {
		let mut config = Self::from_workspace_file(workspace)?;
		config.apply_env_overrides(|key| env::var(key).ok())?;
		config.validate()?;
		Ok(config)
	}

	/// Read `<workspace>/.boardsync/config.toml` or `config.json`, falling back to defaults
	pub fn from_workspace_file(workspace: &Path) -> Result<Self, ConfigError> {
		let dir = workspace.join(WORKSPACE_DIR);
		let toml_path = dir.join("config.toml");
		let json_path = dir.join("config.json");

		if toml_path.exists() {
			let text = read_config(&toml_path)?;
			debug!("Loading config from {}", toml_path.display());
			return toml::from_str(&text).map_err(|e| ConfigError::ParseFailed {
				path: toml_path.display().to_string(),
				message: e.to_string(),
			});
		}

		if json_path.exists() {
			let text = read_config(&json_path)?;
			debug!("Loading config from {}", json_path.display());
			return json5::from_str(&text).map_err(|e| ConfigError::ParseFailed {
				path: json_path.display().to_string(),
				message: e.to_string(),
			});
		}

		Ok(Self::default())
	}

	/// Apply `BOARDSYNC_*` overrides through an injectable lookup
	pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(port) = lookup("BOARDSYNC_PORT") {
			self.port = port;
		}
		if let Some(root) = lookup("BOARDSYNC_ROOT") {
			self.root_path = root;
		}
		if let Some(baud) = lookup("BOARDSYNC_BAUD") {
			self.baud_rate = baud.trim().parse().map_err(|_| ConfigError::InvalidValue {
				field: "BOARDSYNC_BAUD".to_string(),
				message: format!("not a number: {}", baud),
			})?;
		}
		if let Some(tool) = lookup("BOARDSYNC_TOOL") {
			self.tool_command = tool.split_whitespace().map(String::from).collect();
		}
		Ok(())
	}

	/// Reject values the session cannot work with
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.tool_command.is_empty() {
			return Err(ConfigError::InvalidValue {
				field: "toolCommand".to_string(),
				message: "must name a program".to_string(),
			});
		}
		if !self.root_path.starts_with('/') {
			return Err(ConfigError::InvalidValue {
				field: "rootPath".to_string(),
				message: format!("must be absolute on the device: {}", self.root_path),
			});
		}
		if self.baud_rate == 0 {
			return Err(ConfigError::InvalidValue {
				field: "baudRate".to_string(),
				message: "must be positive".to_string(),
			});
		}
		Ok(())
	}

	/// Port with any `serial://` prefix removed, or None while unresolved
	pub fn resolved_port(&self) -> Option<String> {
		let port = normalize_port(&self.port);
		if port.is_empty() || port == AUTO_PORT {
			None
		} else {
			Some(port)
		}
	}

	/// Local manifest location for a workspace
	pub fn manifest_path(workspace: &Path) -> PathBuf {
		workspace.join(WORKSPACE_DIR).join(MANIFEST_FILE)
	}

	/// Where the manifest copy lives on the device
	pub fn device_manifest_path(&self) -> String {
		let root = self.root_path.trim_end_matches('/');
		format!("{}/{}/{}", root, WORKSPACE_DIR, MANIFEST_FILE)
	}

	pub fn retry_delay(&self) -> Duration {
		Duration::from_millis(self.retry_delay_ms)
	}

	pub fn notice_cooldown(&self) -> Duration {
		Duration::from_millis(self.notice_cooldown_ms)
	}

	pub fn list_timeout(&self) -> Duration {
		Duration::from_millis(self.list_timeout_ms)
	}

	pub fn pre_list_delay(&self) -> Duration {
		Duration::from_millis(self.pre_list_delay_ms)
	}

	pub fn settle_after_detach(&self) -> Duration {
		Duration::from_millis(self.settle_after_detach_ms)
	}
}

/// Strip `serial://` and `serial:/` prefixes
pub fn normalize_port(port: &str) -> String {
	let port = port.trim();
	if let Some(rest) = port.strip_prefix("serial://") {
		rest.to_string()
	} else if let Some(rest) = port.strip_prefix("serial:/") {
		rest.to_string()
	} else {
		port.to_string()
	}
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
	fs::read_to_string(path)
		.map_err(|e| ConfigError::ReadFailed { path: path.display().to_string(), source: e })
}
