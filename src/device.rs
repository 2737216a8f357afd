//! Typed verbs over the session link
//!
//! A `Device` is only handed out by the coordinator while an operation owns the port.

use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

use crate::error::{ErrorKind, ExecError};
use crate::executor::{Invocation, Verb};
use crate::logging::*;
use crate::session::Link;
use crate::types::{DirEntry, FileInfo, RemoteStat, WipeResult};

#[derive(Clone)]
pub struct Device {
	link: Arc<Link>,
}

impl Device {
	pub(crate) fn new(link: Arc<Link>) -> Self {
		Self { link }
	}

	pub fn port(&self) -> Option<String> {
		self.link.port()
	}

	/// Raw call; stdout on success
	pub async fn call(&self, call: Invocation) -> Result<String, ExecError> {
		self.link.call(call).await
	}

	/// Children of a device directory; an unparsable answer reads as empty
	pub async fn ls_typed(&self, path: &str) -> Result<Vec<DirEntry>, ExecError> {
		let out = self.call(Invocation::new(Verb::LsTyped).path(path)).await?;
		Ok(parse_list_or_empty(Verb::LsTyped, &out))
	}

	/// Recursive listing with sizes; an unparsable answer reads as empty
	pub async fn tree_stats(&self, root: &str) -> Result<Vec<RemoteStat>, ExecError> {
		let out = self.call(Invocation::new(Verb::TreeStats).path(root)).await?;
		Ok(parse_list_or_empty(Verb::TreeStats, &out))
	}

	pub async fn mkdir(&self, path: &str) -> Result<(), ExecError> {
		self.call(Invocation::new(Verb::Mkdir).path(path)).await.map(drop)
	}

	pub async fn cp_from(&self, device_path: &str, local: &Path) -> Result<(), ExecError> {
		let call =
			Invocation::new(Verb::CpFrom).src(device_path).dst(local.to_string_lossy().into_owned());
		self.call(call).await.map(drop)
	}

	pub async fn cp_to(&self, local: &Path, device_path: &str) -> Result<(), ExecError> {
		let call =
			Invocation::new(Verb::CpTo).src(local.to_string_lossy().into_owned()).dst(device_path);
		self.call(call).await.map(drop)
	}

	/// Upload that replaces whatever is at `device_path`, file or directory
	pub async fn upload_replacing(&self, local: &Path, device_path: &str) -> Result<(), ExecError> {
		let call = Invocation::new(Verb::UploadReplacing)
			.src(local.to_string_lossy().into_owned())
			.dst(device_path);
		self.call(call).await.map(drop)
	}

	pub async fn delete_any(&self, path: &str) -> Result<(), ExecError> {
		self.call(Invocation::new(Verb::DeleteAny).path(path)).await.map(drop)
	}

	pub async fn delete_folder_recursive(&self, path: &str) -> Result<(), ExecError> {
		self.call(Invocation::new(Verb::DeleteFolderRecursive).path(path)).await.map(drop)
	}

	pub async fn mv(&self, from: &str, to: &str) -> Result<(), ExecError> {
		self.call(Invocation::new(Verb::Mv).src(from).dst(to)).await.map(drop)
	}

	/// True only for an explicit "exists" answer; any failure reads as false
	pub async fn file_exists(&self, path: &str) -> bool {
		match self.call(Invocation::new(Verb::FileExists).path(path)).await {
			Ok(out) => out.trim() == "exists",
			Err(e) => {
				debug!("file_exists {} treated as missing: {}", path, e);
				false
			}
		}
	}

	/// Stat a device path; None when the call fails or the answer is unparsable
	pub async fn file_info(&self, path: &str) -> Option<FileInfo> {
		match self.call(Invocation::new(Verb::FileInfo).path(path)).await {
			Ok(out) => parse_file_info(&out),
			Err(e) => {
				debug!("file_info {} failed: {}", path, e);
				None
			}
		}
	}

	/// Delete everything under `root`; a malformed answer is an error
	pub async fn wipe_path(&self, root: &str) -> Result<WipeResult, ExecError> {
		let out = self.call(Invocation::new(Verb::WipePath).path(root)).await?;
		parse_json(Verb::WipePath, &out)
	}

	/// Execute a local script on the device and return its output
	pub async fn run_file(&self, local: &Path) -> Result<String, ExecError> {
		self.call(Invocation::new(Verb::RunFile).src(local.to_string_lossy().into_owned())).await
	}

	/// Best-effort soft reset; silently skipped without a port
	pub async fn reset(&self) {
		if self.port().is_none() {
			return;
		}
		if let Err(e) = self.call(Invocation::new(Verb::Reset)).await {
			debug!("reset failed: {}", e);
		}
	}

	/// Available serial ports, one per output line
	pub async fn devs(&self) -> Result<Vec<String>, ExecError> {
		let out = self.call(Invocation::new(Verb::Devs)).await?;
		Ok(parse_port_lines(&out))
	}
}

fn parse_json<T: DeserializeOwned>(verb: Verb, out: &str) -> Result<T, ExecError> {
	let text = out.trim();
	serde_json::from_str(text).map_err(|e| {
		ExecError::new(ErrorKind::MalformedResponse, verb.as_str(), format!("{}: {:?}", e, text))
	})
}

fn parse_list_or_empty<T: DeserializeOwned>(verb: Verb, out: &str) -> Vec<T> {
	if out.trim().is_empty() {
		return Vec::new();
	}
	match parse_json(verb, out) {
		Ok(list) => list,
		Err(e) => {
			warn!("{}", e);
			Vec::new()
		}
	}
}

fn parse_file_info(out: &str) -> Option<FileInfo> {
	let parts: Vec<&str> = out.trim().split('|').collect();
	if parts.len() < 4 {
		return None;
	}
	Some(FileInfo {
		mode: parts[0].trim().parse().ok()?,
		size: parts[1].trim().parse().ok()?,
		is_dir: parts[2].trim() == "dir",
		is_readonly: parts[3].trim() == "ro",
	})
}

fn parse_port_lines(out: &str) -> Vec<String> {
	out.lines().map(str::trim).filter(|line| !line.is_empty()).map(String::from).collect()
}
