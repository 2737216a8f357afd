//! Shared test fixtures: an in-memory board behind the executor trait

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use boardsync::callbacks::{CallbackBuilder, LinkNotice, NoStatusCallback, StatusCallback};
use boardsync::config::Config;
use boardsync::error::{ErrorKind, ExecError};
use boardsync::executor::{DeviceExecutor, Invocation, Verb};
use boardsync::session::Coordinator;
use boardsync::sync::BoardSync;

pub const TEST_PORT: &str = "/dev/ttyTEST";

/// Failure to inject into the next matching call
struct Injected {
	verb: Verb,
	target: Option<String>,
	message: String,
}

#[derive(Default)]
struct BoardFs {
	dirs: BTreeSet<String>,
	files: BTreeMap<String, Vec<u8>>,
}

fn parent_of(path: &str) -> String {
	match path.rfind('/') {
		Some(0) | None => "/".to_string(),
		Some(pos) => path[..pos].to_string(),
	}
}

fn name_of(path: &str) -> &str {
	path.rsplit('/').next().unwrap_or(path)
}

fn is_under(path: &str, root: &str) -> bool {
	if root == "/" {
		path != "/"
	} else {
		path.starts_with(&format!("{}/", root))
	}
}

/// Scripted board: a small in-memory filesystem that answers the tool verbs,
/// records every call and tracks how many calls overlap.
pub struct ScriptedBoard {
	fs: Mutex<BoardFs>,
	calls: Mutex<Vec<Invocation>>,
	failures: Mutex<VecDeque<Injected>>,
	in_flight: AtomicUsize,
	max_in_flight: AtomicUsize,
	delay: Mutex<Duration>,
	malformed_wipe: Mutex<bool>,
}

impl ScriptedBoard {
	pub fn new() -> Arc<Self> {
		let mut fs = BoardFs::default();
		fs.dirs.insert("/".to_string());
		Arc::new(Self {
			fs: Mutex::new(fs),
			calls: Mutex::new(Vec::new()),
			failures: Mutex::new(VecDeque::new()),
			in_flight: AtomicUsize::new(0),
			max_in_flight: AtomicUsize::new(0),
			delay: Mutex::new(Duration::ZERO),
			malformed_wipe: Mutex::new(false),
		})
	}

	/// Put a file (and its parent directories) on the board
	pub fn put_file(&self, path: &str, content: &[u8]) {
		let mut state = self.fs.lock().unwrap();
		let mut dir = parent_of(path);
		while dir != "/" {
			state.dirs.insert(dir.clone());
			dir = parent_of(&dir);
		}
		state.files.insert(path.to_string(), content.to_vec());
	}

	/// Delete a file behind the sync engine's back
	pub fn remove_file(&self, path: &str) {
		self.fs.lock().unwrap().files.remove(path);
	}

	pub fn file(&self, path: &str) -> Option<Vec<u8>> {
		self.fs.lock().unwrap().files.get(path).cloned()
	}

	pub fn has_dir(&self, path: &str) -> bool {
		self.fs.lock().unwrap().dirs.contains(path)
	}

	/// Every call answers only after this delay
	pub fn set_delay(&self, delay: Duration) {
		*self.delay.lock().unwrap() = delay;
	}

	pub fn set_malformed_wipe(&self, malformed: bool) {
		*self.malformed_wipe.lock().unwrap() = malformed;
	}

	/// Fail the next call of `verb` (optionally only for `target`) with `message`
	pub fn fail_next(&self, verb: Verb, target: Option<&str>, message: &str) {
		self.failures.lock().unwrap().push_back(Injected {
			verb,
			target: target.map(String::from),
			message: message.to_string(),
		});
	}

	pub fn calls(&self) -> Vec<Invocation> {
		self.calls.lock().unwrap().clone()
	}

	pub fn calls_of(&self, verb: Verb) -> Vec<Invocation> {
		self.calls().into_iter().filter(|c| c.verb == verb).collect()
	}

	pub fn count(&self, verb: Verb) -> usize {
		self.calls_of(verb).len()
	}

	pub fn max_in_flight(&self) -> usize {
		self.max_in_flight.load(Ordering::SeqCst)
	}

	fn take_failure(&self, call: &Invocation) -> Option<String> {
		let mut failures = self.failures.lock().unwrap();
		let target = call.get("dst").or_else(|| call.get("path"));
		let pos = failures.iter().position(|f| {
			f.verb == call.verb && (f.target.is_none() || f.target.as_deref() == target)
		})?;
		failures.remove(pos).map(|f| f.message)
	}

	fn answer(&self, call: &Invocation) -> Result<String, String> {
		let arg = |name: &str| call.get(name).unwrap_or("").to_string();
		let mut state = self.fs.lock().unwrap();

		match call.verb {
			Verb::LsTyped => {
				let dir = arg("path");
				let mut entries = Vec::new();
				for d in state.dirs.iter().filter(|d| *d != "/" && parent_of(d) == dir) {
					entries.push(serde_json::json!({"name": name_of(d), "isDir": true}));
				}
				for f in state.files.keys().filter(|f| parent_of(f) == dir) {
					entries.push(serde_json::json!({"name": name_of(f), "isDir": false}));
				}
				Ok(serde_json::Value::Array(entries).to_string())
			}
			Verb::TreeStats => {
				let root = arg("path");
				let mut entries = Vec::new();
				for d in state.dirs.iter().filter(|d| is_under(d, &root)) {
					entries.push(serde_json::json!({"path": d, "isDir": true, "size": 0, "mtime": 0}));
				}
				for (f, data) in state.files.iter().filter(|(f, _)| is_under(f, &root)) {
					entries.push(
						serde_json::json!({"path": f, "isDir": false, "size": data.len(), "mtime": 0}),
					);
				}
				Ok(serde_json::Value::Array(entries).to_string())
			}
			Verb::Mkdir => {
				let path = arg("path");
				if state.dirs.contains(&path) || state.files.contains_key(&path) {
					return Err("OSError: [Errno 17] EEXIST".to_string());
				}
				if !state.dirs.contains(&parent_of(&path)) {
					return Err("OSError: [Errno 2] ENOENT".to_string());
				}
				state.dirs.insert(path);
				Ok(String::new())
			}
			Verb::UploadReplacing | Verb::CpTo => {
				let (src, dst) = (arg("src"), arg("dst"));
				if !state.dirs.contains(&parent_of(&dst)) {
					return Err("OSError: [Errno 2] ENOENT".to_string());
				}
				let data = fs::read(&src).map_err(|e| format!("local read failed: {}", e))?;
				state.dirs.remove(&dst);
				state.files.insert(dst, data);
				Ok(String::new())
			}
			Verb::CpFrom => {
				let (src, dst) = (arg("src"), arg("dst"));
				let data =
					state.files.get(&src).cloned().ok_or_else(|| "OSError: [Errno 2] ENOENT".to_string())?;
				fs::write(&dst, data).map_err(|e| format!("local write failed: {}", e))?;
				Ok(String::new())
			}
			Verb::WipePath => {
				if *self.malformed_wipe.lock().unwrap() {
					return Ok("Traceback (most recent call last)".to_string());
				}
				let root = arg("path");
				let before = state.dirs.len() + state.files.len();
				state.files.retain(|f, _| !is_under(f, &root));
				state.dirs.retain(|d| !is_under(d, &root));
				let deleted = before - state.dirs.len() - state.files.len();
				Ok(serde_json::json!({"deleted_count": deleted, "errors": []}).to_string())
			}
			Verb::DeleteAny | Verb::DeleteFolderRecursive => {
				let path = arg("path");
				state.files.retain(|f, _| f != &path && !is_under(f, &path));
				state.dirs.retain(|d| d != &path && !is_under(d, &path));
				Ok(String::new())
			}
			Verb::FileExists => {
				let path = arg("path");
				let exists = state.files.contains_key(&path) || state.dirs.contains(&path);
				Ok(if exists { "exists\n" } else { "missing\n" }.to_string())
			}
			Verb::FileInfo => {
				let path = arg("path");
				if state.dirs.contains(&path) {
					Ok("16384|0|dir|rw\n".to_string())
				} else if let Some(data) = state.files.get(&path) {
					Ok(format!("32768|{}|file|rw\n", data.len()))
				} else {
					Err("OSError: [Errno 2] ENOENT".to_string())
				}
			}
			Verb::Mv => {
				let (src, dst) = (arg("src"), arg("dst"));
				if state.dirs.contains(&src) {
					let moved = |p: &str| format!("{}{}", dst, &p[src.len()..]);
					let dirs: Vec<String> =
						state.dirs.iter().filter(|d| **d == src || is_under(d, &src)).cloned().collect();
					for d in dirs {
						state.dirs.remove(&d);
						state.dirs.insert(moved(&d));
					}
					let files: Vec<String> = state.files.keys().filter(|f| is_under(f, &src)).cloned().collect();
					for f in files {
						if let Some(data) = state.files.remove(&f) {
							state.files.insert(moved(&f), data);
						}
					}
					return Ok(String::new());
				}
				let data = state.files.remove(&src).ok_or_else(|| "OSError: [Errno 2] ENOENT".to_string())?;
				state.files.insert(dst, data);
				Ok(String::new())
			}
			Verb::RunFile => Ok(format!("ran {}\n", name_of(&arg("src")))),
			Verb::Reset => Ok(String::new()),
			Verb::Devs => Ok(format!("{}\n", TEST_PORT)),
		}
	}
}

#[async_trait]
impl DeviceExecutor for ScriptedBoard {
	async fn execute(&self, call: &Invocation) -> Result<String, ExecError> {
		let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_in_flight.fetch_max(now, Ordering::SeqCst);
		self.calls.lock().unwrap().push(call.clone());

		let delay = *self.delay.lock().unwrap();
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}

		let result = match self.take_failure(call) {
			Some(message) => Err(message),
			None => self.answer(call),
		};
		self.in_flight.fetch_sub(1, Ordering::SeqCst);
		result.map_err(|message| ExecError::from_output(call.verb.as_str(), message))
	}

	fn kill_current(&self) {}
}

/// Config with a concrete port and short session delays
pub fn test_config() -> Config {
	Config {
		port: TEST_PORT.to_string(),
		pre_list_delay_ms: 0,
		retry_delay_ms: 10,
		settle_after_detach_ms: 1,
		list_timeout_ms: 2_000,
		..Config::default()
	}
}

pub fn coordinator_with(
	board: &Arc<ScriptedBoard>,
	config: &Config,
	status: Arc<dyn StatusCallback>,
) -> Arc<Coordinator> {
	Arc::new(Coordinator::from_config(config, board.clone(), status))
}

pub fn coordinator(board: &Arc<ScriptedBoard>) -> Arc<Coordinator> {
	coordinator_with(board, &test_config(), Arc::new(NoStatusCallback))
}

/// Status callback collecting notices
pub fn notice_sink() -> (Arc<dyn StatusCallback>, Arc<Mutex<Vec<LinkNotice>>>) {
	let notices = Arc::new(Mutex::new(Vec::new()));
	let sink = notices.clone();
	let callbacks =
		CallbackBuilder::new().on_notice(move |n| sink.lock().unwrap().push(n.clone())).build();
	(Arc::new(callbacks), notices)
}

pub fn board_sync(workspace: &Path, board: &Arc<ScriptedBoard>) -> BoardSync {
	board_sync_with(workspace, board, test_config())
}

pub fn board_sync_with(workspace: &Path, board: &Arc<ScriptedBoard>, config: Config) -> BoardSync {
	let coordinator = coordinator_with(board, &config, Arc::new(NoStatusCallback));
	BoardSync::new(workspace, config, coordinator).unwrap()
}

pub fn create_file(dir: &Path, name: &str, content: &[u8]) {
	let path = dir.join(name);
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).unwrap();
	}
	fs::write(&path, content).unwrap();
}

pub fn kind_of(err: &ExecError) -> ErrorKind {
	err.kind
}
