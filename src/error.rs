//! Error types for board sync operations

use std::error::Error;
use std::fmt;
use std::io;

/// Closed classification of everything that can go wrong on the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// No concrete port was chosen ("auto" or empty)
	PortNotSelected,

	/// Device vanished, returned no data, or the port disappeared
	TransientDisconnect,

	/// Port held by another program or not accessible
	PortBusy,

	/// Collaborator answered with a payload we could not parse
	MalformedResponse,

	/// Local filesystem failure
	LocalIo,

	/// Discrete listing call exceeded its deadline
	Timeout,

	/// Collaborator process was killed by an explicit cancel
	Cancelled,

	/// Queued operation was discarded by a preempting request
	Preempted,

	/// Anything else reported by the collaborator
	Failed,
}

const DISCONNECT_VOCABULARY: &[&str] = &[
	"device disconnected",
	"serial read returned no data",
	"device reports readiness to read",
	"device not configured",
	"serial device not available",
	"no such file or directory",
	"serial port not found",
];

const BUSY_VOCABULARY: &[&str] = &[
	"resource busy",
	"permission denied",
	"port is already open",
	"busy or permission denied",
	"could not open port",
	"could not open serial port",
];

impl ErrorKind {
	/// Map raw collaborator error text to an error kind.
	///
	/// This is the only place where error text is inspected; everything past the
	/// executor boundary switches on the returned kind.
	pub fn classify(text: &str) -> ErrorKind {
		let lower = text.to_lowercase();
		if DISCONNECT_VOCABULARY.iter().any(|needle| lower.contains(needle)) {
			ErrorKind::TransientDisconnect
		} else if BUSY_VOCABULARY.iter().any(|needle| lower.contains(needle)) {
			ErrorKind::PortBusy
		} else {
			ErrorKind::Failed
		}
	}

	/// Whether a failed call of this kind is retried once
	pub fn is_retryable(self) -> bool {
		matches!(self, ErrorKind::TransientDisconnect)
	}

	/// Whether this kind produces a (rate limited) link status notice
	pub fn is_link_status(self) -> bool {
		matches!(self, ErrorKind::TransientDisconnect | ErrorKind::PortBusy)
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ErrorKind::PortNotSelected => "port not selected",
			ErrorKind::TransientDisconnect => "device disconnected",
			ErrorKind::PortBusy => "port busy",
			ErrorKind::MalformedResponse => "malformed response",
			ErrorKind::LocalIo => "local I/O error",
			ErrorKind::Timeout => "timeout",
			ErrorKind::Cancelled => "cancelled",
			ErrorKind::Preempted => "preempted",
			ErrorKind::Failed => "failed",
		};
		f.write_str(name)
	}
}

/// Failure of a single collaborator call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecError {
	pub kind: ErrorKind,
	pub verb: String,
	pub message: String,
}

impl ExecError {
	pub fn new(kind: ErrorKind, verb: impl Into<String>, message: impl Into<String>) -> Self {
		Self { kind, verb: verb.into(), message: message.into() }
	}

	/// Build an error from raw collaborator output, classifying its text
	pub fn from_output(verb: impl Into<String>, message: impl Into<String>) -> Self {
		let message = message.into();
		let message = if message.trim().is_empty() { "tool error".to_string() } else { message };
		Self { kind: ErrorKind::classify(&message), verb: verb.into(), message }
	}

	pub fn port_not_selected(verb: impl Into<String>) -> Self {
		Self::new(ErrorKind::PortNotSelected, verb, "Select a specific serial port first")
	}

	pub fn preempted() -> Self {
		Self::new(ErrorKind::Preempted, "", "operation discarded by a preempting request")
	}
}

impl fmt::Display for ExecError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.verb.is_empty() {
			write!(f, "{}: {}", self.kind, self.message)
		} else {
			write!(f, "{} ({}): {}", self.verb, self.kind, self.message)
		}
	}
}

impl Error for ExecError {}

/// Main error type for sync workflows
#[derive(Debug)]
pub enum SyncError {
	/// Collaborator call failed
	Exec(ExecError),

	/// Local I/O error
	Io(io::Error),

	/// Manifest could not be built, read or written
	Manifest(ManifestError),

	/// Ignore rules could not be compiled
	Exclusion(ExclusionError),

	/// Invalid configuration
	Config(ConfigError),

	/// A diff-then-sync was requested without a prior check
	NoDiffState,

	/// Generic error message
	Other { message: String },
}

impl SyncError {
	/// Error kind for reporting, folding local failures into `LocalIo`
	pub fn kind(&self) -> ErrorKind {
		match self {
			SyncError::Exec(e) => e.kind,
			SyncError::Io(_) | SyncError::Manifest(_) => ErrorKind::LocalIo,
			_ => ErrorKind::Failed,
		}
	}
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Exec(e) => write!(f, "Device call failed: {}", e),
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Manifest(e) => write!(f, "Manifest error: {}", e),
			SyncError::Exclusion(e) => write!(f, "{}", e),
			SyncError::Config(e) => write!(f, "{}", e),
			SyncError::NoDiffState => {
				write!(f, "No differences recorded; run a check before syncing differences")
			}
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {}

impl From<ExecError> for SyncError {
	fn from(e: ExecError) -> Self {
		SyncError::Exec(e)
	}
}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<ManifestError> for SyncError {
	fn from(e: ManifestError) -> Self {
		SyncError::Manifest(e)
	}
}

impl From<ExclusionError> for SyncError {
	fn from(e: ExclusionError) -> Self {
		SyncError::Exclusion(e)
	}
}

impl From<ConfigError> for SyncError {
	fn from(e: ConfigError) -> Self {
		SyncError::Config(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

/// Errors that can occur while compiling ignore rules
#[derive(Debug)]
pub enum ExclusionError {
	/// Failed to parse a glob pattern
	InvalidPattern(String),

	/// Failed to read an ignore file
	IgnoreFileError(String),
}

impl fmt::Display for ExclusionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ExclusionError::InvalidPattern(msg) => write!(f, "Invalid ignore pattern: {}", msg),
			ExclusionError::IgnoreFileError(msg) => write!(f, "Ignore file error: {}", msg),
		}
	}
}

impl Error for ExclusionError {}

/// Manifest persistence and scanning errors
#[derive(Debug)]
pub enum ManifestError {
	/// Root directory could not be read at all
	RootUnreadable { path: String, source: io::Error },

	/// Failed to write the manifest file
	SaveFailed { path: String, source: io::Error },

	/// Failed to serialize the manifest
	Encode(String),
}

impl fmt::Display for ManifestError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ManifestError::RootUnreadable { path, source } => {
				write!(f, "Cannot read workspace root {}: {}", path, source)
			}
			ManifestError::SaveFailed { path, source } => {
				write!(f, "Cannot write manifest {}: {}", path, source)
			}
			ManifestError::Encode(msg) => write!(f, "Cannot encode manifest: {}", msg),
		}
	}
}

impl Error for ManifestError {}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
	/// Config file exists but could not be read
	ReadFailed { path: String, source: io::Error },

	/// Config file could not be parsed
	ParseFailed { path: String, message: String },

	/// A value is out of range or inconsistent
	InvalidValue { field: String, message: String },
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::ReadFailed { path, source } => {
				write!(f, "Cannot read config {}: {}", path, source)
			}
			ConfigError::ParseFailed { path, message } => {
				write!(f, "Invalid config {}: {}", path, message)
			}
			ConfigError::InvalidValue { field, message } => {
				write!(f, "Invalid configuration: {}: {}", field, message)
			}
		}
	}
}

impl Error for ConfigError {}


// vim: ts=4
