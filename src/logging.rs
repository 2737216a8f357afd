//! Tracing prelude
//!
//! ```ignore
//! use crate::logging::*;
//!
//! info!("Uploading {} files", total);
//! debug!("ls_typed {} -> {} entries", path, entries.len());
//! ```

pub use tracing::{debug, error, info, warn};

/// Default filter for a `-v` count: none is `info`, one is `debug`, more is `trace`
pub fn default_filter(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "info",
		1 => "debug",
		_ => "trace",
	}
}

/// Install the stderr subscriber.
///
/// `RUST_LOG` wins over the verbosity flag, e.g.
/// `RUST_LOG=boardsync::session=debug boardsync check`.
pub fn init_tracing(verbosity: u8) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter(verbosity)));
	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
