//! # boardsync - mirror a workspace onto a serial-attached board
//!
//! The board is reached through an external protocol tool, one process per call.
//! A session coordinator serializes those calls, hands the port back and forth
//! with an interactive monitor, and retries transient disconnects once.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use boardsync::callbacks::{LogStatusCallback, NoCallbacks};
//! use boardsync::config::Config;
//! use boardsync::executor::ProcessExecutor;
//! use boardsync::session::Coordinator;
//! use boardsync::sync::BoardSync;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workspace = std::path::Path::new(".");
//!     let config = Config::load(workspace)?;
//!     let executor = Arc::new(ProcessExecutor::from_config(&config)?);
//!     let coordinator = Arc::new(Coordinator::from_config(&config, executor, Arc::new(LogStatusCallback)));
//!     let board = BoardSync::new(workspace, config, coordinator)?;
//!     let report = board.push_all(&NoCallbacks).await?;
//!     println!("Uploaded {} files", report.transferred.len());
//!     Ok(())
//! }
//! ```

pub mod callbacks;
pub mod config;
pub mod device;
pub mod diff;
pub mod error;
pub mod exclusion;
pub mod executor;
pub mod logging;
pub mod manifest;
pub mod paths;
pub mod progress;
pub mod session;
pub mod sync;
pub mod tree_cache;
pub mod types;
pub mod utils;
pub mod watch;

// Re-export commonly used types and functions
pub use config::Config;
pub use error::{ErrorKind, ExecError, SyncError};
pub use session::{Coordinator, RunOptions};
pub use sync::{BoardSync, Direction};

// vim: ts=4
