use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use boardsync::callbacks::{LogStatusCallback, NoCallbacks};
use boardsync::config::Config;
use boardsync::executor::ProcessExecutor;
use boardsync::logging::*;
use boardsync::progress::CliProgressCallback;
use boardsync::session::Coordinator;
use boardsync::sync::{BoardSync, Direction};
use boardsync::types::BatchReport;
use boardsync::utils::setup_signal_handlers;
use boardsync::watch::watch_and_upload;

fn cli() -> Command {
	Command::new("boardsync")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Mirror a workspace onto a serial-attached board")
		.subcommand_required(true)
		.arg(
			Arg::new("workspace")
				.short('C')
				.long("workspace")
				.value_name("DIR")
				.default_value(".")
				.help("Workspace root"),
		)
		.arg(
			Arg::new("verbose")
				.short('v')
				.long("verbose")
				.action(ArgAction::Count)
				.help("More log output (repeat for trace)"),
		)
		.arg(Arg::new("port").short('p').long("port").value_name("PORT").help("Serial port"))
		.arg(Arg::new("root").long("root").value_name("PATH").help("Device root path"))
		.arg(
			Arg::new("baud")
				.long("baud")
				.value_name("N")
				.value_parser(clap::value_parser!(u32))
				.help("Baud rate"),
		)
		.subcommand(Command::new("init").about("Create the workspace state directory"))
		.subcommand(Command::new("push").about("Upload every workspace file"))
		.subcommand(Command::new("pull").about("Download every board file"))
		.subcommand(Command::new("check").about("Compare workspace and board"))
		.subcommand(
			Command::new("sync-diffs")
				.about("Check, then transfer only differing files")
				.arg(Arg::new("to-board").long("to-board").action(ArgAction::SetTrue))
				.arg(Arg::new("to-local").long("to-local").action(ArgAction::SetTrue))
				.group(ArgGroup::new("direction").args(["to-board", "to-local"]).required(true)),
		)
		.subcommand(Command::new("status").about("Local changes since the last push"))
		.subcommand(
			Command::new("ls")
				.about("List a board directory")
				.arg(Arg::new("path").help("Device directory (defaults to the root)")),
		)
		.subcommand(Command::new("devs").about("List serial ports"))
		.subcommand(
			Command::new("wipe").about("Delete everything under the board root").arg(
				Arg::new("yes")
					.long("yes")
					.action(ArgAction::SetTrue)
					.help("Confirm the deletion"),
			),
		)
		.subcommand(
			Command::new("run")
				.about("Run a script on the board")
				.arg(Arg::new("file").required(true)),
		)
		.subcommand(Command::new("reset").about("Soft-reset the board"))
		.subcommand(Command::new("manifest").about("Print a fresh workspace manifest"))
		.subcommand(
			Command::new("upload")
				.about("Upload one workspace file")
				.arg(Arg::new("file").required(true).help("Path relative to the workspace")),
		)
		.subcommand(
			Command::new("download")
				.about("Download one board file into the workspace")
				.arg(Arg::new("path").required(true).help("Device path")),
		)
		.subcommand(
			Command::new("mkdir")
				.about("Create a board directory")
				.arg(Arg::new("path").required(true).help("Device path")),
		)
		.subcommand(
			Command::new("rm")
				.about("Delete a board file or directory")
				.arg(Arg::new("path").required(true).help("Device path"))
				.arg(
					Arg::new("local")
						.long("local")
						.action(ArgAction::SetTrue)
						.help("Delete the workspace copy too"),
				),
		)
		.subcommand(
			Command::new("mv")
				.about("Rename a board file or directory")
				.arg(Arg::new("path").required(true).help("Device path"))
				.arg(Arg::new("name").required(true).help("New name in the same directory")),
		)
		.subcommand(Command::new("watch").about("Upload files as they are saved (autoSyncOnSave)"))
}

fn load_config(matches: &ArgMatches, workspace: &Path) -> Result<Config, Box<dyn Error>> {
	let mut config = Config::load(workspace)?;
	if let Some(port) = matches.get_one::<String>("port") {
		config.port = port.clone();
	}
	if let Some(root) = matches.get_one::<String>("root") {
		config.root_path = root.clone();
	}
	if let Some(baud) = matches.get_one::<u32>("baud") {
		config.baud_rate = *baud;
	}
	config.validate()?;
	Ok(config)
}

fn print_report(action: &str, report: &BatchReport) {
	println!(
		"{}: {} transferred, {} failed, {} skipped",
		action,
		report.transferred.len(),
		report.failed.len(),
		report.skipped.len()
	);
	for warning in &report.warnings {
		println!("  warning: {}", warning);
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = cli().get_matches();
	init_tracing(matches.get_count("verbose"));

	let workspace = PathBuf::from(
		matches.get_one::<String>("workspace").map(|s| s.as_str()).unwrap_or("."),
	);
	// Tool processes run with the workspace as their cwd, so every path handed
	// to them has to be absolute
	let workspace = std::fs::canonicalize(&workspace)
		.map_err(|e| format!("Workspace {}: {}", workspace.display(), e))?;
	let config = load_config(&matches, &workspace)?;

	let executor = Arc::new(ProcessExecutor::from_config(&config)?.with_cwd(&workspace));
	let coordinator =
		Arc::new(Coordinator::from_config(&config, executor, Arc::new(LogStatusCallback)));
	setup_signal_handlers(coordinator.clone());

	let board = BoardSync::new(&workspace, config, coordinator)?;
	let progress = CliProgressCallback::new();

	match matches.subcommand() {
		Some(("init", _)) => {
			if board.ensure_initialized().await? {
				println!("Initialized {}", workspace.display());
			} else {
				println!("Already initialized");
			}
		}
		Some(("push", _)) => {
			let report = board.push_all(&progress).await?;
			progress.finish();
			print_report("push", &report);
		}
		Some(("pull", _)) => {
			let report = board.pull_all(&progress).await?;
			progress.finish();
			print_report("pull", &report);
		}
		Some(("check", _)) => {
			let diff = board.check_diffs(&progress).await?;
			if diff.is_empty() {
				println!("No differences");
			}
			for rel in &diff.changed {
				println!("M {}", rel);
			}
			for rel in &diff.remote_only {
				println!("B {}", rel);
			}
			for rel in &diff.local_only {
				println!("L {}", rel);
			}
		}
		Some(("sync-diffs", sub)) => {
			let direction =
				if sub.get_flag("to-board") { Direction::ToBoard } else { Direction::ToLocal };
			let diff = board.check_diffs(&NoCallbacks).await?;
			if diff.is_empty() {
				println!("No differences");
				return Ok(());
			}
			let report = board.sync_diffs(direction, &progress).await?;
			progress.finish();
			print_report("sync-diffs", &report);
		}
		Some(("status", _)) => {
			let changes = board.local_changes().await?;
			if changes.is_empty() {
				println!("Nothing changed since the last manifest");
			}
			for rel in &changes.changed_or_new {
				println!("M {}", rel);
			}
			for rel in &changes.deleted {
				println!("D {}", rel);
			}
		}
		Some(("ls", sub)) => {
			let root = board.cache().root().to_string();
			let path = sub.get_one::<String>("path").cloned().unwrap_or(root);
			for node in board.cache().get_children(&path).await? {
				let suffix = if node.is_dir() { "/" } else { "" };
				println!("{}{}", node.name, suffix);
			}
		}
		Some(("devs", _)) => {
			for port in board.list_ports().await? {
				println!("{}", port);
			}
		}
		Some(("wipe", sub)) => {
			if !sub.get_flag("yes") {
				return Err(format!(
					"Refusing to delete everything under {} without --yes",
					board.config().root_path
				)
				.into());
			}
			let result = board.wipe_remote(&progress).await?;
			println!("Deleted {} entries", result.deleted_count);
			for error in &result.errors {
				println!("  error: {}", error);
			}
		}
		Some(("run", sub)) => {
			let file = sub.get_one::<String>("file").ok_or("run: file argument required")?;
			let local = workspace.join(file);
			print!("{}", board.run_file(&local).await?);
		}
		Some(("reset", _)) => {
			board.reset().await?;
		}
		Some(("manifest", _)) => {
			let (_, manifest) = board.scan().await?;
			println!("{}", serde_json::to_string_pretty(&manifest)?);
		}
		Some(("upload", sub)) => {
			let file = sub.get_one::<String>("file").ok_or("upload: file argument required")?;
			println!("{}", board.upload_file(file).await?);
		}
		Some(("download", sub)) => {
			let path = sub.get_one::<String>("path").ok_or("download: path argument required")?;
			println!("{}", board.download_file(path).await?.display());
		}
		Some(("mkdir", sub)) => {
			let path = sub.get_one::<String>("path").ok_or("mkdir: path argument required")?;
			board.mkdir(path).await?;
		}
		Some(("rm", sub)) => {
			let path = sub.get_one::<String>("path").ok_or("rm: path argument required")?;
			board.delete(path, sub.get_flag("local")).await?;
		}
		Some(("mv", sub)) => {
			let path = sub.get_one::<String>("path").ok_or("mv: path argument required")?;
			let name = sub.get_one::<String>("name").ok_or("mv: name argument required")?;
			println!("{}", board.rename(path, name).await?);
		}
		Some(("watch", _)) => {
			watch_and_upload(&board).await?;
		}
		_ => {
			error!("Unknown command");
		}
	}

	Ok(())
}

// vim: ts=4
