//! Tessera simulator.
//!
//! Runs every subsystem for a number of frames against the simulated runtime
//! and prints what each feature reported. Useful for watching the lifecycle
//! logs with `RUST_LOG=debug`.

mod scenario;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tessera_config::Config;
use tracing::info;

use crate::scenario::{Scenario, ScenarioOptions};

/// Simulator command line arguments.
#[derive(Parser, Debug)]
#[command(name = "tessera-sim")]
#[command(about = "Drive tessera subsystems through a scripted XR session")]
struct Args {
	/// TOML configuration file
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Number of frames to run
	#[arg(short, long, default_value_t = 120)]
	frames: u32,

	/// Lose the session at this frame and start a new one shortly after
	#[arg(long, value_name = "FRAME")]
	lose_at: Option<u32>,

	/// Milliseconds to sleep after each frame
	#[arg(long, default_value_t = 0)]
	frame_delay_ms: u64,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	let config = match &args.config {
		Some(path) => Config::load(path)?,
		None => Config::default(),
	};
	info!(frames = args.frames, lose_at = ?args.lose_at, "starting tessera-sim");

	let options = ScenarioOptions {
		frames: args.frames,
		lose_at: args.lose_at,
		frame_delay: Duration::from_millis(args.frame_delay_ms),
	};
	let summary = Scenario::new(&config).run(&options);

	println!("sessions: {}", summary.sessions);
	for (feature, tally) in &summary.tallies {
		println!(
			"{:<18} added {:>3}  updated {:>4}  removed {:>3}  unavailable {:>3}",
			feature.as_str(),
			tally.added, tally.updated, tally.removed, tally.unavailable
		);
	}
	println!("layer events: {}", summary.layer_events);
	println!("anchors saved {} loaded {} failed {}", summary.saved, summary.loaded, summary.persist_failures.len());
	println!("store: {:?}", summary.persisted);
	for worker in &summary.workers {
		println!(
			"worker {} ({}): starts {} processed {} last exit {}",
			worker.name,
			worker.class.as_str(),
			worker.starts,
			worker.processed,
			worker.last_exit.as_deref().unwrap_or("-")
		);
	}

	Ok(())
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::prelude::*;

	// TESSERA_LOG_DIR sends logs to a file instead of stderr
	if let Some(log_dir) = std::env::var("TESSERA_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let log_path = log_dir.join(format!("tessera-sim.{}.log", std::process::id()));
		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
				if verbose {
					EnvFilter::new("tessera=trace,debug")
				} else {
					EnvFilter::new("tessera=debug,info")
				}
			});
			let file_layer = tracing_subscriber::fmt::layer().with_writer(file).with_ansi(false).with_target(true);
			tracing_subscriber::registry().with(filter).with(file_layer).init();
			tracing::info!(path = ?log_path, "sim tracing initialized");
			return;
		}
	}

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
