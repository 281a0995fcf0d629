#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter that drives the danmaku engine through a headless soak run.

mod settings;
mod soak;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use danmaku_core::KernelMode;
use danmaku_world::World;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for a soak run.
#[derive(Debug, Parser)]
#[command(
    name = "danmaku-cli",
    about = "Headless soak driver for the danmaku simulation engine",
    version
)]
struct Args {
    /// JSON file holding engine configuration; missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Simulated playback length in seconds.
    #[arg(long, default_value_t = 30)]
    seconds: u64,

    /// Frame rate of the simulated driver.
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Mean comment arrivals per second.
    #[arg(long, default_value_t = 40.0)]
    arrivals: f64,

    /// Seed for comment arrivals and pointer activity.
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Chance per frame that a pointer drag starts.
    #[arg(long, default_value_t = 0.02)]
    drag_chance: f64,

    /// Issue a seek reset every N seconds of playback.
    #[arg(long)]
    seek_every: Option<u64>,

    /// Run physics on the background worker thread.
    #[arg(long)]
    worker: bool,

    /// Position kernel: auto, scalar or wide.
    #[arg(long)]
    kernel: Option<KernelMode>,

    /// Viewport width in pixels.
    #[arg(long)]
    width: Option<f64>,

    /// Viewport height in pixels.
    #[arg(long)]
    height: Option<f64>,

    /// Playback rate applied before the run starts.
    #[arg(long)]
    playback_rate: Option<f64>,

    /// Log frame statistics every N milliseconds of simulated time.
    #[arg(long)]
    perf_window_ms: Option<u64>,

    /// Print the final report as JSON.
    #[arg(long)]
    json: bool,
}

/// Entry point for the danmaku command-line interface.
fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let mut config = settings::load(args.config.as_deref())?;
    settings::apply_overrides(&mut config, &args);

    let mut world = World::new(config).context("failed to start the danmaku engine")?;
    let plan = soak::SoakPlan::from_args(&args);
    let report = soak::run(&mut world, &plan)?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to encode report")?
        );
    } else {
        print!("{report}");
    }
    Ok(())
}
