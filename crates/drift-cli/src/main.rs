//! Drift CLI - Command-line interface for the Drift particle flow

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{render, run, simulate, FlowArgs};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drift")]
#[command(about = "Self-shadowing curl-noise particle flow", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at info level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a window and run the flow interactively
    Run {
        #[command(flatten)]
        flow: FlowArgs,

        /// Initial window width in pixels
        #[arg(long, default_value = "1280")]
        width: u32,

        /// Initial window height in pixels
        #[arg(long, default_value = "720")]
        height: u32,
    },

    /// Render the flow to a PNG image (headless)
    Render {
        #[command(flatten)]
        flow: FlowArgs,

        /// Output image path
        #[arg(short, long, default_value = "drift.png")]
        output: String,

        /// Image width in pixels
        #[arg(long, default_value = "1920")]
        width: u32,

        /// Image height in pixels
        #[arg(long, default_value = "1080")]
        height: u32,

        /// Frames to run before capturing
        #[arg(long, default_value = "120")]
        frames: u32,

        /// Wall time per frame in seconds
        #[arg(long, default_value = "0.0166667")]
        frame_time: f32,

        /// Camera horizontal angle in degrees
        #[arg(long)]
        azimuth: Option<f32>,

        /// Camera vertical angle in degrees
        #[arg(long)]
        elevation: Option<f32>,
    },

    /// Run the flow on the CPU reference backend and report statistics
    Simulate {
        #[command(flatten)]
        flow: FlowArgs,

        /// Frames to run after the warm-up burst
        #[arg(long, default_value = "60")]
        frames: u32,

        /// Wall time per frame in seconds
        #[arg(long, default_value = "0.0166667")]
        frame_time: f32,

        /// Resolution of the host opacity field
        #[arg(long, default_value = "128")]
        opacity_resolution: u32,

        /// Output format (text or json)
        #[arg(long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            flow,
            width,
            height,
        } => run::run(run::RunArgs {
            flow,
            width,
            height,
        }),
        Commands::Render {
            flow,
            output,
            width,
            height,
            frames,
            frame_time,
            azimuth,
            elevation,
        } => render::run(render::RenderArgs {
            flow,
            output,
            width,
            height,
            frames,
            frame_time,
            azimuth,
            elevation,
        }),
        Commands::Simulate {
            flow,
            frames,
            frame_time,
            opacity_resolution,
            format,
        } => simulate::run(simulate::SimulateArgs {
            flow,
            frames,
            frame_time,
            opacity_resolution,
            format,
        }),
    }
}
