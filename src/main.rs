// src/main.rs - Simulated motion controller host
use std::path::PathBuf;

use clap::{ArgAction, Parser};

use cnc_motion::config::{self, MachineConfig};
use cnc_motion::controller::{Controller, ProgramState};
use cnc_motion::host::MotionHost;

#[derive(Parser, Debug)]
#[command(name = "motion-host", version, about = "Run a g-code program through the simulated motion pipeline")]
struct Args {
    /// Machine configuration (TOML). Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// G-code program to run
    program: Option<PathBuf>,

    /// Pace the loop at the DDA frequency instead of running flat out
    #[arg(long)]
    realtime: bool,

    /// Home all axes before the program
    #[arg(long)]
    home: bool,

    /// More output per occurrence (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            config::load_config(path)?
        }
        None => MachineConfig::default(),
    };

    let mut controller = Controller::simulated(&config);
    if args.home {
        controller.request_homing()?;
    }
    if let Some(path) = &args.program {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            tracing::error!("Failed to read program '{}': {}", path.display(), e);
            e
        })?;
        controller.load_program(&text);
    }

    let mut host = MotionHost::new(controller, args.realtime);
    let report = host.run().await;

    if let Some(e) = host.controller().last_error() {
        return Err(format!("{e}").into());
    }
    if report.interrupted {
        println!(
            "Interrupted after {} ticks at X{:.3} Y{:.3} Z{:.3} A{:.3}",
            report.ticks, report.position[0], report.position[1], report.position[2], report.position[3]
        );
    } else if report.program_state == ProgramState::Finished {
        println!(
            "Finished in {} ticks at X{:.3} Y{:.3} Z{:.3} A{:.3}",
            report.ticks, report.position[0], report.position[1], report.position[2], report.position[3]
        );
    }
    Ok(())
}
