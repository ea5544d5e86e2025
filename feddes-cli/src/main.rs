//! FedDES FedCompass simulator binary.
//!
//! Runs the asynchronous group-of-arrival scheduler over a platform file and
//! a JSON configuration:
//!
//! ```bash
//! fed-compass platform.yaml config.json
//! fed-compass platform.yaml '{"num_nodes": 2, ...}'
//! ```

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use feddes_common::config::{self, CompassConfig};
use feddes_common::logging::{init_logging, LogLevel};
use feddes_des::{Platform, Simulation};
use feddes_sim::{run_compass, RunReport};

/// FedDES - FedCompass discrete-event simulator
#[derive(Parser, Debug)]
#[command(name = "fed-compass")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the platform description (YAML)
    platform_file: String,

    /// Simulation configuration: a JSON file path or an inline JSON literal
    config: String,
}

fn main() -> ExitCode {
    init_logging(LogLevel::Info);

    let args = Args::parse();

    // Current-thread runtime with the clock paused: virtual time advances
    // straight to the next pending timer whenever every actor is idle.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to build runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(report) => {
            info!(summary = %report.summary(), "simulation is over");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("fed-compass failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<RunReport> {
    let platform = Platform::from_path(&args.platform_file)
        .with_context(|| format!("failed to load platform {}", args.platform_file))?;
    let cfg: CompassConfig =
        config::load(&args.config).context("failed to load configuration")?;
    cfg.validate().context("invalid configuration")?;

    info!(
        clients = cfg.common.total_clients(),
        epochs = cfg.common.epochs,
        max_local_steps = cfg.max_local_steps,
        "starting fedcompass simulation"
    );

    let sim = Simulation::new(platform);
    let report = run_compass(&sim, &cfg).await?;
    Ok(report)
}
