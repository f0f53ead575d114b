//! `robodhs` – DCSS hardware server for the sample-mounting robot
//!
//! Connects to DCSS as a hardware server, translates its robot operations
//! into calls against the robot-control service and relays robot state back.
//!
//! Exit codes: `0` clean shutdown, `2` configuration error, `3` fatal runtime
//! error.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use robodhs_middleware::{Backoff, RobotAdapter, SimRobotAdapter, WsRobotClient};
use robodhs_runtime::{Bridge, init_tracing};
use robodhs_types::BridgeError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigError};

const EXIT_CONFIG: u8 = 2;
const EXIT_FATAL: u8 = 3;

/// Delay after which the simulated robot completes each operation.
const SIMULATED_OPERATION_TIME: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "robodhs", version, about = "DCSS hardware server for the sample-mounting robot")]
struct Args {
    /// DCSS host, optionally with port (`host[:port]`).
    #[arg(long)]
    dcss: Option<String>,

    /// Configuration file (default `~/.robodhs/config.toml`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// WebSocket URL of the robot-control service.
    #[arg(long)]
    robot_url: Option<String>,

    /// Hardware-server name announced to DCSS.
    #[arg(long)]
    hardware_name: Option<String>,

    /// Use an in-memory robot that completes every operation.
    #[arg(long)]
    simulate: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _guard = init_tracing("robodhs");

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration rejected");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    info!(?config, simulate = args.simulate, "configuration loaded");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("termination signal received");
        on_signal.cancel();
    }) {
        warn!(error = %e, "failed to install signal handler; graceful shutdown unavailable");
    }

    match runtime.block_on(serve(config, args.simulate, shutdown)) {
        Ok(()) => {
            info!("robodhs stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "robodhs stopped on fatal error");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn resolve_config(args: &Args) -> Result<Config, ConfigError> {
    let mut config = config::load(args.config.as_deref())?;
    if let Some(dcss) = &args.dcss {
        config.set_dcss(dcss)?;
    }
    if let Some(url) = &args.robot_url {
        config.robot_url = url.clone();
    }
    if let Some(name) = &args.hardware_name {
        config.hardware_name = name.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Bring the robot link up, run the bridge, then take the robot link down.
async fn serve(config: Config, simulate: bool, shutdown: CancellationToken) -> Result<(), BridgeError> {
    let robot_shutdown = CancellationToken::new();

    let (adapter, robot_link): (Arc<dyn RobotAdapter>, _) = if simulate {
        info!("using simulated robot");
        (Arc::new(SimRobotAdapter::auto(SIMULATED_OPERATION_TIME)), None)
    } else {
        let client = WsRobotClient::new(config.robot_url.clone());
        let (min, max) = config.reconnect_bounds();
        let link = tokio::spawn(client.clone().run(Backoff::new(min, max), robot_shutdown.clone()));
        (Arc::new(client), Some(link))
    };

    let result = Bridge::new(config.bridge_config(), adapter).run(shutdown).await;

    robot_shutdown.cancel();
    if let Some(link) = robot_link {
        let _ = link.await;
    }
    result
}
