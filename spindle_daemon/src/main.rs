//! SPINDLE control daemon.
//!
//! Wires the control loop to the TCP command channel and keeps the process
//! alive until Ctrl+C. Status events are forwarded to the log.

use clap::Parser;
use spindle_core::{CommandServer, ControlLoop, ControlSettings, SimMeasurement};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PORT: u16 = 9090;

#[derive(Parser, Debug)]
#[command(name = "spindle_daemon")]
#[command(about = "Fastening control daemon with a TCP command channel", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Path to the settings file
    #[arg(short, long, default_value = "settings.txt")]
    settings: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "spindle_daemon=debug,spindle_core=debug"
    } else {
        "spindle_daemon=info,spindle_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = ControlSettings::load(&args.settings);
    info!(
        target_torque_nm = settings.target_torque_nm,
        max_angle_deg = settings.max_angle_deg,
        cycle_hz = settings.cycle_hz,
        "loaded control settings"
    );

    let control = Arc::new(ControlLoop::new(settings, Box::new(SimMeasurement::new()))?);
    control.set_status_callback(|event| info!("{event}"));

    let server = CommandServer::bind((args.bind.as_str(), args.port), Arc::clone(&control))?;
    info!("command channel listening on {}", server.local_addr());
    info!("send START/STOP/STATUS, Ctrl+C to exit");

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })?;
    let _ = shutdown_rx.recv();

    info!("shutting down");
    server.shutdown();
    control.stop();
    Ok(())
}
