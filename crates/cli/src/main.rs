//! joycon-teleop CLI: forwards Joy-Con input to a UDP teleoperation receiver.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use joycon_teleop_core::config::{StartupPolicy, TeleopConfig};
use joycon_teleop_core::decode;
use joycon_teleop_core::device::ControllerIdentity;
use joycon_teleop_core::error::DeviceError;
use joycon_teleop_core::publish::{Payload, Publisher};
use joycon_teleop_core::session::DeviceSession;
use joycon_teleop_core::teleop::TeleopLoop;
use joycon_teleop_core::transport::HidapiConnector;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Parser)]
#[command(
    name = "joycon-teleop",
    version,
    about = "Stream Joy-Con input as JSON over UDP"
)]
struct Cli {
    /// JSON configuration file; flags below override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Destination host.
    #[arg(long, env = "JOYCON_TELEOP_HOST", global = true)]
    host: Option<String>,

    /// Destination UDP port.
    #[arg(long, env = "JOYCON_TELEOP_PORT", global = true)]
    port: Option<u16>,

    /// Poll rate in Hz.
    #[arg(long, env = "JOYCON_TELEOP_RATE", global = true)]
    rate: Option<f64>,

    /// Fail at startup unless both controllers open.
    #[arg(long, global = true)]
    require_both: bool,

    /// Attach an accelerometer velocity estimate to each datagram.
    #[arg(long, global = true)]
    velocity: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward both controllers until interrupted (default).
    Run,
    /// List connected Joy-Cons.
    ListDevices,
    /// Print decoded states of one controller as JSON lines.
    Inspect {
        /// left or right.
        #[arg(long, value_parser = parse_side)]
        side: ControllerIdentity,
        /// Stop after this many states.
        #[arg(long, default_value_t = 100)]
        count: usize,
    },
}

fn parse_side(s: &str) -> std::result::Result<ControllerIdentity, String> {
    ControllerIdentity::from_name(s).ok_or_else(|| format!("expected left or right, got '{s}'"))
}

impl Cli {
    /// File (or defaults), then CLI/env overrides.
    fn build_config(&self) -> Result<TeleopConfig> {
        let mut config = match &self.config {
            Some(path) => TeleopConfig::load(path)?,
            None => TeleopConfig::default(),
        };
        if let Some(host) = &self.host {
            config.destination.host = host.clone();
        }
        if let Some(port) = self.port {
            config.destination.port = port;
        }
        if let Some(rate) = self.rate {
            config.loop_hz = rate;
        }
        if self.require_both {
            config.startup = StartupPolicy::RequireAll;
        }
        if self.velocity {
            config.velocity = true;
        }
        config.validate()?;
        Ok(config)
    }
}

fn install_stop_flag() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_clone.store(true, Ordering::Relaxed);
    })
    .context("failed to install Ctrl-C handler")?;
    Ok(stop)
}

fn run(config: &TeleopConfig) -> Result<()> {
    let stop = install_stop_flag()?;
    let connector = HidapiConnector::new()?;
    let publisher = Publisher::bind(&config.destination)
        .with_context(|| format!("cannot publish to {}", config.destination))?;

    let mut teleop = TeleopLoop::start(connector, publisher, config)?;
    teleop.run(&stop);
    Ok(())
}

fn inspect(config: &TeleopConfig, side: ControllerIdentity, count: usize) -> Result<()> {
    let stop = install_stop_flag()?;
    let mut connector = HidapiConnector::new()?;
    let mut session = DeviceSession::open(&mut connector, side)?;

    let mut printed = 0;
    while printed < count && !stop.load(Ordering::Relaxed) {
        let report = match session.read_report(config.read_timeout()) {
            Ok(report) => report,
            Err(DeviceError::Timeout) => continue,
            Err(e) => return Err(e.into()),
        };
        let state = match decode::decode_with(side, &report, &config.calibration) {
            Ok(state) => state,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping report");
                continue;
            }
        };
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let line = Payload::new(&state, None, ts).encode()?;
        println!("{}", String::from_utf8_lossy(&line));
        printed += 1;
    }

    session.close();
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = cli.build_config()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config)?,
        Commands::ListDevices => {
            let devices = joycon_teleop_core::device::discover_devices()?;
            if devices.is_empty() {
                println!("No Joy-Cons found.");
                println!("Ensure both controllers are paired over Bluetooth.");
            } else {
                for dev in &devices {
                    println!(
                        "{} [{}] (VID: 0x{:04X}, PID: 0x{:04X}, path: {}{})",
                        dev.identity.name(),
                        dev.identity,
                        dev.vid,
                        dev.pid,
                        dev.path,
                        dev.serial
                            .as_deref()
                            .map(|s| format!(", serial: {s}"))
                            .unwrap_or_default()
                    );
                }
            }
        }
        Commands::Inspect { side, count } => inspect(&config, side, count)?,
    }

    Ok(())
}
