//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the charge-point controller daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use eo_common::config::{AppConfig, BoardSelection, HardwareConfig, Mode};
use eo_common::logging::init_tracing;
use eo_core::{ArbitrationScheduler, SERVICE_NAME};
use eo_hal::{probe_board, CurrentMeter, NoMeter, OverrunCounter, Transport, TransportKind};
use eo_metrics::{new_registry, spawn_http_server, DaemonMetrics, SharedRegistry, StationMetrics};
use eo_protocol::ChargerEngine;
use eo_sim::SimulatedStation;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

const BUILD_TARGET: &str = env!("VERGEN_CARGO_TARGET_TRIPLE");
const BUILD_TIMESTAMP: &str = env!("VERGEN_BUILD_TIMESTAMP");

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("VERGEN_CARGO_TARGET_TRIPLE"), ")"),
    about = "Charge-point controller daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Override application mode")]
    mode: Option<CliMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Production,
    Simulation,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Production => Mode::Production,
            CliMode::Simulation => Mode::Simulation,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the arbitration loop")]
    Run,
    #[command(about = "Identify the host board and the transport it selects")]
    Probe,
    #[command(about = "Discover the charger controller address and exit")]
    Discover,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/eo-chargerd.toml"));
    candidates.push(PathBuf::from("configs/simulation.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    let load_duration = load_started.elapsed();
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    init_tracing(SERVICE_NAME, &config.logging)?;
    info!(
        config_path = %loaded.source.display(),
        mode = ?config.mode,
        charger = %config.station.charger_name,
        built = BUILD_TIMESTAMP,
        "configuration loaded"
    );

    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();
    daemon_metrics.set_build_info(
        env!("CARGO_PKG_VERSION"),
        BUILD_TARGET,
        if config.mode.is_simulation() {
            "simulation"
        } else {
            "production"
        },
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config, registry).await?,
        Commands::Probe => {
            let board = probe_board(&config.hardware.cpuinfo_path);
            println!(
                "Revision: {}\nTransport: {}",
                board.revision.as_deref().unwrap_or("unknown"),
                board.transport
            );
        }
        Commands::Discover => {
            let mut engine = build_engine(&config)?;
            engine.start()?;
            let address = match engine.address() {
                Some(address) => address.to_owned(),
                None => engine.discover()?,
            };
            println!(
                "Address: {}\nTransport: {}",
                address,
                engine.transport_kind()
            );
        }
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, registry: SharedRegistry) -> Result<()> {
    let metrics_settings = config.metrics.clone();
    let (metrics_server, station_metrics) = if metrics_settings.enabled {
        info!(address = %metrics_settings.listen, "metrics exporter enabled");
        let server = spawn_http_server(registry.clone(), metrics_settings.listen)?;
        (Some(server), Some(StationMetrics::new(registry)?))
    } else {
        info!("metrics exporter disabled by configuration");
        (None, None)
    };

    let mut engine = build_engine(&config)?;
    engine.start().context("charger board link failed to start")?;
    let scheduler = ArbitrationScheduler::new(&config, engine, station_metrics);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut arbitration = tokio::spawn(scheduler.run(shutdown_rx));

    info!(mode = ?config.mode, "daemon running; waiting for termination signal");
    tokio::select! {
        signal = signal::ctrl_c() => {
            signal?;
            info!("ctrl-c received; shutting down");
            let _ = shutdown_tx.send(());
            arbitration.await??;
        }
        finished = &mut arbitration => {
            warn!("arbitration loop exited without a shutdown signal");
            finished??;
        }
    }

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

fn build_engine(config: &AppConfig) -> Result<ChargerEngine> {
    if config.mode.is_simulation() {
        Ok(simulated_engine(config))
    } else {
        hardware_engine(&config.hardware)
    }
}

fn selected_transport(hardware: &HardwareConfig) -> TransportKind {
    match hardware.board {
        BoardSelection::Auto => probe_board(&hardware.cpuinfo_path).transport,
        BoardSelection::DirectSerial => TransportKind::DirectSerial,
        BoardSelection::Bridge => TransportKind::Bridge,
    }
}

fn simulated_engine(config: &AppConfig) -> ChargerEngine {
    let hardware = &config.hardware;
    let station = SimulatedStation::new(&config.simulation);
    let transport: Box<dyn Transport> = match hardware.board {
        BoardSelection::Bridge => Box::new(station.bridge_transport(OverrunCounter::default())),
        BoardSelection::Auto | BoardSelection::DirectSerial => {
            Box::new(station.direct_transport())
        }
    };
    let meter: Box<dyn CurrentMeter> = if hardware.metering.enabled {
        let mut driver = station.metering_driver(hardware.metering.scale);
        match driver.initialise() {
            Ok(mismatched) if !mismatched.is_empty() => {
                warn!(registers = ?mismatched, "simulated metering registers did not verify")
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "simulated metering initialisation failed"),
        }
        Box::new(driver)
    } else {
        Box::new(NoMeter)
    };
    info!(transport = %transport.kind(), "simulated station assembled");
    ChargerEngine::new(transport, meter, hardware.receive_timeout)
}

#[cfg(feature = "rpi")]
fn hardware_engine(hardware: &HardwareConfig) -> Result<ChargerEngine> {
    use eo_hal::rpi::{GpioLine, SpiMode, SpiRegisterBus};
    use eo_hal::{BridgeUart, DirectSerial, MeteringDriver, SerialPortLink};

    let reset_line = Box::new(GpioLine::open(hardware.reset_line)?);
    let transport: Box<dyn Transport> = match selected_transport(hardware) {
        TransportKind::DirectSerial => {
            let link = SerialPortLink::open(
                &hardware.serial_port,
                hardware.baud_rate,
                hardware.receive_timeout,
            )?;
            Box::new(DirectSerial::new(Box::new(link), reset_line))
        }
        TransportKind::Bridge => {
            let bus = SpiRegisterBus::open(
                hardware.bridge.slave_select,
                hardware.bridge.clock_hz,
                SpiMode::Mode0,
            )?;
            Box::new(BridgeUart::new(
                Box::new(bus),
                reset_line,
                OverrunCounter::default(),
            ))
        }
    };

    let metering = &hardware.metering;
    let meter: Box<dyn CurrentMeter> = if metering.enabled {
        let bus = SpiRegisterBus::open(metering.slave_select, metering.clock_hz, SpiMode::Mode3)?;
        let mut driver = MeteringDriver::new(
            Box::new(bus),
            Box::new(GpioLine::open(metering.reset_line)?),
            Box::new(GpioLine::open(metering.pm1_line)?),
            metering.scale,
        );
        let mismatched = driver.initialise()?;
        if !mismatched.is_empty() {
            warn!(registers = ?mismatched, "metering registers did not verify after load");
        }
        Box::new(driver)
    } else {
        info!("metering chip disabled; CT readings come from calibration only");
        Box::new(NoMeter)
    };
    Ok(ChargerEngine::new(transport, meter, hardware.receive_timeout))
}

#[cfg(not(feature = "rpi"))]
fn hardware_engine(hardware: &HardwareConfig) -> Result<ChargerEngine> {
    let transport = selected_transport(hardware);
    anyhow::bail!(
        "production mode needs the `rpi` feature (selected transport: {}); run with --mode simulation",
        transport
    )
}
