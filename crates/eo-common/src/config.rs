//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Station configuration model and loader."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Raw parameter table for one policy module, exactly as written in the config file.
pub type ModuleParams = serde_json::Map<String, Value>;

/// Policy modules the controller knows how to build. Any other `[modules.*]` key is rejected.
pub const KNOWN_MODULES: &[&str] = &["loadmanagement", "scheduler", "switch", "chargeroptions"];

fn default_mode() -> Mode {
    Mode::Production
}

fn default_cycle_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_smoothing_window() -> usize {
    9
}

fn default_charger_name() -> String {
    "eo-charger".to_owned()
}

fn default_cpuinfo_path() -> PathBuf {
    PathBuf::from("/proc/cpuinfo")
}

fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_owned()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_receive_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_board_reset_line() -> u8 {
    16
}

fn default_spi_clock() -> u32 {
    1_000_000
}

fn default_metering_enabled() -> bool {
    true
}

fn default_metering_slave() -> u8 {
    1
}

fn default_metering_reset_line() -> u8 {
    22
}

fn default_metering_pm1_line() -> u8 {
    17
}

fn default_metering_scale() -> f64 {
    10_000.0
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_log_retention_days() -> u64 {
    14
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_simulation_seed() -> u64 {
    0xE0C4A
}

fn default_simulated_site_current() -> f64 {
    8.0
}

fn default_simulated_solar_current() -> f64 {
    0.0
}

fn default_vehicle_plugged() -> bool {
    true
}

fn default_modules() -> IndexMap<String, ModuleParams> {
    let mut modules = IndexMap::new();
    for (name, enabled) in [
        ("scheduler", true),
        ("chargeroptions", true),
        ("loadmanagement", true),
        ("switch", false),
    ] {
        let mut params = ModuleParams::new();
        params.insert("enabled".to_owned(), json!(enabled));
        modules.insert(name.to_owned(), params);
    }
    modules
}

/// Primary configuration object for the charge-point controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default = "default_modules")]
    pub modules: IndexMap<String, ModuleParams>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "EO_CONFIG";

    /// Load configuration from disk, respecting the `EO_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path.to_path_buf(),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Raw parameters for a named module, if configured.
    pub fn module(&self, name: &str) -> Option<&ModuleParams> {
        self.modules.get(name)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.station.validate()?;
        self.hardware.validate()?;
        for name in self.modules.keys() {
            if !KNOWN_MODULES.contains(&name.as_str()) {
                return Err(anyhow!(
                    "unknown module '{}' in configuration (known modules: {})",
                    name,
                    KNOWN_MODULES.join(", ")
                ));
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            station: StationConfig::default(),
            hardware: HardwareConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            simulation: SimulationConfig::default(),
            modules: default_modules(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Whether the controller talks to real hardware or the built-in station model.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Production,
    Simulation,
}

impl Mode {
    pub fn is_simulation(&self) -> bool {
        matches!(self, Mode::Simulation)
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Mode::Production),
            "simulation" => Ok(Mode::Simulation),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Control loop settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_cycle_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cycle_interval: Duration,
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,
    #[serde(default = "default_charger_name")]
    pub charger_name: String,
    #[serde(default)]
    pub charger_id: Option<String>,
}

impl StationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cycle_interval.is_zero() {
            return Err(anyhow!("station.cycle_interval must be greater than zero"));
        }
        if self.smoothing_window == 0 {
            return Err(anyhow!("station.smoothing_window must be at least 1"));
        }
        Ok(())
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            cycle_interval: default_cycle_interval(),
            smoothing_window: default_smoothing_window(),
            charger_name: default_charger_name(),
            charger_id: None,
        }
    }
}

/// How the charger board transport is chosen at startup.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BoardSelection {
    /// Probe the host board identity and pick the matching transport.
    #[default]
    Auto,
    DirectSerial,
    Bridge,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    #[serde(default)]
    pub board: BoardSelection,
    #[serde(default = "default_cpuinfo_path")]
    pub cpuinfo_path: PathBuf,
    #[serde(default = "default_serial_port")]
    pub serial_port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_receive_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub receive_timeout: Duration,
    #[serde(default = "default_board_reset_line")]
    pub reset_line: u8,
    #[serde(default)]
    pub bridge: BridgeBusConfig,
    #[serde(default)]
    pub metering: MeteringConfig,
}

impl HardwareConfig {
    pub fn validate(&self) -> Result<()> {
        if self.receive_timeout.is_zero() {
            return Err(anyhow!("hardware.receive_timeout must be greater than zero"));
        }
        if self.metering.scale <= 0.0 {
            return Err(anyhow!("hardware.metering.scale must be positive"));
        }
        Ok(())
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            board: BoardSelection::default(),
            cpuinfo_path: default_cpuinfo_path(),
            serial_port: default_serial_port(),
            baud_rate: default_baud_rate(),
            receive_timeout: default_receive_timeout(),
            reset_line: default_board_reset_line(),
            bridge: BridgeBusConfig::default(),
            metering: MeteringConfig::default(),
        }
    }
}

/// Register-bus settings for the serial bridge chip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeBusConfig {
    #[serde(default)]
    pub slave_select: u8,
    #[serde(default = "default_spi_clock")]
    pub clock_hz: u32,
}

impl Default for BridgeBusConfig {
    fn default() -> Self {
        Self {
            slave_select: 0,
            clock_hz: default_spi_clock(),
        }
    }
}

/// Energy-monitoring chip wiring and scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteringConfig {
    #[serde(default = "default_metering_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metering_slave")]
    pub slave_select: u8,
    #[serde(default = "default_spi_clock")]
    pub clock_hz: u32,
    #[serde(default = "default_metering_reset_line")]
    pub reset_line: u8,
    #[serde(default = "default_metering_pm1_line")]
    pub pm1_line: u8,
    /// Raw register counts per amp.
    #[serde(default = "default_metering_scale")]
    pub scale: f64,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            enabled: default_metering_enabled(),
            slave_select: default_metering_slave(),
            clock_hz: default_spi_clock(),
            reset_line: default_metering_reset_line(),
            pm1_line: default_metering_pm1_line(),
            scale: default_metering_scale(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            retention_days: default_log_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// Bench model parameters used when `mode = "simulation"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_simulation_seed")]
    pub random_seed: u64,
    /// Household load on the site CT, excluding the vehicle.
    #[serde(default = "default_simulated_site_current")]
    pub site_current: f64,
    #[serde(default = "default_simulated_solar_current")]
    pub solar_current: f64,
    /// Whether a vehicle is plugged in when the model starts.
    #[serde(default = "default_vehicle_plugged")]
    pub vehicle_plugged: bool,
    /// Maximum current the simulated vehicle will draw.
    #[serde(default)]
    pub vehicle_max_current: Option<f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            random_seed: default_simulation_seed(),
            site_current: default_simulated_site_current(),
            solar_current: default_simulated_solar_current(),
            vehicle_plugged: default_vehicle_plugged(),
            vehicle_max_current: None,
        }
    }
}
