//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Periodic host metrics and log retention."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use eo_common::config::LoggingConfig;
use eo_common::logging::{log_file_stem, purge_expired_logs};
use sysinfo::System;
use tracing::{debug, warn};

use crate::snapshot::SystemMetrics;

/// Cycles between slow housekeeping steps; one minute at the default cadence.
pub const SLOW_PERIOD: u64 = 12;
const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";
const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

pub struct Housekeeping {
    system: System,
    log_dir: PathBuf,
    log_stem: String,
    retention_days: u64,
    thermal_zone: PathBuf,
    cpu_temperature: Option<f64>,
}

impl Housekeeping {
    pub fn new(service_name: &str, logging: &LoggingConfig) -> Self {
        Self {
            system: System::new(),
            log_dir: logging.directory.clone(),
            log_stem: log_file_stem(service_name, logging),
            retention_days: logging.retention_days,
            thermal_zone: PathBuf::from(THERMAL_ZONE),
            cpu_temperature: None,
        }
    }

    pub fn with_thermal_zone(mut self, path: impl Into<PathBuf>) -> Self {
        self.thermal_zone = path.into();
        self
    }

    /// Refresh host figures; on slow cycles also read the CPU temperature and purge old logs.
    pub fn run(&mut self, cycle: u64) -> SystemMetrics {
        if cycle % SLOW_PERIOD == 0 {
            self.cpu_temperature = read_temperature(&self.thermal_zone);
            if self.log_dir.exists() {
                match purge_expired_logs(&self.log_dir, &self.log_stem, self.retention_days) {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "purged expired log files"),
                    Err(err) => warn!(error = %err, "log retention purge failed"),
                }
            }
        }

        self.system.refresh_memory();
        SystemMetrics {
            available_memory_mib: self.system.available_memory() as f64 / BYTES_PER_MIB,
            free_memory_mib: self.system.free_memory() as f64 / BYTES_PER_MIB,
            load_average_1m: System::load_average().one,
            cpu_temperature: self.cpu_temperature,
        }
    }
}

/// Millidegrees from a sysfs thermal zone.
fn read_temperature(path: &Path) -> Option<f64> {
    match fs::read_to_string(path) {
        Ok(text) => text.trim().parse::<f64>().ok().map(|milli| milli / 1000.0),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "cpu temperature unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn temperature_is_read_on_slow_cycles_only() {
        let dir = tempdir().unwrap();
        let zone = dir.path().join("temp");
        fs::write(&zone, "51234\n").unwrap();
        let logging = LoggingConfig {
            directory: dir.path().join("logs"),
            ..LoggingConfig::default()
        };
        let mut housekeeping = Housekeeping::new("eo-test", &logging).with_thermal_zone(&zone);

        let first = housekeeping.run(0);
        assert_eq!(first.cpu_temperature, Some(51.234));

        fs::write(&zone, "60000\n").unwrap();
        assert_eq!(housekeeping.run(1).cpu_temperature, Some(51.234));
        assert_eq!(housekeeping.run(SLOW_PERIOD).cpu_temperature, Some(60.0));
    }

    #[test]
    fn missing_thermal_zone_reports_none() {
        let dir = tempdir().unwrap();
        let logging = LoggingConfig {
            directory: dir.path().to_path_buf(),
            ..LoggingConfig::default()
        };
        let mut housekeeping =
            Housekeeping::new("eo-test", &logging).with_thermal_zone(dir.path().join("absent"));
        let metrics = housekeeping.run(0);
        assert!(metrics.cpu_temperature.is_none());
        assert!(metrics.available_memory_mib >= 0.0);
    }
}
