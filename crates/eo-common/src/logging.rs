//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Tracing bootstrap and rolled log retention."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "EO_LOG";
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// File name stem used for the rolling log of `service_name`.
pub fn log_file_stem(service_name: &str, config: &LoggingConfig) -> String {
    let prefix = config
        .file_prefix
        .clone()
        .unwrap_or_else(|| service_name.to_owned());
    format!("{}-{}.log", prefix, service_name)
}

/// Initialize the tracing subscriber based on configuration and environment variables.
///
/// * `EO_LOG` overrides the log filter (e.g. `info`, `info,eo_hal=trace`). When unset the
///   standard `RUST_LOG` variable is honoured, finally defaulting to `info`.
/// * Stdout carries JSON or pretty output; a daily rolling JSON file is always written
///   next to it for post-mortem analysis.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    fs::create_dir_all(&config.directory).with_context(|| {
        format!(
            "unable to create log directory {}",
            config.directory.display()
        )
    })?;

    let file_appender = daily(&config.directory, log_file_stem(service_name, config));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {} directive ({}); defaulting to info logging",
                LOG_ENV, err
            );
            EnvFilter::new("info")
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let fmt_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(service = %service_name, log_dir = %config.directory.display(), format = ?config.format, "tracing initialised");
    Ok(())
}

/// Delete rolled log files starting with `stem` whose last modification is older than
/// `retention_days`. Returns the number of files removed.
///
/// A retention of zero disables purging.
pub fn purge_expired_logs(directory: &Path, stem: &str, retention_days: u64) -> Result<usize> {
    if retention_days == 0 || !directory.is_dir() {
        return Ok(0);
    }
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(retention_days * SECONDS_PER_DAY))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0usize;
    for entry in fs::read_dir(directory)
        .with_context(|| format!("unable to list log directory {}", directory.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(stem) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified()?;
        if modified < cutoff {
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!(file = %entry.path().display(), "purged expired log file");
                    removed += 1;
                }
                Err(err) => {
                    warn!(file = %entry.path().display(), error = %err, "failed to purge log file")
                }
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_prefers_configured_prefix() {
        let mut config = LoggingConfig::default();
        assert_eq!(log_file_stem("eo-chargerd", &config), "eo-chargerd-eo-chargerd.log");
        config.file_prefix = Some("site7".to_owned());
        assert_eq!(log_file_stem("eo-chargerd", &config), "site7-eo-chargerd.log");
    }

    #[test]
    fn purge_keeps_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("svc.log.2024-01-01"), b"{}").unwrap();
        fs::write(dir.path().join("other.txt"), b"x").unwrap();
        let removed = purge_expired_logs(dir.path(), "svc.log", 1).unwrap();
        assert_eq!(removed, 0);
        assert!(dir.path().join("svc.log.2024-01-01").exists());
    }

    #[test]
    fn zero_retention_disables_purge() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("svc.log.2024-01-01"), b"{}").unwrap();
        assert_eq!(purge_expired_logs(dir.path(), "svc.log", 0).unwrap(), 0);
    }

    #[test]
    fn purge_removes_backdated_files_matching_stem() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("svc.log.2024-01-01");
        let fresh = dir.path().join("svc.log.2024-01-09");
        let foreign = dir.path().join("other.log.2024-01-01");
        for path in [&stale, &fresh, &foreign] {
            fs::write(path, b"{}").unwrap();
        }
        let long_ago = SystemTime::now() - Duration::from_secs(10 * SECONDS_PER_DAY);
        for path in [&stale, &foreign] {
            fs::File::options()
                .write(true)
                .open(path)
                .unwrap()
                .set_modified(long_ago)
                .unwrap();
        }

        assert_eq!(purge_expired_logs(dir.path(), "svc.log", 7).unwrap(), 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(foreign.exists());
    }
}
