//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Configuration loading behaviour."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::str::FromStr;
use std::time::Duration;

use eo_common::config::{AppConfig, BoardSelection, Mode};

#[test]
fn empty_document_yields_defaults() {
    let config = AppConfig::from_str("").expect("empty config is valid");
    assert_eq!(config.mode, Mode::Production);
    assert_eq!(config.station.cycle_interval, Duration::from_secs(5));
    assert_eq!(config.station.smoothing_window, 9);
    assert_eq!(config.hardware.board, BoardSelection::Auto);
    assert_eq!(config.hardware.serial_port, "/dev/ttyUSB0");
    assert_eq!(config.hardware.receive_timeout, Duration::from_millis(500));
    let names: Vec<_> = config.modules.keys().cloned().collect();
    assert_eq!(
        names,
        vec!["scheduler", "chargeroptions", "loadmanagement", "switch"]
    );
}

#[test]
fn module_tables_are_kept_verbatim() {
    let config = AppConfig::from_str(
        r#"
mode = "simulation"

[station]
cycle_interval = 2

[hardware]
board = "bridge"
receive_timeout = 250

[modules.loadmanagement]
enabled = true
site_limit_current = "45"

[modules.switch]
on = 1
"#,
    )
    .expect("valid config");
    assert!(config.mode.is_simulation());
    assert_eq!(config.station.cycle_interval, Duration::from_secs(2));
    assert_eq!(config.hardware.board, BoardSelection::Bridge);
    assert_eq!(config.hardware.receive_timeout, Duration::from_millis(250));
    let lm = config.module("loadmanagement").unwrap();
    assert_eq!(lm.get("site_limit_current").unwrap(), "45");
    assert_eq!(config.modules.len(), 2);
}

#[test]
fn unknown_module_is_rejected() {
    let err = AppConfig::from_str("[modules.ocpp]\nenabled = true\n").unwrap_err();
    assert!(err.to_string().contains("unknown module 'ocpp'"));
}

#[test]
fn zero_cycle_interval_is_rejected() {
    assert!(AppConfig::from_str("[station]\ncycle_interval = 0\n").is_err());
}

#[test]
fn load_picks_first_existing_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let present = dir.path().join("station.toml");
    std::fs::write(&present, "[station]\ncharger_name = \"garage\"\n").unwrap();
    let missing = dir.path().join("missing.toml");
    let loaded = AppConfig::load_with_source(&[missing, present.clone()]).unwrap();
    assert_eq!(loaded.source, present);
    assert_eq!(loaded.config.station.charger_name, "garage");
}

#[test]
fn load_reports_inspected_paths() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    let err = AppConfig::load(&[missing]).unwrap_err();
    assert!(err.to_string().contains("nope.toml"));
}
