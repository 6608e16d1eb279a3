//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Checks that the configuration files shipped with the daemon load and build."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use eo_common::config::{AppConfig, Mode};

fn shipped(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("configs")
        .join(name)
}

#[test]
fn shipped_configs_carry_frontmatter() {
    for name in ["eo-chargerd.toml", "simulation.toml"] {
        let path = shipped(name);
        let content = fs::read_to_string(&path)
            .unwrap_or_else(|err| panic!("failed to read {}: {}", path.display(), err));
        assert!(
            content.starts_with("# ---"),
            "{name} must include frontmatter header"
        );
    }
}

#[test]
fn production_config_loads_and_every_module_builds() {
    let config = AppConfig::load(&[shipped("eo-chargerd.toml")]).unwrap();
    assert_eq!(config.mode, Mode::Production);
    assert_eq!(config.modules.len(), 4);
    for (name, params) in &config.modules {
        let plugin = eo_core::plugins::build(name, params)
            .unwrap_or_else(|err| panic!("module {name} failed to build: {err}"));
        assert_eq!(plugin.name(), name.as_str());
    }
}

#[test]
fn simulation_config_enables_solar_on_the_bridge() {
    let config = AppConfig::load(&[shipped("simulation.toml")]).unwrap();
    assert!(config.mode.is_simulation());
    let load = config.module("loadmanagement").unwrap();
    assert_eq!(load.get("solar_enable").and_then(|v| v.as_bool()), Some(true));
    assert!(config.simulation.solar_current > 7.0);
}
