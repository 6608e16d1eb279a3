//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Active policy modules and their reconciliation against configuration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use eo_common::config::ModuleParams;
use eo_hal::CtCalibration;
use indexmap::IndexMap;
use tracing::{error, info, warn};

use crate::plugin::{ChargePlugin, ChargerOverrides, SiteLimits};
use crate::plugins;
use crate::snapshot::ModuleStatus;

/// A loaded module plus what it did last cycle.
pub struct ModuleEntry {
    pub plugin: Box<dyn ChargePlugin>,
    pub last_vote: Option<i32>,
}

impl ModuleEntry {
    fn status(&self) -> ModuleStatus {
        ModuleStatus {
            name: self.plugin.name().to_owned(),
            enabled: self.plugin.enabled(),
            poll_cadence: self.plugin.poll_cadence(),
            last_vote: self.last_vote,
        }
    }
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub loaded: Vec<String>,
    pub reconfigured: Vec<String>,
    pub unloaded: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Default)]
pub struct ModuleRegistry {
    modules: IndexMap<String, ModuleEntry>,
}

impl ModuleRegistry {
    /// Bring the active set in line with `config`: build new modules, reconfigure
    /// loaded ones and unload those no longer configured. Failures exclude the
    /// module and never abort the pass.
    pub fn reconcile(&mut self, config: &IndexMap<String, ModuleParams>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for (name, raw) in config {
            match self.modules.get_mut(name) {
                Some(entry) => match entry.plugin.configure(raw) {
                    Ok(()) => {
                        info!(module = %name, "module reconfigured");
                        report.reconfigured.push(name.clone());
                    }
                    Err(err) => {
                        warn!(module = %name, error = %err, "reconfiguration rejected, keeping previous settings");
                        report.failed.push(name.clone());
                    }
                },
                None => match plugins::build(name, raw) {
                    Ok(plugin) => {
                        info!(module = %name, enabled = plugin.enabled(), "module loaded");
                        self.modules.insert(
                            name.clone(),
                            ModuleEntry {
                                plugin,
                                last_vote: None,
                            },
                        );
                        report.loaded.push(name.clone());
                    }
                    Err(err) => {
                        error!(module = %name, error = %err, "module could not be loaded, excluding it");
                        report.failed.push(name.clone());
                    }
                },
            }
        }

        let stale: Vec<String> = self
            .modules
            .keys()
            .filter(|name| !config.contains_key(*name))
            .cloned()
            .collect();
        for name in stale {
            self.modules.shift_remove(&name);
            info!(module = %name, "module unloaded");
            report.unloaded.push(name);
        }
        report
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&dyn ChargePlugin> {
        self.modules.get(name).map(|entry| entry.plugin.as_ref())
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = (&String, &mut ModuleEntry)> {
        self.modules.iter_mut()
    }

    pub fn plugins_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn ChargePlugin>> {
        self.modules.values_mut().map(|entry| &mut entry.plugin)
    }

    pub fn statuses(&self) -> Vec<ModuleStatus> {
        self.modules.values().map(ModuleEntry::status).collect()
    }

    /// First module offering a site budget.
    pub fn site_limits(&self) -> Option<SiteLimits> {
        self.modules
            .values()
            .find_map(|entry| entry.plugin.site_limits())
    }

    pub fn ct_calibration(&self) -> CtCalibration {
        self.modules
            .values()
            .find_map(|entry| entry.plugin.ct_calibration())
            .unwrap_or_default()
    }

    pub fn charger_overrides(&self) -> ChargerOverrides {
        self.modules
            .values()
            .find_map(|entry| entry.plugin.charger_overrides())
            .unwrap_or_default()
    }
}
