//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "In-memory module configuration with change tracking."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::str::FromStr;

use eo_common::config::ModuleParams;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{info, warn};

use crate::command::StationCommand;
use crate::error::ConfigError;
use crate::plugins::PluginKind;

/// Raw module tables owned by the scheduler. Starts out changed so the first
/// cycle builds the registry.
#[derive(Debug, Clone)]
pub struct ModuleConfigStore {
    modules: IndexMap<String, ModuleParams>,
    changed: bool,
}

impl ModuleConfigStore {
    pub fn new(modules: IndexMap<String, ModuleParams>) -> Self {
        Self {
            modules,
            changed: true,
        }
    }

    pub fn modules(&self) -> &IndexMap<String, ModuleParams> {
        &self.modules
    }

    pub fn get(&self, module: &str, key: &str) -> Option<&Value> {
        self.modules.get(module).and_then(|params| params.get(key))
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Clear and return the change flag.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    pub fn apply(&mut self, command: StationCommand) -> Result<(), ConfigError> {
        let name = command.module().to_owned();
        if PluginKind::from_str(&name).is_err() {
            warn!(module = %name, "rejecting command for unknown module");
            return Err(ConfigError::UnknownModule(name));
        }
        match command {
            StationCommand::ConfigureModule { module, params } => {
                info!(module = %module, "module configuration replaced");
                self.modules.insert(module, params);
            }
            StationCommand::SetModuleParam { module, key, value } => {
                info!(module = %module, key = %key, value = %value, "module parameter set");
                self.modules.entry(module).or_default().insert(key, value);
            }
            StationCommand::RemoveModule { module } => {
                if self.modules.shift_remove(&module).is_none() {
                    return Err(ConfigError::NotConfigured(module));
                }
                info!(module = %module, "module removed from configuration");
            }
        }
        self.changed = true;
        Ok(())
    }
}
