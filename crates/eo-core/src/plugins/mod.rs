//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Statically known policy modules."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::str::FromStr;

use eo_common::config::ModuleParams;
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::PluginError;
use crate::plugin::ChargePlugin;

pub mod charger_options;
pub mod load_management;
pub mod switch;
pub mod timed_schedule;

pub use charger_options::{ChargerOptions, ChargerOptionsConfig};
pub use load_management::{
    site_clamp, LoadManagement, LoadManagementConfig, SiteClamp, SolarConfig, SolarTracker,
};
pub use switch::{ManualSwitch, SwitchConfig};
pub use timed_schedule::{ScheduleConfig, ScheduleWindow, TimedSchedule};

/// Configuration key of every module the controller can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter)]
pub enum PluginKind {
    #[strum(serialize = "loadmanagement")]
    LoadManagement,
    #[strum(serialize = "scheduler")]
    TimedSchedule,
    #[strum(serialize = "switch")]
    Switch,
    #[strum(serialize = "chargeroptions")]
    ChargerOptions,
}

impl PluginKind {
    pub fn build(self, raw: &ModuleParams) -> Result<Box<dyn ChargePlugin>, PluginError> {
        Ok(match self {
            PluginKind::LoadManagement => Box::new(LoadManagement::new(raw)?),
            PluginKind::TimedSchedule => Box::new(TimedSchedule::new(raw)?),
            PluginKind::Switch => Box::new(ManualSwitch::new(raw)?),
            PluginKind::ChargerOptions => Box::new(ChargerOptions::new(raw)?),
        })
    }
}

/// Build the module registered under `name`.
pub fn build(name: &str, raw: &ModuleParams) -> Result<Box<dyn ChargePlugin>, PluginError> {
    PluginKind::from_str(name)
        .map_err(|_| PluginError::UnknownModule(name.to_owned()))?
        .build(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eo_common::config::KNOWN_MODULES;
    use strum::IntoEnumIterator;

    #[test]
    fn known_module_list_matches_registry() {
        let names: Vec<String> = PluginKind::iter().map(|kind| kind.to_string()).collect();
        assert_eq!(names.len(), KNOWN_MODULES.len());
        for name in KNOWN_MODULES {
            assert!(names.iter().any(|n| n == name), "missing {}", name);
        }
    }

    #[test]
    fn built_module_reports_its_key() {
        for kind in PluginKind::iter() {
            let module = kind.build(&ModuleParams::new()).unwrap();
            assert_eq!(module.name(), kind.as_ref());
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(matches!(
            build("ocpp", &ModuleParams::new()),
            Err(PluginError::UnknownModule(name)) if name == "ocpp"
        ));
    }
}
