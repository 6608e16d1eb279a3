//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Capability interface implemented by every policy module."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::NaiveTime;
use eo_common::config::ModuleParams;
use eo_hal::CtCalibration;
use serde_json::Value;

use crate::error::PluginError;
use crate::params::{ModuleSettings, ParamSpec, ResolvedParams};
use crate::snapshot::{ChargeStatus, StationSnapshot};

/// Default RMS correction for the board's peak-to-peak voltage reading.
pub const DEFAULT_VOLTAGE_CORRECTION: f64 = 0.776231001;

/// What a module may look at while voting.
#[derive(Debug, Clone, Copy)]
pub struct PollContext<'a> {
    pub cycle: u64,
    /// Local wall-clock time of the cycle.
    pub local_time: NaiveTime,
    /// Charge status from the last successful exchange.
    pub charge: &'a ChargeStatus,
    /// Cycle of that exchange; unchanged while the board is not answering.
    pub charge_cycle: Option<u64>,
}

/// Site budget supplied by load management.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteLimits {
    pub site_limit_current: i32,
}

/// Global overrides supplied by the charger options module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargerOverrides {
    pub always_supply_current: bool,
    pub overall_limit_current: i32,
    pub mains_voltage_correction: f64,
}

impl Default for ChargerOverrides {
    fn default() -> Self {
        Self {
            always_supply_current: false,
            overall_limit_current: 32,
            mains_voltage_correction: DEFAULT_VOLTAGE_CORRECTION,
        }
    }
}

/// A policy module. Construction and reconfiguration both go through
/// [`ChargePlugin::configure`]; an implementation must cope with being
/// configured any number of times.
pub trait ChargePlugin: Send {
    fn name(&self) -> &'static str;

    fn param_spec(&self) -> &'static [ParamSpec];

    /// Coerce and apply `raw`. On error the previous configuration stays in force.
    fn configure(&mut self, raw: &ModuleParams) -> Result<(), PluginError>;

    fn params(&self) -> &ResolvedParams;

    /// Enable flag and poll cadence from the module's table.
    fn settings(&self) -> ModuleSettings;

    /// Vote in amps, or `None` to abstain.
    fn poll(&mut self, ctx: &PollContext<'_>) -> Result<Option<i32>, PluginError>;

    /// One parameter, or the whole table when `key` is `None`.
    fn get_config(&self, key: Option<&str>) -> Value {
        match key {
            Some(key) => self.params().get(key).cloned().unwrap_or(Value::Null),
            None => self.params().to_value(),
        }
    }

    fn enabled(&self) -> bool {
        self.settings().enabled
    }

    /// Poll every N cycles; 0 never polls.
    fn poll_cadence(&self) -> u64 {
        self.settings().poll_cadence
    }

    /// Runs after a successful dispatch with the freshly published snapshot.
    fn late_poll(&mut self, _snapshot: &StationSnapshot) {}

    /// Runs every cycle, enabled or not.
    fn sync_state(&mut self, _snapshot: &StationSnapshot) {}

    fn site_limits(&self) -> Option<SiteLimits> {
        None
    }

    fn ct_calibration(&self) -> Option<CtCalibration> {
        None
    }

    fn charger_overrides(&self) -> Option<ChargerOverrides> {
        None
    }
}
