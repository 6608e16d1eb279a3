//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Manual on/off charging switch."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use eo_common::config::ModuleParams;

use crate::error::PluginError;
use crate::params::{
    resolve, ModuleSettings, ParamDefault, ParamSpec, ResolvedParams, POLL_CADENCE,
};
use crate::plugin::{ChargePlugin, PollContext};

pub const NAME: &str = "switch";

const PARAMS: &[ParamSpec] = &[
    ParamSpec::new("enabled", ParamDefault::Bool(false)),
    POLL_CADENCE,
    ParamSpec::new("on", ParamDefault::Bool(false)),
    ParamSpec::new("amps", ParamDefault::Int(32)),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchConfig {
    pub settings: ModuleSettings,
    pub on: bool,
    /// Sent as-is; the scheduler clamps votes to 0..=32.
    pub amps: i32,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            settings: ModuleSettings {
                enabled: false,
                poll_cadence: 1,
            },
            on: false,
            amps: 32,
        }
    }
}

impl SwitchConfig {
    fn from_params(params: &ResolvedParams) -> Result<Self, PluginError> {
        Ok(Self {
            settings: ModuleSettings::from_params(params)?,
            on: params.bool("on")?,
            amps: params.int_as("amps")?,
        })
    }
}

#[derive(Debug, Default)]
pub struct ManualSwitch {
    params: ResolvedParams,
    config: SwitchConfig,
}

impl ManualSwitch {
    pub fn new(raw: &ModuleParams) -> Result<Self, PluginError> {
        let mut module = Self::default();
        module.configure(raw)?;
        Ok(module)
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }
}

impl ChargePlugin for ManualSwitch {
    fn name(&self) -> &'static str {
        NAME
    }

    fn param_spec(&self) -> &'static [ParamSpec] {
        PARAMS
    }

    fn configure(&mut self, raw: &ModuleParams) -> Result<(), PluginError> {
        let params = resolve(NAME, PARAMS, raw);
        self.config = SwitchConfig::from_params(&params)?;
        self.params = params;
        Ok(())
    }

    fn params(&self) -> &ResolvedParams {
        &self.params
    }

    fn settings(&self) -> ModuleSettings {
        self.config.settings
    }

    fn poll(&mut self, _ctx: &PollContext<'_>) -> Result<Option<i32>, PluginError> {
        Ok(Some(if self.config.on { self.config.amps } else { 0 }))
    }
}
