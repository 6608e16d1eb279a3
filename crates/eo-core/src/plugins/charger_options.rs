//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Station-wide charger options and overrides."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use eo_common::config::ModuleParams;
use eo_protocol::{MAX_AMPS, MIN_CHARGE_AMPS};

use crate::error::PluginError;
use crate::params::{
    resolve, ModuleSettings, ParamDefault, ParamSpec, ResolvedParams, POLL_CADENCE,
};
use crate::plugin::{ChargePlugin, ChargerOverrides, PollContext, DEFAULT_VOLTAGE_CORRECTION};

pub const NAME: &str = "chargeroptions";

const PARAMS: &[ParamSpec] = &[
    ParamSpec::new("enabled", ParamDefault::Bool(true)),
    POLL_CADENCE,
    ParamSpec::new("always_supply_current", ParamDefault::Bool(false)),
    ParamSpec::new("overall_limit_current", ParamDefault::Int(32)),
    ParamSpec::new(
        "mains_voltage_correction",
        ParamDefault::Float(DEFAULT_VOLTAGE_CORRECTION),
    ),
    ParamSpec::new("charger_name", ParamDefault::Text("")),
    ParamSpec::new("charger_id", ParamDefault::Text("")),
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChargerOptionsConfig {
    pub settings: ModuleSettings,
    /// Ceiling already clamped to the supported charging range.
    pub overrides: ChargerOverrides,
    pub charger_name: String,
    pub charger_id: String,
}

impl ChargerOptionsConfig {
    fn from_params(params: &ResolvedParams) -> Result<Self, PluginError> {
        let charger_id = params.text("charger_id")?;
        if !charger_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(PluginError::InvalidParameter {
                module: NAME,
                param: "charger_id",
                reason: format!("'{}' must be alphanumeric or underscore", charger_id),
            });
        }
        let limit = params
            .int("overall_limit_current")?
            .clamp(i64::from(MIN_CHARGE_AMPS), i64::from(MAX_AMPS));
        Ok(Self {
            settings: ModuleSettings::from_params(params)?,
            overrides: ChargerOverrides {
                always_supply_current: params.bool("always_supply_current")?,
                overall_limit_current: limit as i32,
                mains_voltage_correction: params.float("mains_voltage_correction")?,
            },
            charger_name: params.text("charger_name")?.to_owned(),
            charger_id: charger_id.to_owned(),
        })
    }
}

/// Never votes; contributes the global overrides instead.
#[derive(Debug, Default)]
pub struct ChargerOptions {
    params: ResolvedParams,
    config: ChargerOptionsConfig,
}

impl ChargerOptions {
    pub fn new(raw: &ModuleParams) -> Result<Self, PluginError> {
        let mut module = Self::default();
        module.configure(raw)?;
        Ok(module)
    }

    pub fn config(&self) -> &ChargerOptionsConfig {
        &self.config
    }
}

impl ChargePlugin for ChargerOptions {
    fn name(&self) -> &'static str {
        NAME
    }

    fn param_spec(&self) -> &'static [ParamSpec] {
        PARAMS
    }

    fn configure(&mut self, raw: &ModuleParams) -> Result<(), PluginError> {
        let params = resolve(NAME, PARAMS, raw);
        self.config = ChargerOptionsConfig::from_params(&params)?;
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
        Ok(None)
    }

    fn charger_overrides(&self) -> Option<ChargerOverrides> {
        Some(self.config.overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: serde_json::Value) -> Result<ChargerOptions, PluginError> {
        ChargerOptions::new(value.as_object().unwrap())
    }

    #[test]
    fn defaults_match_factory_settings() {
        let overrides = options(json!({})).unwrap().charger_overrides().unwrap();
        assert_eq!(overrides, ChargerOverrides::default());
    }

    #[test]
    fn overall_limit_is_clamped_to_supported_range() {
        let high = options(json!({"overall_limit_current": 48})).unwrap();
        assert_eq!(high.charger_overrides().unwrap().overall_limit_current, 32);
        let low = options(json!({"overall_limit_current": 2})).unwrap();
        assert_eq!(low.charger_overrides().unwrap().overall_limit_current, 6);
    }

    #[test]
    fn charger_id_must_be_identifier_like() {
        let named = options(json!({"charger_id": "garage_1", "charger_name": "Garage"})).unwrap();
        assert_eq!(named.config().charger_id, "garage_1");
        assert_eq!(named.config().charger_name, "Garage");
        assert!(matches!(
            options(json!({"charger_id": "garage 1"})),
            Err(PluginError::InvalidParameter { param: "charger_id", .. })
        ));
    }
}
