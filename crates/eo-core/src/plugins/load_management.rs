//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Site current budget and solar surplus charging."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Load management.
//!
//! Two jobs: clamp the arbitrated request so the whole site stays under its
//! supply budget, and vote for charging from measured solar surplus. The solar
//! vote is gated by a two-state hysteresis so a surplus hovering around the
//! switch-on threshold does not toggle charging every cycle.

use eo_common::config::ModuleParams;
use eo_hal::{ChannelCalibration, CtCalibration};
use eo_protocol::{MAX_AMPS, MIN_CHARGE_AMPS};
use tracing::{debug, info};

use crate::error::PluginError;
use crate::params::{
    resolve, ModuleSettings, ParamDefault, ParamSpec, ResolvedParams, POLL_CADENCE,
};
use crate::plugin::{ChargePlugin, PollContext, SiteLimits};
use crate::smoothing::MovingAverage;

pub const NAME: &str = "loadmanagement";
const SOLAR_WINDOW: usize = 6;

const PARAMS: &[ParamSpec] = &[
    ParamSpec::new("enabled", ParamDefault::Bool(true)),
    POLL_CADENCE,
    ParamSpec::new("solar_enable", ParamDefault::Bool(false)),
    ParamSpec::new("solar_reservation_current", ParamDefault::Int(1)),
    ParamSpec::new("solar_enable_threshold", ParamDefault::Int(7)),
    ParamSpec::new("site_limit_current", ParamDefault::Int(60)),
    ParamSpec::new("simulate_ct_site", ParamDefault::Float(0.0)),
    ParamSpec::new("simulate_ct_vehicle", ParamDefault::Float(0.0)),
    ParamSpec::new("simulate_ct_solar", ParamDefault::Float(0.0)),
    ParamSpec::new("ct_calibration_site", ParamDefault::Float(1.0)),
    ParamSpec::new("ct_calibration_vehicle", ParamDefault::Float(1.0)),
    ParamSpec::new("ct_calibration_solar", ParamDefault::Float(1.0)),
    ParamSpec::new("ct_offset_site", ParamDefault::Float(0.0)),
    ParamSpec::new("ct_offset_vehicle", ParamDefault::Float(0.0)),
    ParamSpec::new("ct_offset_solar", ParamDefault::Float(0.0)),
];

/// Outcome of the site clamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteClamp {
    pub amps: i32,
    pub shortfall: i32,
    pub available: i32,
}

/// Reduce `requested` to what the site budget leaves after non-vehicle load.
///
/// Headroom is bounded to `-MAX_AMPS..=site_limit`, so absurd CT readings
/// clamp the request to zero instead of overflowing.
pub fn site_clamp(requested: i32, site_limit: i32, site_ct: f64, vehicle_ct: f64) -> SiteClamp {
    let non_vehicle = ((site_ct - vehicle_ct) * 100.0).round() / 100.0;
    // may be negative when the house alone exceeds the budget
    let headroom = (f64::from(site_limit) - non_vehicle).trunc();
    let available = if headroom.is_nan() {
        0
    } else {
        headroom.max(f64::from(-MAX_AMPS)).min(f64::from(site_limit)) as i32
    };
    if requested > available {
        SiteClamp {
            amps: available.max(0),
            shortfall: requested.saturating_sub(available),
            available,
        }
    } else {
        SiteClamp {
            amps: requested,
            shortfall: 0,
            available,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarConfig {
    pub enabled: bool,
    /// Amps of surplus kept back for the house.
    pub reservation_current: f64,
    pub enable_threshold: f64,
}

impl Default for SolarConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            reservation_current: 1.0,
            enable_threshold: 7.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadManagementConfig {
    pub settings: ModuleSettings,
    pub site_limit_current: i32,
    pub solar: SolarConfig,
    pub calibration: CtCalibration,
}

impl Default for LoadManagementConfig {
    fn default() -> Self {
        Self {
            settings: ModuleSettings::default(),
            site_limit_current: 60,
            solar: SolarConfig::default(),
            calibration: CtCalibration::default(),
        }
    }
}

fn channel(
    params: &ResolvedParams,
    factor: &'static str,
    offset: &'static str,
    simulated: &'static str,
) -> Result<ChannelCalibration, PluginError> {
    Ok(ChannelCalibration {
        factor: params.float(factor)?,
        offset: params.float(offset)?,
        simulated: params.float(simulated)?,
    })
}

impl LoadManagementConfig {
    fn from_params(params: &ResolvedParams) -> Result<Self, PluginError> {
        let site_limit_current: i32 = params.int_as("site_limit_current")?;
        if site_limit_current < 0 {
            return Err(PluginError::InvalidParameter {
                module: NAME,
                param: "site_limit_current",
                reason: "must not be negative".to_owned(),
            });
        }
        Ok(Self {
            settings: ModuleSettings::from_params(params)?,
            site_limit_current,
            solar: SolarConfig {
                enabled: params.bool("solar_enable")?,
                reservation_current: params.int("solar_reservation_current")? as f64,
                enable_threshold: params.int("solar_enable_threshold")? as f64,
            },
            calibration: CtCalibration {
                site: channel(params, "ct_calibration_site", "ct_offset_site", "simulate_ct_site")?,
                vehicle: channel(
                    params,
                    "ct_calibration_vehicle",
                    "ct_offset_vehicle",
                    "simulate_ct_vehicle",
                )?,
                solar: channel(
                    params,
                    "ct_calibration_solar",
                    "ct_offset_solar",
                    "simulate_ct_solar",
                )?,
            },
        })
    }
}

/// Hysteresis gate for solar charging over a short moving average of the solar CT.
#[derive(Debug, Clone)]
pub struct SolarTracker {
    average: MovingAverage<f64>,
    active: bool,
    sampled: Option<u64>,
}

impl Default for SolarTracker {
    fn default() -> Self {
        Self {
            average: MovingAverage::new(SOLAR_WINDOW),
            active: false,
            sampled: None,
        }
    }
}

impl SolarTracker {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn samples(&self) -> usize {
        self.average.len()
    }

    /// Feed one solar reading and return the vote.
    pub fn update(&mut self, solar_ct: f64, reservation: f64, enable_threshold: f64) -> i32 {
        self.average.push(solar_ct);
        self.evaluate(reservation, enable_threshold)
    }

    /// Like [`SolarTracker::update`], but a reading from an exchange already
    /// sampled only re-evaluates the current average.
    pub fn observe(
        &mut self,
        exchange: Option<u64>,
        solar_ct: f64,
        reservation: f64,
        enable_threshold: f64,
    ) -> i32 {
        if exchange.is_some() && exchange == self.sampled {
            return self.evaluate(reservation, enable_threshold);
        }
        self.sampled = exchange;
        self.update(solar_ct, reservation, enable_threshold)
    }

    fn evaluate(&mut self, reservation: f64, enable_threshold: f64) -> i32 {
        let surplus = self.average.mean() - reservation;
        let stay_threshold = f64::from(MIN_CHARGE_AMPS);
        let was_active = self.active;
        self.active = if self.active {
            surplus >= stay_threshold
        } else {
            surplus >= enable_threshold
        };
        if self.active != was_active {
            info!(module = NAME, active = self.active, surplus, "solar charging state changed");
        }
        if self.active {
            surplus.floor() as i32
        } else {
            0
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Default)]
pub struct LoadManagement {
    params: ResolvedParams,
    config: LoadManagementConfig,
    solar: SolarTracker,
}

impl LoadManagement {
    pub fn new(raw: &ModuleParams) -> Result<Self, PluginError> {
        let mut module = Self::default();
        module.configure(raw)?;
        Ok(module)
    }

    pub fn config(&self) -> &LoadManagementConfig {
        &self.config
    }

    pub fn solar(&self) -> &SolarTracker {
        &self.solar
    }
}

impl ChargePlugin for LoadManagement {
    fn name(&self) -> &'static str {
        NAME
    }

    fn param_spec(&self) -> &'static [ParamSpec] {
        PARAMS
    }

    fn configure(&mut self, raw: &ModuleParams) -> Result<(), PluginError> {
        let params = resolve(NAME, PARAMS, raw);
        let config = LoadManagementConfig::from_params(&params)?;
        if !config.solar.enabled {
            self.solar.reset();
        }
        self.config = config;
        self.params = params;
        Ok(())
    }

    fn params(&self) -> &ResolvedParams {
        &self.params
    }

    fn settings(&self) -> ModuleSettings {
        self.config.settings
    }

    fn poll(&mut self, ctx: &PollContext<'_>) -> Result<Option<i32>, PluginError> {
        let solar = self.config.solar;
        if !solar.enabled {
            return Ok(Some(0));
        }
        let vote = self.solar.observe(
            ctx.charge_cycle,
            ctx.charge.ct.solar,
            solar.reservation_current,
            solar.enable_threshold,
        );
        debug!(module = NAME, solar_ct = ctx.charge.ct.solar, vote, "solar vote");
        Ok(Some(vote))
    }

    fn site_limits(&self) -> Option<SiteLimits> {
        Some(SiteLimits {
            site_limit_current: self.config.site_limit_current,
        })
    }

    fn ct_calibration(&self) -> Option<CtCalibration> {
        Some(self.config.calibration)
    }
}
