//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Current-transformer channels, calibration and readings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter};

/// The three CT inputs of the metering chip.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CtChannel {
    Site,
    Vehicle,
    Solar,
}

/// Per-channel correction: `raw * factor + offset`, or a fixed bench value when `simulated > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelCalibration {
    pub factor: f64,
    pub offset: f64,
    pub simulated: f64,
}

impl Default for ChannelCalibration {
    fn default() -> Self {
        Self {
            factor: 1.0,
            offset: 0.0,
            simulated: 0.0,
        }
    }
}

impl ChannelCalibration {
    pub fn is_simulated(&self) -> bool {
        self.simulated > 0.0
    }

    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.factor + self.offset
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CtCalibration {
    pub site: ChannelCalibration,
    pub vehicle: ChannelCalibration,
    pub solar: ChannelCalibration,
}

impl CtCalibration {
    pub fn channel(&self, channel: CtChannel) -> &ChannelCalibration {
        match channel {
            CtChannel::Site => &self.site,
            CtChannel::Vehicle => &self.vehicle,
            CtChannel::Solar => &self.solar,
        }
    }
}

/// One acquisition of all three channels, calibrated and raw, in amps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CtReading {
    pub site: f64,
    pub vehicle: f64,
    pub solar: f64,
    pub raw_site: f64,
    pub raw_vehicle: f64,
    pub raw_solar: f64,
}

impl CtReading {
    pub fn get(&self, channel: CtChannel) -> f64 {
        match channel {
            CtChannel::Site => self.site,
            CtChannel::Vehicle => self.vehicle,
            CtChannel::Solar => self.solar,
        }
    }

    pub fn raw(&self, channel: CtChannel) -> f64 {
        match channel {
            CtChannel::Site => self.raw_site,
            CtChannel::Vehicle => self.raw_vehicle,
            CtChannel::Solar => self.raw_solar,
        }
    }

    pub(crate) fn set(&mut self, channel: CtChannel, raw: f64, calibrated: f64) {
        match channel {
            CtChannel::Site => {
                self.raw_site = raw;
                self.site = calibrated;
            }
            CtChannel::Vehicle => {
                self.raw_vehicle = raw;
                self.vehicle = calibrated;
            }
            CtChannel::Solar => {
                self.raw_solar = raw;
                self.solar = calibrated;
            }
        }
    }
}
