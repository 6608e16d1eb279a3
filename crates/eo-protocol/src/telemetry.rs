//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fixed-offset telemetry record decoding."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::frame::ResponseFrame;
use crate::state::ChargerState;

/// Character ranges into the full reply text (prefix at index 0).
mod offset {
    use std::ops::Range;

    pub const VERSION: Range<usize> = 1..3;
    pub const SWITCH_SETTING: Range<usize> = 3..4;
    pub const PILOT_VOLTAGE: Range<usize> = 4..7;
    pub const CHARGE_DUTY: Range<usize> = 7..10;
    pub const PLUG_VOLTAGE: Range<usize> = 10..13;
    pub const LIVE_VOLTAGE: Range<usize> = 13..16;
    pub const NEUTRAL_VOLTAGE: Range<usize> = 16..19;
    pub const DAYLIGHT: Range<usize> = 19..22;
    pub const MAINS_FREQUENCY: Range<usize> = 22..25;
    pub const STATE: Range<usize> = 25..27;
    pub const RELAY_STATE: Range<usize> = 27..28;
    pub const PLUG_STATE: Range<usize> = 28..29;
    pub const DUTY_LIMIT: Range<usize> = 29..32;
    pub const DUTY_TIMER: Range<usize> = 32..36;
    pub const UPTIME: Range<usize> = 36..40;
    pub const CHARGE_TIME: Range<usize> = 40..44;
    pub const MAINS_STATE: Range<usize> = 44..46;
    pub const CP_LINE_STATE: Range<usize> = 46..47;
    pub const STATION_ID: Range<usize> = 47..48;
    pub const RANDOM: Range<usize> = 48..50;
    pub const MAX_CURRENT: Range<usize> = 50..53;
    pub const PERSISTENT_ID: Range<usize> = 53..61;
    pub const WATCHDOG_CURRENT: Range<usize> = 61..64;
    pub const WATCHDOG_TIME: Range<usize> = 64..67;
    pub const PHASE_CURRENT: [Range<usize>; 3] = [67..70, 70..73, 73..76];
    pub const ECO7_SWITCH: Range<usize> = 76..77;
    pub const CHECKSUM: Range<usize> = 77..79;
}

/// Length of a complete telemetry reply including prefix and checksum.
pub const TELEMETRY_FRAME_LEN: usize = 79;

/// One decoded telemetry reply. Raw counters are kept in board units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargerTelemetry {
    pub firmware_version: u32,
    pub switch_setting: u32,
    pub pilot_voltage: u32,
    pub charge_duty: u32,
    pub plug_voltage: u32,
    /// Peak-to-peak mains voltage in board counts.
    pub live_voltage_raw: u32,
    pub neutral_voltage: u32,
    pub daylight: u32,
    pub mains_frequency: u32,
    pub state_id: u8,
    pub state: ChargerState,
    pub relay_state: u32,
    pub plug_state: u32,
    pub duty_limit: u32,
    pub duty_timer: u32,
    pub uptime: u32,
    pub charge_time: u32,
    pub mains_state: u32,
    pub cp_line_state: u32,
    pub station_id: u32,
    pub random: u32,
    pub max_current: u32,
    pub persistent_id: String,
    pub watchdog_current: u32,
    pub watchdog_time: u32,
    /// Amps per phase.
    pub phase_currents: [f64; 3],
    pub eco7_switch: u32,
    pub checksum: String,
}

impl ChargerTelemetry {
    pub fn decode(frame: &ResponseFrame) -> Result<Self> {
        let text = frame.text();
        if text.len() < TELEMETRY_FRAME_LEN {
            return Err(ProtocolError::ShortFrame(text.len()));
        }
        let hex = |field: &'static str, range: Range<usize>| -> Result<u32> {
            let slice = &text[range];
            u32::from_str_radix(slice, 16).map_err(|_| ProtocolError::Malformed {
                field,
                value: slice.to_owned(),
            })
        };

        let state_id = hex("charger_state", offset::STATE)?;
        let mut phase_currents = [0.0; 3];
        for (slot, range) in phase_currents.iter_mut().zip(offset::PHASE_CURRENT) {
            *slot = f64::from(hex("phase_current", range)?) / 10.0;
        }

        Ok(Self {
            firmware_version: hex("version", offset::VERSION)?,
            switch_setting: hex("switch_setting", offset::SWITCH_SETTING)?,
            pilot_voltage: hex("pilot_voltage", offset::PILOT_VOLTAGE)?,
            charge_duty: hex("charge_duty", offset::CHARGE_DUTY)?,
            plug_voltage: hex("plug_voltage", offset::PLUG_VOLTAGE)?,
            live_voltage_raw: hex("live_voltage", offset::LIVE_VOLTAGE)?,
            neutral_voltage: hex("neutral_voltage", offset::NEUTRAL_VOLTAGE)?,
            daylight: hex("daylight", offset::DAYLIGHT)?,
            mains_frequency: hex("mains_frequency", offset::MAINS_FREQUENCY)?,
            // two hex digits always fit
            state_id: state_id as u8,
            state: ChargerState::from_id(state_id as u8),
            relay_state: hex("relay_state", offset::RELAY_STATE)?,
            plug_state: hex("plug_state", offset::PLUG_STATE)?,
            duty_limit: hex("duty_limit", offset::DUTY_LIMIT)?,
            duty_timer: hex("duty_timer", offset::DUTY_TIMER)?,
            uptime: hex("uptime", offset::UPTIME)?,
            charge_time: hex("charge_time", offset::CHARGE_TIME)?,
            mains_state: hex("mains_state", offset::MAINS_STATE)?,
            cp_line_state: hex("cp_line_state", offset::CP_LINE_STATE)?,
            station_id: hex("station_id", offset::STATION_ID)?,
            random: hex("random", offset::RANDOM)?,
            max_current: hex("max_current", offset::MAX_CURRENT)?,
            persistent_id: text[offset::PERSISTENT_ID].to_owned(),
            watchdog_current: hex("watchdog_current", offset::WATCHDOG_CURRENT)?,
            watchdog_time: hex("watchdog_time", offset::WATCHDOG_TIME)?,
            phase_currents,
            eco7_switch: hex("eco7_switch", offset::ECO7_SWITCH)?,
            checksum: text[offset::CHECKSUM].to_owned(),
        })
    }

    /// RMS line voltage: `raw / 2 / sqrt(2) * correction`.
    pub fn live_voltage_rms(&self, correction: f64) -> f64 {
        f64::from(self.live_voltage_raw) / 2.0 / std::f64::consts::SQRT_2 * correction
    }

    pub fn relay_closed(&self) -> bool {
        self.relay_state != 0
    }
}
