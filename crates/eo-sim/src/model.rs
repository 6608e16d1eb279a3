//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Charger board and site electrical model."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;

use eo_common::config::SimulationConfig;
use eo_hal::CtChannel;
use eo_protocol::frame::{checksum, verify, Command, ADDRESS_LEN, DISCOVER_BODY};
use eo_protocol::ChargerState;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

/// Peak-to-peak count that reads as roughly 230 V RMS with the default correction.
pub const SIM_MAINS_RAW: u32 = 0x346;
const FIRMWARE_VERSION: u32 = 0x1E;
const MAINS_FREQUENCY: u32 = 0x32;
const AMPS_PER_DUTY: f64 = 0.062;
const SECONDS_PER_EXCHANGE: u32 = 5;
/// CT noise amplitude in amps.
const CT_JITTER: f64 = 0.05;

/// Misbehaviour queued for upcoming exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reply is cut short and the bridge flags a receive overrun.
    Overrun,
    /// No reply at all.
    Silence,
    /// Reply with a wrong checksum.
    CorruptChecksum,
}

/// What the board puts on the wire for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Frame(String),
    Overrun(String),
    Silent,
}

pub struct StationModel {
    address: String,
    state: ChargerState,
    duty: u16,
    vehicle_plugged: bool,
    vehicle_max_current: f64,
    site_current: f64,
    solar_current: f64,
    uptime: u32,
    charge_time: u32,
    commands: u64,
    faults: VecDeque<Fault>,
    rng: StdRng,
    jitter: bool,
}

impl StationModel {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            address: format!("{:08X}", (config.random_seed as u32) ^ 0xE0A5_0000),
            state: ChargerState::Idle,
            duty: 0,
            vehicle_plugged: config.vehicle_plugged,
            vehicle_max_current: config.vehicle_max_current.unwrap_or(32.0),
            site_current: config.site_current,
            solar_current: config.solar_current,
            uptime: 0,
            charge_time: 0,
            commands: 0,
            faults: VecDeque::new(),
            rng: StdRng::seed_from_u64(config.random_seed),
            jitter: false,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ChargerState {
        self.state
    }

    pub fn duty(&self) -> u16 {
        self.duty
    }

    /// Commands received, answered or not.
    pub fn commands_received(&self) -> u64 {
        self.commands
    }

    pub fn inject(&mut self, fault: Fault, count: usize) {
        self.faults.extend(std::iter::repeat(fault).take(count));
    }

    pub fn set_site_current(&mut self, amps: f64) {
        self.site_current = amps;
    }

    pub fn set_solar_current(&mut self, amps: f64) {
        self.solar_current = amps;
    }

    pub fn plug_vehicle(&mut self, plugged: bool) {
        self.vehicle_plugged = plugged;
    }

    /// Add seeded noise to CT readings.
    pub fn enable_jitter(&mut self, enabled: bool) {
        self.jitter = enabled;
    }

    /// Current the vehicle is drawing right now.
    pub fn vehicle_current(&self) -> f64 {
        if self.state.is_charging() {
            (f64::from(self.duty) * AMPS_PER_DUTY).min(self.vehicle_max_current)
        } else {
            0.0
        }
    }

    /// What a CT clamp on `channel` would measure. The site CT sees the household
    /// load plus the vehicle.
    pub fn ct_amps(&mut self, channel: CtChannel) -> f64 {
        let amps = match channel {
            CtChannel::Site => self.site_current + self.vehicle_current(),
            CtChannel::Vehicle => self.vehicle_current(),
            CtChannel::Solar => self.solar_current,
        };
        if self.jitter && amps > 0.0 {
            (amps + self.rng.gen_range(-CT_JITTER..CT_JITTER)).max(0.0)
        } else {
            amps
        }
    }

    /// Answer one command (terminator already stripped).
    pub fn handle(&mut self, command: &str) -> Reply {
        self.commands += 1;
        let fault = self.faults.pop_front();
        if fault == Some(Fault::Silence) || !verify(command) {
            trace!(command, "simulated board stays silent");
            return Reply::Silent;
        }

        let body = &command[..command.len() - 2];
        let reply = match body.strip_prefix('+') {
            Some(rest) if rest.starts_with(Command::Discover.code()) => {
                if rest[1..] != *DISCOVER_BODY {
                    return Reply::Silent;
                }
                format!("!{}", self.address)
            }
            Some(rest) if rest.starts_with(Command::SetLimit.code()) => {
                let rest = &rest[1..];
                if rest.len() != ADDRESS_LEN + 3 || rest[..ADDRESS_LEN] != *self.address {
                    return Reply::Silent;
                }
                match u16::from_str_radix(&rest[ADDRESS_LEN..], 16) {
                    Ok(duty) => self.apply_duty(duty),
                    Err(_) => return Reply::Silent,
                }
                self.telemetry_body()
            }
            _ => return Reply::Silent,
        };

        let sum = checksum(&reply);
        match fault {
            Some(Fault::CorruptChecksum) => Reply::Frame(format!("{}{}", reply, corrupt(&sum))),
            Some(Fault::Overrun) => {
                let framed = format!("{}{}", reply, sum);
                Reply::Overrun(framed[..framed.len() / 2].to_owned())
            }
            _ => Reply::Frame(format!("{}{}", reply, sum)),
        }
    }

    fn apply_duty(&mut self, duty: u16) {
        self.duty = duty;
        self.uptime = self.uptime.wrapping_add(SECONDS_PER_EXCHANGE);
        let next = match (self.vehicle_plugged, duty > 0, self.state) {
            (false, _, _) => ChargerState::Idle,
            (true, false, _) => ChargerState::CarConnected,
            (true, true, ChargerState::ChargingStart | ChargerState::Charging) => {
                ChargerState::Charging
            }
            (true, true, _) => ChargerState::ChargingStart,
        };
        if next != self.state {
            debug!(from = %self.state, to = %next, duty, "simulated charger state change");
        }
        self.state = next;
        if self.state.is_charging() {
            self.charge_time = self.charge_time.wrapping_add(SECONDS_PER_EXCHANGE);
        }
    }

    /// Telemetry record without checksum, laid out at the board's fixed offsets.
    fn telemetry_body(&mut self) -> String {
        let vehicle = self.vehicle_current();
        let phase = |amps: f64| ((amps * 10.0).round() as u32).min(0xFFF);
        let relay = u32::from(self.state.is_charging());
        let plug = u32::from(self.vehicle_plugged);
        format!(
            "!{:02X}{:01X}{:03X}{:03X}{:03X}{:03X}{:03X}{:03X}{:03X}{:02X}{:01X}{:01X}{:03X}{:04X}{:04X}{:04X}{:02X}{:01X}{:01X}{:02X}{:03X}{}{:03X}{:03X}{:03X}{:03X}{:03X}{:01X}",
            FIRMWARE_VERSION,
            0u32,
            if self.vehicle_plugged { 0x0B4u32 } else { 0x0C8 },
            self.duty,
            if self.vehicle_plugged { 0x0C8u32 } else { 0 },
            SIM_MAINS_RAW,
            0u32,
            0x010u32,
            MAINS_FREQUENCY,
            self.state.id(),
            relay,
            plug,
            self.duty,
            0u32,
            self.uptime & 0xFFFF,
            self.charge_time & 0xFFFF,
            0u32,
            plug,
            1u32,
            self.rng.gen::<u8>(),
            32u32,
            self.address,
            0u32,
            0u32,
            phase(vehicle),
            0u32,
            0u32,
            0u32,
        )
    }
}

fn corrupt(sum: &str) -> String {
    let value = u8::from_str_radix(sum, 16).unwrap_or(0);
    format!("{:02X}", value.wrapping_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> StationModel {
        StationModel::new(&SimulationConfig::default())
    }

    fn framed(body: &str) -> String {
        format!("{}{}", body, checksum(body))
    }

    #[test]
    fn telemetry_body_has_fixed_length() {
        let mut model = model();
        let reply = model.telemetry_body();
        assert_eq!(reply.len(), 77);
    }

    #[test]
    fn discovery_returns_address() {
        let mut model = model();
        let reply = model.handle(&framed("+15C"));
        let expected = framed(&format!("!{}", model.address()));
        assert_eq!(reply, Reply::Frame(expected));
    }

    #[test]
    fn bad_checksum_gets_no_reply() {
        let mut model = model();
        assert_eq!(model.handle("+15C00"), Reply::Silent);
        assert_eq!(model.commands_received(), 1);
    }

    #[test]
    fn charging_follows_duty() {
        let mut model = model();
        let address = model.address().to_owned();
        model.handle(&framed(&format!("+0{}204", address)));
        assert_eq!(model.state(), ChargerState::ChargingStart);
        model.handle(&framed(&format!("+0{}204", address)));
        assert_eq!(model.state(), ChargerState::Charging);
        assert!((model.vehicle_current() - 31.992).abs() < 1e-9);
        model.handle(&framed(&format!("+0{}000", address)));
        assert_eq!(model.state(), ChargerState::CarConnected);
        assert_eq!(model.vehicle_current(), 0.0);
    }

    #[test]
    fn faults_are_consumed_in_order() {
        let mut model = model();
        model.inject(Fault::Silence, 1);
        model.inject(Fault::CorruptChecksum, 1);
        assert_eq!(model.handle(&framed("+15C")), Reply::Silent);
        match model.handle(&framed("+15C")) {
            Reply::Frame(text) => assert!(!verify(&text)),
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(matches!(model.handle(&framed("+15C")), Reply::Frame(_)));
    }
}
