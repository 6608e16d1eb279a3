//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Pilot duty encoding for requested current."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---

/// Highest current the station will ever advertise.
pub const MAX_AMPS: i32 = 32;
/// Below this the pilot advertises no current at all.
pub const MIN_CHARGE_AMPS: i32 = 6;
/// Amps per duty count of the pilot PWM.
const AMPS_PER_COUNT: f64 = 0.062;

/// Pilot duty count for `amps`; callers must keep `amps` within `0..=MAX_AMPS`.
pub fn duty_for_amps(amps: u8) -> u16 {
    if i32::from(amps) < MIN_CHARGE_AMPS {
        return 0;
    }
    (f64::from(amps) / AMPS_PER_COUNT).round() as u16
}

/// Three upper-case hex digits, as carried in the SET_LIMIT payload.
pub fn encode_duty(duty: u16) -> String {
    format!("{:03X}", duty)
}
