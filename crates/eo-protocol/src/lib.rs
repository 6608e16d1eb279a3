//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Charger board protocol engine."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Charger controller board protocol.
//!
//! Packets are ASCII: `+`, a one-character command, the 8-character board
//! address (absent for discovery), a payload and a two-digit hex checksum of
//! everything before it. Replies carry the same checksum convention around a
//! fixed-offset record of hex fields.

pub mod duty;
pub mod engine;
pub mod error;
pub mod frame;
pub mod state;
pub mod telemetry;

pub use duty::{duty_for_amps, encode_duty, MAX_AMPS, MIN_CHARGE_AMPS};
pub use engine::{ChargerEngine, ChargerReading};
pub use error::{ProtocolError, Result};
pub use frame::{checksum, verify, Command, ResponseFrame};
pub use state::{ChargerState, StateFamily};
pub use telemetry::ChargerTelemetry;
