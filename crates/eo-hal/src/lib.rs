//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Hardware access layer for the charger board and metering chip."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Hardware access for the charge-point controller.
//!
//! Everything that touches a wire goes through three seams: [`RegisterBus`] for
//! full-duplex register exchanges, [`OutputLine`] for reset/enable pins and
//! [`SerialLink`] for the direct UART. The charger board transports and the
//! metering driver are written against those seams only, so the same code runs on
//! the Raspberry Pi backends (`rpi` feature) and on the simulated station.

pub mod calibration;
pub mod error;
pub mod io;
pub mod metering;
pub mod probe;
#[cfg(feature = "rpi")]
pub mod rpi;
pub mod serial;
pub mod transport;

pub use calibration::{ChannelCalibration, CtCalibration, CtChannel, CtReading};
pub use error::{HalError, Result};
pub use io::{OutputLine, RegisterBus, SerialLink};
pub use metering::{CurrentMeter, MeteringDriver, NoMeter};
pub use probe::{identify_board, probe_board, HostBoard};
pub use serial::SerialPortLink;
pub use transport::{
    BridgeUart, DirectSerial, OverrunCounter, Transport, TransportKind, FRAME_TERMINATOR,
};
