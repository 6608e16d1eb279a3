//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Error types raised by hardware access."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use thiserror::Error;

/// Failures surfaced by transports, the metering driver and the pin/bus backends.
#[derive(Debug, Error)]
pub enum HalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("register bus error: {0}")]
    Bus(String),
    #[error("receive overrun, bytes were lost")]
    Overrun,
    #[error("unsupported register size {0}, expected 1..=4 bytes")]
    UnsupportedSize(usize),
    #[error("short register bus reply: expected {expected} bytes, got {actual}")]
    ShortReply { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, HalError>;
