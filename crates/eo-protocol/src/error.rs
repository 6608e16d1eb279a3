//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Protocol engine error taxonomy."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use eo_hal::HalError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("requested current {0} A is outside 0..=32")]
    OutOfRange(i32),
    #[error("charger controller address unknown, discovery failed")]
    NotConnected,
    #[error("no response from charger controller")]
    NoResponse,
    #[error("receive overrun, reply discarded")]
    Overrun,
    #[error("response contains non-ASCII bytes")]
    NonAscii,
    #[error("response too short: {0} characters")]
    ShortFrame(usize),
    #[error("checksum mismatch: computed {computed}, received {received}")]
    Checksum { computed: String, received: String },
    #[error("malformed telemetry field {field}: {value:?}")]
    Malformed { field: &'static str, value: String },
    #[error("transport failure: {0}")]
    Transport(#[source] HalError),
    #[error("metering failure: {0}")]
    Metering(#[source] HalError),
}

impl ProtocolError {
    /// Failures of a single exchange that a fresh attempt could clear.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProtocolError::NoResponse
                | ProtocolError::Overrun
                | ProtocolError::NonAscii
                | ProtocolError::ShortFrame(_)
                | ProtocolError::Checksum { .. }
                | ProtocolError::Malformed { .. }
                | ProtocolError::Transport(_)
        )
    }
}

impl From<HalError> for ProtocolError {
    fn from(err: HalError) -> Self {
        match err {
            HalError::Overrun => ProtocolError::Overrun,
            other => ProtocolError::Transport(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
