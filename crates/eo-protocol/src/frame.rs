//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Packet framing and checksum verification."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use crate::error::{ProtocolError, Result};

pub const PACKET_PREFIX: char = '+';
/// Fixed discovery body, part of the protocol.
pub const DISCOVER_BODY: &str = "5C";
pub const ADDRESS_LEN: usize = 8;
const CHECKSUM_LEN: usize = 2;
const PREFIX_LEN: usize = 1;

/// Commands understood by the charger controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetLimit,
    Discover,
}

impl Command {
    pub fn code(self) -> char {
        match self {
            Command::SetLimit => '0',
            Command::Discover => '1',
        }
    }
}

/// Sum of the ASCII byte values modulo 256, as two upper-case hex digits.
pub fn checksum(text: &str) -> String {
    let sum = text.bytes().fold(0u8, |acc, byte| acc.wrapping_add(byte));
    format!("{:02X}", sum)
}

/// Check that the last two characters of `frame` are the checksum of the rest.
pub fn verify(frame: &str) -> bool {
    if frame.len() < CHECKSUM_LEN || !frame.is_ascii() {
        return false;
    }
    let (body, received) = frame.split_at(frame.len() - CHECKSUM_LEN);
    checksum(body).eq_ignore_ascii_case(received)
}

/// Assemble an outbound packet with its checksum. The terminator is the transport's job.
pub fn build_packet(command: Command, address: Option<&str>, payload: &str) -> String {
    let mut packet = String::with_capacity(1 + 1 + ADDRESS_LEN + payload.len() + CHECKSUM_LEN);
    packet.push(PACKET_PREFIX);
    packet.push(command.code());
    if let Some(address) = address {
        packet.push_str(address);
    }
    packet.push_str(payload);
    let sum = checksum(&packet);
    packet.push_str(&sum);
    packet
}

pub fn discover_packet() -> String {
    build_packet(Command::Discover, None, DISCOVER_BODY)
}

/// A reply whose checksum has been verified.
///
/// [`ResponseFrame::text`] keeps the one-character prefix and the checksum so that
/// telemetry offsets can index it directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    text: String,
}

impl ResponseFrame {
    /// Validate raw reply bytes: ASCII only, trailing line endings dropped, checksum intact.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if !raw.is_ascii() {
            return Err(ProtocolError::NonAscii);
        }
        let text = std::str::from_utf8(raw)
            .map_err(|_| ProtocolError::NonAscii)?
            .trim_end_matches(['\r', '\n', '\0']);
        if text.len() < PREFIX_LEN + CHECKSUM_LEN {
            return Err(ProtocolError::ShortFrame(text.len()));
        }
        let (body, received) = text.split_at(text.len() - CHECKSUM_LEN);
        let computed = checksum(body);
        if !computed.eq_ignore_ascii_case(received) {
            return Err(ProtocolError::Checksum {
                computed,
                received: received.to_owned(),
            });
        }
        Ok(Self {
            text: text.to_owned(),
        })
    }

    /// Full frame: prefix, body and checksum.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Payload between the prefix and the checksum.
    pub fn body(&self) -> &str {
        &self.text[PREFIX_LEN..self.text.len() - CHECKSUM_LEN]
    }

    pub fn checksum(&self) -> &str {
        &self.text[self.text.len() - CHECKSUM_LEN..]
    }
}
