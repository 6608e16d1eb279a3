//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Direct UART transport to the charger board."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

use super::{pulse_reset, Transport, TransportKind, FRAME_TERMINATOR, POLL_SLEEP, QUIET_GAP};
use crate::error::Result;
use crate::io::{OutputLine, SerialLink};

/// Thin pass-through to a serial link. Both buffers are flushed before every
/// transmit so a late reply to an earlier command can never be mistaken for
/// the answer to the next one.
pub struct DirectSerial {
    link: Box<dyn SerialLink>,
    reset_line: Box<dyn OutputLine>,
}

impl DirectSerial {
    pub fn new(link: Box<dyn SerialLink>, reset_line: Box<dyn OutputLine>) -> Self {
        Self { link, reset_line }
    }
}

impl Transport for DirectSerial {
    fn kind(&self) -> TransportKind {
        TransportKind::DirectSerial
    }

    fn reset(&mut self) -> Result<()> {
        pulse_reset(self.reset_line.as_mut())
    }

    fn transmit(&mut self, command: &[u8]) -> Result<()> {
        self.link.clear_buffers()?;
        let mut frame = Vec::with_capacity(command.len() + 1);
        frame.extend_from_slice(command);
        frame.push(FRAME_TERMINATOR);
        trace!(frame = %String::from_utf8_lossy(command), "serial transmit");
        self.link.write_all(&frame)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let started = Instant::now();
        let mut collected = Vec::new();
        let mut last_data = started;
        let mut buf = [0u8; 256];

        while started.elapsed() < timeout {
            let pending = self.link.bytes_to_read()?;
            if pending > 0 {
                let want = pending.min(buf.len());
                let read = self.link.read(&mut buf[..want])?;
                collected.extend_from_slice(&buf[..read]);
                last_data = Instant::now();
                continue;
            }
            if !collected.is_empty() && last_data.elapsed() >= QUIET_GAP {
                break;
            }
            thread::sleep(POLL_SLEEP);
        }

        if collected.is_empty() {
            Ok(None)
        } else {
            trace!(bytes = collected.len(), "serial receive");
            Ok(Some(collected))
        }
    }
}
