//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Charger board transport through a register-programmed UART bridge."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::{
    pulse_reset, OverrunCounter, Transport, TransportKind, FRAME_TERMINATOR, POLL_SLEEP,
    QUIET_GAP,
};
use crate::error::{HalError, Result};
use crate::io::{OutputLine, RegisterBus};

pub(crate) mod reg {
    pub const DLL: u8 = 0x00;
    pub const DLH: u8 = 0x01;
    pub const EFR: u8 = 0x02;
    pub const FCR: u8 = 0x02;
    pub const LCR: u8 = 0x03;
    pub const LSR: u8 = 0x05;
    pub const RXLVL: u8 = 0x09;
    pub const EFCR: u8 = 0x0F;
}

const READ_FLAG: u8 = 0x80;
const FIFO_WRITE: u8 = 0x00;
const FIFO_READ: u8 = 0x80;
const LSR_OVERRUN: u8 = 0x02;
/// Reset both FIFOs and keep them enabled.
const FCR_RESET_FIFOS: u8 = 0x07;

/// Divisor latch, enhanced features, 8N1 framing, FIFOs, then half-duplex
/// driver control, in the order the chip expects them.
const INIT_SEQUENCE: [(u8, u8); 8] = [
    (reg::LCR, 0x80),
    (reg::DLL, 0x01),
    (reg::DLH, 0x00),
    (reg::LCR, 0xBF),
    (reg::EFR, 0x00),
    (reg::LCR, 0x03),
    (reg::FCR, FCR_RESET_FIFOS),
    (reg::EFCR, 0x30),
];

/// UART bridge reached over a register bus.
pub struct BridgeUart {
    bus: Box<dyn RegisterBus>,
    reset_line: Box<dyn OutputLine>,
    overruns: OverrunCounter,
    initialised: bool,
}

impl BridgeUart {
    pub fn new(
        bus: Box<dyn RegisterBus>,
        reset_line: Box<dyn OutputLine>,
        overruns: OverrunCounter,
    ) -> Self {
        Self {
            bus,
            reset_line,
            overruns,
            initialised: false,
        }
    }

    fn register_set(&mut self, register: u8, value: u8) -> Result<()> {
        self.bus.transfer(&[register << 3, value])?;
        Ok(())
    }

    fn register_get(&mut self, register: u8) -> Result<u8> {
        let reply = self.bus.transfer(&[(register << 3) | READ_FLAG, 0])?;
        reply.get(1).copied().ok_or(HalError::ShortReply {
            expected: 2,
            actual: reply.len(),
        })
    }

    fn initialise(&mut self) -> Result<()> {
        for (register, value) in INIT_SEQUENCE {
            self.register_set(register, value)?;
        }
        self.initialised = true;
        debug!("uart bridge programmed for 8N1");
        Ok(())
    }

    fn ensure_initialised(&mut self) -> Result<()> {
        if self.initialised {
            return Ok(());
        }
        self.initialise()
    }
}

impl Transport for BridgeUart {
    fn kind(&self) -> TransportKind {
        TransportKind::Bridge
    }

    fn reset(&mut self) -> Result<()> {
        pulse_reset(self.reset_line.as_mut())?;
        self.initialise()
    }

    fn transmit(&mut self, command: &[u8]) -> Result<()> {
        self.ensure_initialised()?;
        self.register_set(reg::FCR, FCR_RESET_FIFOS)?;
        let mut frame = Vec::with_capacity(command.len() + 2);
        frame.push(FIFO_WRITE);
        frame.extend_from_slice(command);
        frame.push(FRAME_TERMINATOR);
        trace!(frame = %String::from_utf8_lossy(command), "bridge transmit");
        self.bus.transfer(&frame)?;
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        self.ensure_initialised()?;
        let started = Instant::now();
        let mut collected = Vec::new();
        let mut last_data = started;

        while started.elapsed() < timeout {
            let pending = self.register_get(reg::RXLVL)? as usize;
            if pending > 0 {
                let mut frame = vec![0u8; pending + 1];
                frame[0] = FIFO_READ;
                let reply = self.bus.transfer(&frame)?;
                collected.extend_from_slice(reply.get(1..).unwrap_or_default());
                last_data = Instant::now();

                let status = self.register_get(reg::LSR)?;
                if status & LSR_OVERRUN != 0 {
                    let total = self.overruns.increment();
                    warn!(
                        discarded = collected.len(),
                        overruns = total,
                        lsr = %hex::encode([status]),
                        "uart bridge overrun, dropping reply"
                    );
                    return Err(HalError::Overrun);
                }
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
            trace!(bytes = collected.len(), "bridge receive");
            Ok(Some(collected))
        }
    }

    fn overruns(&self) -> OverrunCounter {
        self.overruns.clone()
    }
}
