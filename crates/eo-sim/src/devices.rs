//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulated serial link, UART bridge, metering chip and pins."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use eo_hal::metering::reg as meter_reg;
use eo_hal::{CtChannel, HalError, OutputLine, RegisterBus, SerialLink, FRAME_TERMINATOR};
use parking_lot::Mutex;

use crate::model::{Reply, StationModel};

/// Output pin that remembers every level it was driven to.
#[derive(Debug, Clone, Default)]
pub struct SimLine {
    levels: Arc<Mutex<Vec<bool>>>,
}

impl SimLine {
    pub fn levels(&self) -> Vec<bool> {
        self.levels.lock().clone()
    }
}

impl OutputLine for SimLine {
    fn set_high(&mut self) -> eo_hal::Result<()> {
        self.levels.lock().push(true);
        Ok(())
    }

    fn set_low(&mut self) -> eo_hal::Result<()> {
        self.levels.lock().push(false);
        Ok(())
    }
}

/// Feed one terminated command to the model and return the bytes the board sends back.
fn answer(model: &Mutex<StationModel>, command: &[u8]) -> (Vec<u8>, bool) {
    let text = String::from_utf8_lossy(command);
    match model.lock().handle(&text) {
        Reply::Frame(frame) => {
            let mut bytes = frame.into_bytes();
            bytes.push(FRAME_TERMINATOR);
            (bytes, false)
        }
        Reply::Overrun(partial) => (partial.into_bytes(), true),
        Reply::Silent => (Vec::new(), false),
    }
}

/// UART as seen by the direct transport. A plain UART cannot flag overruns, so a
/// truncated reply simply arrives short.
pub struct SimSerialLink {
    model: Arc<Mutex<StationModel>>,
    outbound: Vec<u8>,
    inbound: VecDeque<u8>,
}

impl SimSerialLink {
    pub fn new(model: Arc<Mutex<StationModel>>) -> Self {
        Self {
            model,
            outbound: Vec::new(),
            inbound: VecDeque::new(),
        }
    }
}

impl SerialLink for SimSerialLink {
    fn write_all(&mut self, bytes: &[u8]) -> eo_hal::Result<()> {
        for &byte in bytes {
            if byte == FRAME_TERMINATOR {
                let command = std::mem::take(&mut self.outbound);
                let (reply, _) = answer(&self.model, &command);
                self.inbound.extend(reply);
            } else {
                self.outbound.push(byte);
            }
        }
        Ok(())
    }

    fn bytes_to_read(&mut self) -> eo_hal::Result<usize> {
        Ok(self.inbound.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> eo_hal::Result<usize> {
        let n = buf.len().min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn clear_buffers(&mut self) -> eo_hal::Result<()> {
        self.outbound.clear();
        self.inbound.clear();
        Ok(())
    }
}

const BRIDGE_FIFO_DEPTH: usize = 64;
const BRIDGE_LCR: u8 = 0x03;
const BRIDGE_FCR: u8 = 0x02;
const BRIDGE_LSR: u8 = 0x05;
const BRIDGE_RXLVL: u8 = 0x09;
const LCR_DIVISOR_LATCH: u8 = 0x80;
const LSR_OVERRUN: u8 = 0x02;
const FCR_RX_RESET: u8 = 0x02;

/// UART bridge chip register model in front of the station.
pub struct SimBridgeBus {
    model: Arc<Mutex<StationModel>>,
    registers: HashMap<u8, u8>,
    rx: VecDeque<u8>,
    overrun: bool,
}

impl SimBridgeBus {
    pub fn new(model: Arc<Mutex<StationModel>>) -> Self {
        Self {
            model,
            registers: HashMap::new(),
            rx: VecDeque::new(),
            overrun: false,
        }
    }

    fn lcr(&self) -> u8 {
        self.registers.get(&BRIDGE_LCR).copied().unwrap_or(0)
    }
}

impl RegisterBus for SimBridgeBus {
    fn transfer(&mut self, frame: &[u8]) -> eo_hal::Result<Vec<u8>> {
        let (&header, payload) = frame
            .split_first()
            .ok_or_else(|| HalError::Bus("empty bridge frame".to_owned()))?;
        let mut reply = vec![0u8; frame.len()];
        let register = (header & 0x7F) >> 3;

        if header & 0x80 != 0 {
            match register {
                0 => {
                    for slot in reply.iter_mut().skip(1) {
                        *slot = self.rx.pop_front().unwrap_or(0);
                    }
                }
                BRIDGE_RXLVL => reply[1] = self.rx.len().min(BRIDGE_FIFO_DEPTH) as u8,
                BRIDGE_LSR => {
                    reply[1] = if self.overrun { LSR_OVERRUN } else { 0 };
                    self.overrun = false;
                }
                other => reply[1] = self.registers.get(&other).copied().unwrap_or(0),
            }
            return Ok(reply);
        }

        if register == 0 && self.lcr() & LCR_DIVISOR_LATCH == 0 {
            // transmit holding register
            if let Some((&FRAME_TERMINATOR, command)) = payload.split_last() {
                let (bytes, overrun) = answer(&self.model, command);
                self.rx.extend(bytes);
                self.overrun = overrun;
            }
            return Ok(reply);
        }

        if let Some(&value) = payload.first() {
            if register == BRIDGE_FCR && value & FCR_RX_RESET != 0 {
                self.rx.clear();
                self.overrun = false;
            }
            self.registers.insert(register, value);
        }
        Ok(reply)
    }
}

/// Energy-monitoring chip register file; RMS registers follow the station's CTs.
pub struct SimMeterBus {
    model: Arc<Mutex<StationModel>>,
    registers: HashMap<u16, u32>,
    scale: f64,
}

impl SimMeterBus {
    pub fn new(model: Arc<Mutex<StationModel>>, scale: f64) -> Self {
        let mut registers = HashMap::new();
        registers.insert(meter_reg::VERSION, 0x04);
        Self {
            model,
            registers,
            scale,
        }
    }

    fn read_register(&self, register: u16) -> u32 {
        let channel = match register {
            meter_reg::AIRMS => Some(CtChannel::Site),
            meter_reg::BIRMS => Some(CtChannel::Vehicle),
            meter_reg::CIRMS => Some(CtChannel::Solar),
            _ => None,
        };
        match channel {
            Some(channel) => (self.model.lock().ct_amps(channel) * self.scale).round() as u32,
            None => self.registers.get(&register).copied().unwrap_or(0),
        }
    }
}

impl RegisterBus for SimMeterBus {
    fn transfer(&mut self, frame: &[u8]) -> eo_hal::Result<Vec<u8>> {
        let mut reply = vec![0u8; frame.len()];
        // single-byte exchanges only unlock the bus
        if frame.len() < 4 {
            return Ok(reply);
        }
        let register = u16::from_be_bytes([frame[1], frame[2]]);
        let size = frame.len() - 3;
        if size > 4 {
            return Err(HalError::UnsupportedSize(size));
        }
        match frame[0] {
            0x01 => {
                let value = self.read_register(register).to_be_bytes();
                reply[3..].copy_from_slice(&value[4 - size..]);
            }
            0x00 => {
                let value = frame[3..]
                    .iter()
                    .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte));
                self.registers.insert(register, value);
            }
            other => return Err(HalError::Bus(format!("unknown metering opcode {}", other))),
        }
        Ok(reply)
    }
}
