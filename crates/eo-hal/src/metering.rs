//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Energy-monitoring chip driver and CT acquisition."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::thread;
use std::time::Duration;

use strum::IntoEnumIterator;
use tracing::{debug, error, info, trace};

use crate::calibration::{CtCalibration, CtChannel, CtReading};
use crate::error::{HalError, Result};
use crate::io::{OutputLine, RegisterBus};

pub mod reg {
    pub const RUN: u16 = 0xE228;
    pub const CFMODE: u16 = 0xE610;
    pub const CONFIG: u16 = 0xE618;
    pub const HPFDIS: u16 = 0x43B6;
    pub const GAIN: u16 = 0xE60F;
    pub const VERSION: u16 = 0xE707;
    pub const AIGAIN: u16 = 0x4380;
    pub const BIGAIN: u16 = 0x4382;
    pub const CIGAIN: u16 = 0x4384;
    pub const AIRMSOS: u16 = 0x4387;
    pub const BIRMSOS: u16 = 0x4389;
    pub const CIRMSOS: u16 = 0x438B;
    pub const AIRMS: u16 = 0x43C0;
    pub const BIRMS: u16 = 0x43C2;
    pub const CIRMS: u16 = 0x43C4;
}

const OP_WRITE: u8 = 0x00;
const OP_READ: u8 = 0x01;
const HEADER_LEN: usize = 3;
const CURRENT_GAIN: u32 = 0x0FE6_060C;
const RMS_OFFSET: u32 = 0x0002_E45C;

/// Register, value, width in bytes. Written in order while the DSP is halted.
pub const DEFAULT_CONFIGURATION: [(u16, u32, usize); 10] = [
    (reg::CFMODE, 0x0E88, 2),
    (reg::CONFIG, 0, 2),
    (reg::HPFDIS, 0, 4),
    (reg::GAIN, 0, 2),
    (reg::AIGAIN, CURRENT_GAIN, 4),
    (reg::BIGAIN, CURRENT_GAIN, 4),
    (reg::CIGAIN, CURRENT_GAIN, 4),
    (reg::AIRMSOS, RMS_OFFSET, 4),
    (reg::BIRMSOS, RMS_OFFSET, 4),
    (reg::CIRMSOS, RMS_OFFSET, 4),
];

/// RMS current register for each CT input.
pub fn rms_register(channel: CtChannel) -> u16 {
    match channel {
        CtChannel::Site => reg::AIRMS,
        CtChannel::Vehicle => reg::BIRMS,
        CtChannel::Solar => reg::CIRMS,
    }
}

/// Source of uncalibrated per-channel current, in amps.
pub trait CurrentMeter: Send {
    fn sample(&mut self, channel: CtChannel) -> Result<f64>;

    /// Acquire all three channels as one record. Channels with a simulated value
    /// skip the hardware entirely; the rest get their own factor and offset.
    fn get_readings(&mut self, calibration: &CtCalibration) -> Result<CtReading> {
        let mut reading = CtReading::default();
        for channel in CtChannel::iter() {
            let cal = calibration.channel(channel);
            if cal.is_simulated() {
                reading.set(channel, cal.simulated, cal.simulated);
                continue;
            }
            let raw = self.sample(channel)?;
            reading.set(channel, raw, cal.apply(raw));
        }
        trace!(?reading, "ct acquisition");
        Ok(reading)
    }
}

impl<T: CurrentMeter + ?Sized> CurrentMeter for Box<T> {
    fn sample(&mut self, channel: CtChannel) -> Result<f64> {
        (**self).sample(channel)
    }
}

/// Stand-in for stations without a metering chip. Every channel reads zero amps,
/// so only calibration offsets and simulated values show through.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMeter;

impl CurrentMeter for NoMeter {
    fn sample(&mut self, _channel: CtChannel) -> Result<f64> {
        Ok(0.0)
    }
}

/// Driver for the three-phase energy-monitoring chip on the register bus.
pub struct MeteringDriver {
    bus: Box<dyn RegisterBus>,
    reset_line: Box<dyn OutputLine>,
    pm1_line: Box<dyn OutputLine>,
    /// Raw register counts per amp.
    scale: f64,
}

impl MeteringDriver {
    pub fn new(
        bus: Box<dyn RegisterBus>,
        reset_line: Box<dyn OutputLine>,
        pm1_line: Box<dyn OutputLine>,
        scale: f64,
    ) -> Self {
        Self {
            bus,
            reset_line,
            pm1_line,
            scale,
        }
    }

    /// Reset the chip, unlock the register bus and load [`DEFAULT_CONFIGURATION`].
    ///
    /// Returns the registers that did not read back as written. A mismatch is
    /// logged but does not stop the chip from running.
    pub fn initialise(&mut self) -> Result<Vec<u16>> {
        self.hardware_reset()?;
        self.enable_bus()?;
        let mismatched = self.configure()?;
        let version = self.register_get(reg::VERSION, 1)?;
        info!(
            chip_version = version,
            mismatched = mismatched.len(),
            "metering chip configured"
        );
        Ok(mismatched)
    }

    fn hardware_reset(&mut self) -> Result<()> {
        self.pm1_line.set_low()?;
        self.reset_line.set_high()?;
        thread::sleep(Duration::from_millis(1));
        self.reset_line.set_low()?;
        thread::sleep(Duration::from_millis(1));
        self.reset_line.set_high()?;
        thread::sleep(Duration::from_millis(20));
        Ok(())
    }

    /// Three dummy single-byte exchanges latch the chip into register-bus mode.
    fn enable_bus(&mut self) -> Result<()> {
        for _ in 0..3 {
            self.bus.transfer(&[0x00])?;
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    fn configure(&mut self) -> Result<Vec<u16>> {
        self.register_set(reg::RUN, 0, 2)?;
        for (register, value, size) in DEFAULT_CONFIGURATION {
            self.register_set(register, value, size)?;
        }
        // The last write only lands once the pipeline is flushed twice.
        let (last, value, size) = DEFAULT_CONFIGURATION[DEFAULT_CONFIGURATION.len() - 1];
        self.register_set(last, value, size)?;
        self.register_set(last, value, size)?;

        let mut mismatched = Vec::new();
        for (register, expected, size) in DEFAULT_CONFIGURATION {
            let actual = self.register_get(register, size)?;
            if actual != expected {
                error!(
                    register = %format!("0x{:04X}", register),
                    expected,
                    actual,
                    "metering register failed read-back"
                );
                mismatched.push(register);
            }
        }
        self.register_set(reg::RUN, 1, 2)?;
        Ok(mismatched)
    }

    /// Read a `size`-byte register and decode the big-endian tail of the reply.
    pub fn register_get(&mut self, register: u16, size: usize) -> Result<u32> {
        check_size(size)?;
        let mut frame = vec![0u8; HEADER_LEN + size];
        frame[0] = OP_READ;
        frame[1..HEADER_LEN].copy_from_slice(&register.to_be_bytes());
        let reply = self.bus.transfer(&frame)?;
        if reply.len() < frame.len() {
            return Err(HalError::ShortReply {
                expected: frame.len(),
                actual: reply.len(),
            });
        }
        let value = reply[reply.len() - size..]
            .iter()
            .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte));
        Ok(value)
    }

    /// Write the low `size` bytes of `value`, most significant first.
    pub fn register_set(&mut self, register: u16, value: u32, size: usize) -> Result<()> {
        check_size(size)?;
        let mut frame = Vec::with_capacity(HEADER_LEN + size);
        frame.push(OP_WRITE);
        frame.extend_from_slice(&register.to_be_bytes());
        frame.extend_from_slice(&value.to_be_bytes()[4 - size..]);
        debug!(frame = %hex::encode(&frame), "metering register write");
        self.bus.transfer(&frame)?;
        Ok(())
    }
}

impl CurrentMeter for MeteringDriver {
    fn sample(&mut self, channel: CtChannel) -> Result<f64> {
        let counts = self.register_get(rms_register(channel), 4)?;
        Ok(f64::from(counts) / self.scale)
    }
}

fn check_size(size: usize) -> Result<()> {
    if (1..=4).contains(&size) {
        Ok(())
    } else {
        Err(HalError::UnsupportedSize(size))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::calibration::ChannelCalibration;

    #[derive(Clone, Default)]
    struct ScriptedBus {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        tail: Vec<u8>,
    }

    impl RegisterBus for ScriptedBus {
        fn transfer(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
            self.sent.lock().unwrap().push(frame.to_vec());
            let mut reply = vec![0u8; frame.len()];
            let n = self.tail.len().min(reply.len());
            let start = reply.len() - n;
            reply[start..].copy_from_slice(&self.tail[self.tail.len() - n..]);
            Ok(reply)
        }
    }

    struct Quiet;

    impl OutputLine for Quiet {
        fn set_high(&mut self) -> Result<()> {
            Ok(())
        }
        fn set_low(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn driver(bus: ScriptedBus) -> MeteringDriver {
        MeteringDriver::new(Box::new(bus), Box::new(Quiet), Box::new(Quiet), 10_000.0)
    }

    #[test]
    fn register_get_decodes_big_endian_tail() {
        let bus = ScriptedBus {
            tail: vec![0x01, 0x02, 0x03],
            ..Default::default()
        };
        let sent = bus.sent.clone();
        let mut meter = driver(bus);
        assert_eq!(meter.register_get(reg::AIRMS, 3).unwrap(), 0x010203);
        assert_eq!(sent.lock().unwrap()[0], vec![0x01, 0x43, 0xC0, 0, 0, 0]);
    }

    #[test]
    fn register_set_encodes_big_endian() {
        let bus = ScriptedBus::default();
        let sent = bus.sent.clone();
        let mut meter = driver(bus);
        meter.register_set(reg::CFMODE, 0x0E88, 2).unwrap();
        meter.register_set(reg::AIGAIN, 0x0FE6_060C, 4).unwrap();
        let sent = sent.lock().unwrap();
        assert_eq!(sent[0], vec![0x00, 0xE6, 0x10, 0x0E, 0x88]);
        assert_eq!(sent[1], vec![0x00, 0x43, 0x80, 0x0F, 0xE6, 0x06, 0x0C]);
    }

    #[test]
    fn register_size_outside_range_is_rejected() {
        let mut meter = driver(ScriptedBus::default());
        assert!(matches!(
            meter.register_get(reg::AIRMS, 5),
            Err(HalError::UnsupportedSize(5))
        ));
        assert!(matches!(
            meter.register_set(reg::RUN, 0, 0),
            Err(HalError::UnsupportedSize(0))
        ));
    }

    #[test]
    fn simulated_channel_bypasses_the_chip() {
        let bus = ScriptedBus {
            tail: 100_000u32.to_be_bytes().to_vec(),
            ..Default::default()
        };
        let sent = bus.sent.clone();
        let mut meter = driver(bus);
        let calibration = CtCalibration {
            site: ChannelCalibration {
                factor: 2.0,
                offset: 0.5,
                simulated: 0.0,
            },
            vehicle: ChannelCalibration::default(),
            solar: ChannelCalibration {
                simulated: 4.0,
                ..ChannelCalibration::default()
            },
        };
        let reading = meter.get_readings(&calibration).unwrap();
        assert_eq!(reading.raw_site, 10.0);
        assert_eq!(reading.site, 20.5);
        assert_eq!(reading.vehicle, 10.0);
        assert_eq!(reading.solar, 4.0);
        assert_eq!(reading.raw_solar, 4.0);
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn no_meter_still_applies_offsets() {
        let calibration = CtCalibration {
            vehicle: ChannelCalibration {
                offset: 0.3,
                ..ChannelCalibration::default()
            },
            ..CtCalibration::default()
        };
        let reading = NoMeter.get_readings(&calibration).unwrap();
        assert_eq!(reading.site, 0.0);
        assert_eq!(reading.vehicle, 0.3);
    }
}
