//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Raspberry Pi SPI and GPIO backends."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use rppal::gpio::{Gpio, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

use crate::error::{HalError, Result};
use crate::io::{OutputLine, RegisterBus};

/// BCM-numbered GPIO driven as a push-pull output.
pub struct GpioLine {
    pin: OutputPin,
}

impl GpioLine {
    pub fn open(bcm_pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(|err| HalError::Gpio(err.to_string()))?;
        let pin = gpio
            .get(bcm_pin)
            .map_err(|err| HalError::Gpio(format!("pin {}: {}", bcm_pin, err)))?
            .into_output();
        Ok(Self { pin })
    }
}

impl OutputLine for GpioLine {
    fn set_high(&mut self) -> Result<()> {
        self.pin.set_high();
        Ok(())
    }

    fn set_low(&mut self) -> Result<()> {
        self.pin.set_low();
        Ok(())
    }
}

/// Clock polarity/phase used by each peripheral.
#[derive(Debug, Clone, Copy)]
pub enum SpiMode {
    /// UART bridge.
    Mode0,
    /// Metering chip.
    Mode3,
}

/// SPI0 chip-select line driven through the kernel spidev interface.
pub struct SpiRegisterBus {
    spi: Spi,
}

impl SpiRegisterBus {
    pub fn open(slave_select: u8, clock_hz: u32, mode: SpiMode) -> Result<Self> {
        let slave = match slave_select {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            2 => SlaveSelect::Ss2,
            other => return Err(HalError::Bus(format!("unsupported chip select {}", other))),
        };
        let mode = match mode {
            SpiMode::Mode0 => Mode::Mode0,
            SpiMode::Mode3 => Mode::Mode3,
        };
        let spi = Spi::new(Bus::Spi0, slave, clock_hz, mode)
            .map_err(|err| HalError::Bus(err.to_string()))?;
        Ok(Self { spi })
    }
}

impl RegisterBus for SpiRegisterBus {
    fn transfer(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        let mut reply = vec![0u8; frame.len()];
        self.spi
            .transfer(&mut reply, frame)
            .map_err(|err| HalError::Bus(err.to_string()))?;
        Ok(reply)
    }
}
