//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bus, pin and serial seams used by the drivers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use crate::error::Result;

/// Full-duplex register bus (SPI style): every byte written clocks one byte back.
pub trait RegisterBus: Send {
    /// Exchange `frame` and return the bytes clocked in, same length as `frame`.
    fn transfer(&mut self, frame: &[u8]) -> Result<Vec<u8>>;
}

/// Digital output used for reset and power-mode pins.
pub trait OutputLine: Send {
    fn set_high(&mut self) -> Result<()>;
    fn set_low(&mut self) -> Result<()>;
}

/// Byte stream to the charger board over a plain UART.
pub trait SerialLink: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;
    /// Number of bytes waiting in the input buffer.
    fn bytes_to_read(&mut self) -> Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    /// Discard anything pending in both directions.
    fn clear_buffers(&mut self) -> Result<()>;
}

impl<T: RegisterBus + ?Sized> RegisterBus for Box<T> {
    fn transfer(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        (**self).transfer(frame)
    }
}

impl<T: OutputLine + ?Sized> OutputLine for Box<T> {
    fn set_high(&mut self) -> Result<()> {
        (**self).set_high()
    }

    fn set_low(&mut self) -> Result<()> {
        (**self).set_low()
    }
}

impl<T: SerialLink + ?Sized> SerialLink for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write_all(bytes)
    }

    fn bytes_to_read(&mut self) -> Result<usize> {
        (**self).bytes_to_read()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn clear_buffers(&mut self) -> Result<()> {
        (**self).clear_buffers()
    }
}
