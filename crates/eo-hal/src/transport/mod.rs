//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Charger board transport contract and shared helpers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::Result;
use crate::io::OutputLine;

mod bridge;
mod direct;

pub use bridge::BridgeUart;
pub use direct::DirectSerial;

/// Carriage return appended to every outbound command.
pub const FRAME_TERMINATOR: u8 = b'\r';

/// Once bytes have started arriving, this much silence ends a receive early.
pub(crate) const QUIET_GAP: Duration = Duration::from_millis(20);
pub(crate) const POLL_SLEEP: Duration = Duration::from_millis(1);
const RESET_PULSE: Duration = Duration::from_millis(1);

/// Which physical path carries the charger protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TransportKind {
    DirectSerial,
    Bridge,
}

/// Byte transport to the charger controller board.
///
/// Only one command is ever in flight: callers transmit, then block in
/// [`Transport::receive`] until the reply arrives or the timeout expires.
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Pulse the board reset line and bring the link into a known state.
    fn reset(&mut self) -> Result<()>;

    /// Write `command` followed by [`FRAME_TERMINATOR`].
    fn transmit(&mut self, command: &[u8]) -> Result<()>;

    /// Collect a reply. `Ok(None)` means nothing arrived before `timeout`;
    /// [`crate::HalError::Overrun`] means bytes were lost and the whole reply was dropped.
    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Receive overruns observed since startup.
    fn overruns(&self) -> OverrunCounter {
        OverrunCounter::default()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }

    fn transmit(&mut self, command: &[u8]) -> Result<()> {
        (**self).transmit(command)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        (**self).receive(timeout)
    }

    fn overruns(&self) -> OverrunCounter {
        (**self).overruns()
    }
}

/// Process-wide count of discarded receives, shared between the transport and observers.
#[derive(Debug, Clone, Default)]
pub struct OverrunCounter(Arc<AtomicU64>);

impl OverrunCounter {
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Drive the reset line low for about a millisecond, then release it.
pub(crate) fn pulse_reset(line: &mut dyn OutputLine) -> Result<()> {
    line.set_low()?;
    thread::sleep(RESET_PULSE);
    line.set_high()
}
