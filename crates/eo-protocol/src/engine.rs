//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Discovery and current-limit exchanges with the charger board."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use eo_hal::{CtCalibration, CtReading, CurrentMeter, OverrunCounter, Transport, TransportKind};
use tracing::{debug, info, warn};

use crate::duty::{duty_for_amps, encode_duty, MAX_AMPS};
use crate::error::{ProtocolError, Result};
use crate::frame::{build_packet, discover_packet, Command, ResponseFrame, ADDRESS_LEN};
use crate::telemetry::ChargerTelemetry;

/// Outcome of an accepted current limit: what the board reported and what the CTs saw.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargerReading {
    pub amps: u8,
    pub duty: u16,
    pub telemetry: ChargerTelemetry,
    pub ct: CtReading,
}

/// Owns the transport and metering chip and speaks the charger protocol over them.
pub struct ChargerEngine {
    transport: Box<dyn Transport>,
    meter: Box<dyn CurrentMeter>,
    receive_timeout: Duration,
    address: Option<String>,
}

impl ChargerEngine {
    pub fn new(
        transport: Box<dyn Transport>,
        meter: Box<dyn CurrentMeter>,
        receive_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            meter,
            receive_timeout,
            address: None,
        }
    }

    /// Reset the board link and try a first discovery. A failed discovery is not
    /// an error here; the next current limit retries it.
    pub fn start(&mut self) -> Result<()> {
        self.transport.reset()?;
        if let Err(err) = self.discover() {
            warn!(error = %err, "initial charger discovery failed, will retry on next command");
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.address.is_some()
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn overruns(&self) -> OverrunCounter {
        self.transport.overruns()
    }

    /// Ask the board for its address and cache it for every later command.
    pub fn discover(&mut self) -> Result<String> {
        let outcome = self.exchange(&discover_packet()).and_then(|frame| {
            let body = frame.body();
            if body.len() == ADDRESS_LEN {
                Ok(body.to_owned())
            } else {
                Err(ProtocolError::Malformed {
                    field: "address",
                    value: body.to_owned(),
                })
            }
        });
        match outcome {
            Ok(address) => {
                info!(address = %address, transport = %self.transport.kind(), "charger controller discovered");
                self.address = Some(address.clone());
                Ok(address)
            }
            Err(err) => {
                self.address = None;
                warn!(error = %err, "charger discovery failed");
                Err(err)
            }
        }
    }

    /// Advertise `amps` to the vehicle and collect the resulting telemetry and CT readings.
    ///
    /// Out-of-range requests are refused before anything is sent. An exchange that
    /// fails transiently is repeated exactly once.
    pub fn set_amp_limit(
        &mut self,
        amps: i32,
        calibration: &CtCalibration,
    ) -> Result<ChargerReading> {
        if !(0..=MAX_AMPS).contains(&amps) {
            warn!(amps, "refusing out-of-range current limit");
            return Err(ProtocolError::OutOfRange(amps));
        }
        let address = match self.address.clone() {
            Some(address) => address,
            None => self
                .discover()
                .map_err(|_| ProtocolError::NotConnected)?,
        };

        // range checked above
        let amps = amps as u8;
        let duty = duty_for_amps(amps);
        let packet = build_packet(Command::SetLimit, Some(&address), &encode_duty(duty));

        let telemetry = match self.limit_exchange(&packet) {
            Ok(telemetry) => telemetry,
            Err(err) if err.is_transient() => {
                debug!(error = %err, amps, "set-limit exchange failed, retrying once");
                self.limit_exchange(&packet)?
            }
            Err(err) => return Err(err),
        };

        let ct = self
            .meter
            .get_readings(calibration)
            .map_err(ProtocolError::Metering)?;
        debug!(amps, duty, state = %telemetry.state, site = ct.site, vehicle = ct.vehicle, solar = ct.solar, "current limit applied");
        Ok(ChargerReading {
            amps,
            duty,
            telemetry,
            ct,
        })
    }

    fn limit_exchange(&mut self, packet: &str) -> Result<ChargerTelemetry> {
        let frame = self.exchange(packet)?;
        ChargerTelemetry::decode(&frame)
    }

    fn exchange(&mut self, packet: &str) -> Result<ResponseFrame> {
        self.transport.transmit(packet.as_bytes())?;
        let raw = self
            .transport
            .receive(self.receive_timeout)?
            .ok_or(ProtocolError::NoResponse)?;
        ResponseFrame::parse(&raw)
    }
}
