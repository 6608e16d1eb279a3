//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulated charge point exports."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Bench model of a charge point.
//!
//! [`StationModel`] plays the charger controller board and the electrical
//! environment around it. [`SimulatedStation`] wires that model behind the same
//! hardware seams the real drivers use, so the full protocol and metering stack
//! runs unchanged against it.

pub mod devices;
pub mod model;

pub use devices::{SimBridgeBus, SimLine, SimMeterBus, SimSerialLink};
pub use model::{Fault, Reply, StationModel, SIM_MAINS_RAW};

use std::sync::Arc;

use eo_common::config::SimulationConfig;
use eo_hal::{BridgeUart, DirectSerial, MeteringDriver, OverrunCounter};
use parking_lot::Mutex;

/// Shared handle on one simulated charge point.
#[derive(Clone)]
pub struct SimulatedStation {
    model: Arc<Mutex<StationModel>>,
}

impl SimulatedStation {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            model: Arc::new(Mutex::new(StationModel::new(config))),
        }
    }

    /// Charger board reached through the direct serial transport.
    pub fn direct_transport(&self) -> DirectSerial {
        DirectSerial::new(
            Box::new(SimSerialLink::new(self.model.clone())),
            Box::new(SimLine::default()),
        )
    }

    /// Charger board reached through the UART bridge.
    pub fn bridge_transport(&self, overruns: OverrunCounter) -> BridgeUart {
        BridgeUart::new(
            Box::new(SimBridgeBus::new(self.model.clone())),
            Box::new(SimLine::default()),
            overruns,
        )
    }

    /// Metering chip driver wired to the model's CTs; call `initialise` before use.
    pub fn metering_driver(&self, scale: f64) -> MeteringDriver {
        MeteringDriver::new(
            Box::new(SimMeterBus::new(self.model.clone(), scale)),
            Box::new(SimLine::default()),
            Box::new(SimLine::default()),
            scale,
        )
    }

    pub fn inject(&self, fault: Fault, count: usize) {
        self.model.lock().inject(fault, count);
    }

    /// Run `f` with exclusive access to the model.
    pub fn with_model<R>(&self, f: impl FnOnce(&mut StationModel) -> R) -> R {
        f(&mut self.model.lock())
    }
}
