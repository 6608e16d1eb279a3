//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Station snapshot published by the arbitration loop."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Published station state.
//!
//! The scheduler is the only writer. Each cycle it builds a fresh
//! [`StationSnapshot`] and swaps it into a `watch` channel; readers hold an
//! `Arc` and never see a half-written value. The charge part is only replaced
//! after a successful exchange with the board, so a failed cycle republishes
//! the previous [`ChargeStatus`] unchanged.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use eo_hal::CtReading;
use eo_protocol::{ChargerReading, ChargerState, ChargerTelemetry};
use serde::Serialize;
use tokio::sync::watch;

/// The cycle's working numbers, from raw vote to the smoothed value sent to the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregatedRequest {
    /// Highest module vote after clamping.
    pub voted: i32,
    /// Request after global overrides and the site clamp.
    pub requested: i32,
    pub grid: f64,
    pub solar: f64,
    /// Amps removed to respect the site limit.
    pub site_limit: i32,
    pub smoothed: i32,
}

/// Everything learned from the last successful exchange with the board.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeStatus {
    pub telemetry: Option<ChargerTelemetry>,
    pub state: ChargerState,
    pub ct: CtReading,
    pub request: AggregatedRequest,
    pub live_voltage: f64,
    pub mains_frequency: u32,
    pub firmware_version: u32,
    pub power_delivered: f64,
    pub power_requested: f64,
    pub power_requested_grid: f64,
    pub power_requested_solar: f64,
    pub power_requested_site_limit: f64,
    pub amps_delivered: f64,
    pub local_time: String,
}

impl Default for ChargeStatus {
    fn default() -> Self {
        Self {
            telemetry: None,
            state: ChargerState::ChargeUnknownState,
            ct: CtReading::default(),
            request: AggregatedRequest::default(),
            live_voltage: 0.0,
            mains_frequency: 0,
            firmware_version: 0,
            power_delivered: 0.0,
            power_requested: 0.0,
            power_requested_grid: 0.0,
            power_requested_solar: 0.0,
            power_requested_site_limit: 0.0,
            amps_delivered: 0.0,
            local_time: String::new(),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn kilowatts(volts: f64, amps: f64) -> f64 {
    round2(volts * amps / 1000.0)
}

impl ChargeStatus {
    /// Derive power and split figures from an accepted reading.
    pub fn from_reading(
        reading: &ChargerReading,
        mut request: AggregatedRequest,
        voltage_correction: f64,
        local_now: NaiveDateTime,
    ) -> Self {
        let telemetry = &reading.telemetry;
        let volts = round2(telemetry.live_voltage_rms(voltage_correction));
        let requested = f64::from(request.requested);
        request.solar = reading.ct.solar.min(requested);
        request.grid = requested - request.solar;

        let power_delivered = kilowatts(volts, reading.ct.vehicle);
        let amps_delivered = if volts > 0.0 {
            round2(power_delivered * 1000.0 / volts)
        } else {
            0.0
        };

        Self {
            telemetry: Some(telemetry.clone()),
            state: telemetry.state,
            ct: reading.ct,
            request,
            live_voltage: volts,
            mains_frequency: telemetry.mains_frequency,
            firmware_version: telemetry.firmware_version,
            power_delivered,
            power_requested: kilowatts(volts, requested),
            power_requested_grid: kilowatts(volts, request.grid),
            power_requested_solar: kilowatts(volts, request.solar),
            power_requested_site_limit: kilowatts(volts, f64::from(request.site_limit)),
            amps_delivered,
            local_time: local_now.format("%H:%M").to_string(),
        }
    }
}

/// Host figures gathered by housekeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub available_memory_mib: f64,
    pub free_memory_mib: f64,
    pub load_average_1m: f64,
    pub cpu_temperature: Option<f64>,
}

/// Link and loop health, refreshed every cycle whatever the outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StationHealth {
    pub connected: bool,
    pub overruns: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub system: SystemMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleStatus {
    pub name: String,
    pub enabled: bool,
    pub poll_cadence: u64,
    pub last_vote: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationSnapshot {
    pub cycle: u64,
    pub charge: Arc<ChargeStatus>,
    pub health: StationHealth,
    pub modules: Vec<ModuleStatus>,
    pub published_at: DateTime<Utc>,
}

impl Default for StationSnapshot {
    fn default() -> Self {
        Self {
            cycle: 0,
            charge: Arc::new(ChargeStatus::default()),
            health: StationHealth::default(),
            modules: Vec::new(),
            published_at: Utc::now(),
        }
    }
}

pub type SnapshotReceiver = watch::Receiver<Arc<StationSnapshot>>;

/// Single-writer side of the snapshot channel.
#[derive(Debug)]
pub struct SnapshotPublisher {
    tx: watch::Sender<Arc<StationSnapshot>>,
}

impl SnapshotPublisher {
    pub fn channel() -> (Self, SnapshotReceiver) {
        let (tx, rx) = watch::channel(Arc::new(StationSnapshot::default()));
        (Self { tx }, rx)
    }

    pub fn publish(&self, snapshot: StationSnapshot) -> Arc<StationSnapshot> {
        let snapshot = Arc::new(snapshot);
        // send_replace succeeds with no receivers left
        self.tx.send_replace(snapshot.clone());
        snapshot
    }

    pub fn subscribe(&self) -> SnapshotReceiver {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Arc<StationSnapshot> {
        self.tx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serialises_shared_charge_inline() {
        let (publisher, rx) = SnapshotPublisher::channel();
        publisher.publish(StationSnapshot {
            cycle: 7,
            modules: vec![ModuleStatus {
                name: "switch".to_owned(),
                enabled: false,
                poll_cadence: 1,
                last_vote: None,
            }],
            ..StationSnapshot::default()
        });
        let snapshot = rx.borrow().clone();
        let value = serde_json::to_value(&*snapshot).unwrap();
        assert_eq!(value["cycle"], 7);
        assert_eq!(value["charge"]["local_time"], "");
        assert_eq!(value["charge"]["request"]["smoothed"], 0);
        assert_eq!(value["modules"][0]["name"], "switch");
    }
}
