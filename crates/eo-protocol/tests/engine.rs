//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Protocol engine behaviour against the simulated charge point."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use eo_common::config::SimulationConfig;
use eo_hal::{ChannelCalibration, CtCalibration, NoMeter, OverrunCounter};
use eo_protocol::{ChargerEngine, ChargerState, ProtocolError};
use eo_sim::{Fault, SimulatedStation};

const TIMEOUT: Duration = Duration::from_millis(60);

fn bridge_engine(station: &SimulatedStation) -> (ChargerEngine, OverrunCounter) {
    let overruns = OverrunCounter::default();
    let mut meter = station.metering_driver(10_000.0);
    meter.initialise().expect("simulated metering chip configures");
    let engine = ChargerEngine::new(
        Box::new(station.bridge_transport(overruns.clone())),
        Box::new(meter),
        TIMEOUT,
    );
    (engine, overruns)
}

#[test]
fn start_discovers_and_caches_address() {
    let station = SimulatedStation::new(&SimulationConfig::default());
    let (mut engine, _) = bridge_engine(&station);
    engine.start().unwrap();
    assert!(engine.is_connected());
    let expected = station.with_model(|model| model.address().to_owned());
    assert_eq!(engine.address(), Some(expected.as_str()));
}

#[test]
fn set_amp_limit_decodes_telemetry_and_reads_cts() {
    let station = SimulatedStation::new(&SimulationConfig::default());
    let (mut engine, _) = bridge_engine(&station);
    engine.start().unwrap();

    let reading = engine.set_amp_limit(32, &CtCalibration::default()).unwrap();
    assert_eq!(reading.duty, 0x204);
    assert_eq!(reading.telemetry.charge_duty, 0x204);
    assert_eq!(reading.telemetry.state, ChargerState::ChargingStart);
    assert!((reading.ct.vehicle - 31.992).abs() < 1e-3);
    assert!((reading.ct.site - (8.0 + 31.992)).abs() < 1e-3);
    assert_eq!(station.with_model(|model| model.duty()), 0x204);
}

#[test]
fn out_of_range_limits_transmit_nothing() {
    let station = SimulatedStation::new(&SimulationConfig::default());
    let (mut engine, _) = bridge_engine(&station);
    engine.start().unwrap();
    let before = station.with_model(|model| model.commands_received());

    for amps in [33, -1, 100] {
        let err = engine.set_amp_limit(amps, &CtCalibration::default()).unwrap_err();
        assert!(matches!(err, ProtocolError::OutOfRange(a) if a == amps));
    }
    assert_eq!(station.with_model(|model| model.commands_received()), before);
}

#[test]
fn silent_first_attempt_is_retried_once() {
    let station = SimulatedStation::new(&SimulationConfig::default());
    let (mut engine, _) = bridge_engine(&station);
    engine.start().unwrap();
    let before = station.with_model(|model| model.commands_received());

    station.inject(Fault::Silence, 1);
    engine.set_amp_limit(16, &CtCalibration::default()).unwrap();
    assert_eq!(station.with_model(|model| model.commands_received()), before + 2);
}

#[test]
fn second_failure_gives_up_without_third_attempt() {
    let station = SimulatedStation::new(&SimulationConfig::default());
    let (mut engine, _) = bridge_engine(&station);
    engine.start().unwrap();
    let before = station.with_model(|model| model.commands_received());

    station.inject(Fault::Silence, 1);
    station.inject(Fault::CorruptChecksum, 1);
    let err = engine.set_amp_limit(16, &CtCalibration::default()).unwrap_err();
    assert!(matches!(err, ProtocolError::Checksum { .. }));
    assert_eq!(station.with_model(|model| model.commands_received()), before + 2);
    assert!(engine.is_connected());
}

#[test]
fn overrun_is_counted_and_retried() {
    let station = SimulatedStation::new(&SimulationConfig::default());
    let (mut engine, overruns) = bridge_engine(&station);
    engine.start().unwrap();

    station.inject(Fault::Overrun, 1);
    let reading = engine.set_amp_limit(10, &CtCalibration::default()).unwrap();
    assert_eq!(reading.amps, 10);
    assert_eq!(overruns.get(), 1);
    assert_eq!(engine.overruns().get(), 1);
}

#[test]
fn failed_discovery_is_retried_on_next_limit() {
    let station = SimulatedStation::new(&SimulationConfig::default());
    let (mut engine, _) = bridge_engine(&station);
    station.inject(Fault::Silence, 1);
    engine.start().unwrap();
    assert!(!engine.is_connected());

    engine.set_amp_limit(0, &CtCalibration::default()).unwrap();
    assert!(engine.is_connected());
}

#[test]
fn discovery_failure_during_limit_reports_not_connected() {
    let station = SimulatedStation::new(&SimulationConfig::default());
    let (mut engine, _) = bridge_engine(&station);
    station.inject(Fault::Silence, 2);
    engine.start().unwrap();
    let err = engine.set_amp_limit(12, &CtCalibration::default()).unwrap_err();
    assert!(matches!(err, ProtocolError::NotConnected));
    assert!(!engine.is_connected());
}

#[test]
fn direct_serial_with_simulated_cts() {
    let station = SimulatedStation::new(&SimulationConfig::default());
    let mut engine = ChargerEngine::new(
        Box::new(station.direct_transport()),
        Box::new(NoMeter),
        TIMEOUT,
    );
    engine.start().unwrap();
    let calibration = CtCalibration {
        site: ChannelCalibration {
            simulated: 20.0,
            ..ChannelCalibration::default()
        },
        ..CtCalibration::default()
    };
    let reading = engine.set_amp_limit(6, &calibration).unwrap();
    assert_eq!(reading.duty, 97);
    assert_eq!(reading.ct.site, 20.0);
    assert_eq!(reading.ct.vehicle, 0.0);
}
