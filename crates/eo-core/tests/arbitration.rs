//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Arbitration loop behaviour against the simulated charge point."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use eo_common::AppConfig;
use eo_core::{ArbitrationScheduler, Housekeeping, SERVICE_NAME};
use eo_hal::OverrunCounter;
use eo_metrics::{new_registry, prometheus::TextEncoder, StationMetrics};
use eo_protocol::{ChargerEngine, ChargerState};
use eo_sim::{Fault, SimulatedStation};
use serde_json::json;
use tempfile::{tempdir, TempDir};
use tokio::sync::broadcast;

const TIMEOUT: Duration = Duration::from_millis(60);

fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 1, 15)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

struct Bench {
    station: SimulatedStation,
    scheduler: ArbitrationScheduler,
    _logs: TempDir,
}

fn bench_with(config: AppConfig, metrics: Option<StationMetrics>) -> Bench {
    let logs = tempdir().unwrap();
    let mut config = config;
    config.logging.directory = logs.path().to_path_buf();

    let station = SimulatedStation::new(&config.simulation);
    let mut meter = station.metering_driver(config.hardware.metering.scale);
    meter.initialise().unwrap();
    let mut engine = ChargerEngine::new(
        Box::new(station.bridge_transport(OverrunCounter::default())),
        Box::new(meter),
        TIMEOUT,
    );
    engine.start().unwrap();

    let housekeeping = Housekeeping::new(SERVICE_NAME, &config.logging)
        .with_thermal_zone(logs.path().join("thermal"));
    let scheduler =
        ArbitrationScheduler::new(&config, engine, metrics).with_housekeeping(housekeeping);
    Bench {
        station,
        scheduler,
        _logs: logs,
    }
}

fn bench() -> Bench {
    bench_with(AppConfig::default(), None)
}

#[test]
fn night_window_dispatches_full_current() {
    let mut bench = bench();
    let report = bench.scheduler.run_cycle(at(23, 0));
    assert!(report.dispatched);
    assert_eq!((report.voted, report.requested, report.smoothed), (32, 32, 32));

    let snapshot = bench.scheduler.latest();
    assert_eq!(snapshot.cycle, 0);
    assert_eq!(snapshot.modules.len(), 4);
    assert!(snapshot.health.connected);

    let charge = &snapshot.charge;
    assert_eq!(charge.state, ChargerState::ChargingStart);
    assert_eq!(charge.request.smoothed, 32);
    assert_eq!(charge.local_time, "23:00");
    assert!(charge.live_voltage > 225.0 && charge.live_voltage < 235.0);
    assert!((charge.ct.vehicle - 31.992).abs() < 1e-3);
    assert!(charge.power_delivered > 7.0);
    assert_eq!(charge.request.solar, 0.0);
    assert_eq!(charge.request.grid, 32.0);
    assert_eq!(bench.station.with_model(|model| model.duty()), 0x204);
}

#[test]
fn daytime_without_votes_sends_zero() {
    let mut bench = bench();
    let report = bench.scheduler.run_cycle(at(12, 0));
    assert!(report.dispatched);
    assert_eq!(report.smoothed, 0);
    assert_eq!(bench.scheduler.latest().charge.state, ChargerState::CarConnected);
}

#[test]
fn site_budget_clamps_request_from_last_readings() {
    let mut config = AppConfig::default();
    if let Some(params) = config.modules.get_mut("loadmanagement") {
        params.insert("site_limit_current".into(), json!(40));
    }
    let mut bench = bench_with(config, None);
    bench.station.with_model(|model| model.set_site_current(20.0));

    // first cycle has no CT history yet
    let first = bench.scheduler.run_cycle(at(23, 0));
    assert_eq!((first.requested, first.site_limit), (32, 0));

    let second = bench.scheduler.run_cycle(at(23, 0));
    assert_eq!(second.voted, 32);
    assert_eq!(second.requested, 20);
    assert_eq!(second.site_limit, 12);
    assert_eq!(second.smoothed, 26);
    assert_eq!(bench.scheduler.latest().charge.request.site_limit, 12);
}

#[test]
fn overrun_keeps_published_telemetry_and_counts_once() {
    let mut bench = bench();
    assert!(bench.scheduler.run_cycle(at(23, 0)).dispatched);
    let before = bench.scheduler.latest();

    bench.station.inject(Fault::Overrun, 1);
    bench.station.inject(Fault::Silence, 1);
    let report = bench.scheduler.run_cycle(at(23, 5));
    assert!(!report.dispatched);

    let after = bench.scheduler.latest();
    assert_eq!(after.cycle, 1);
    assert!(Arc::ptr_eq(&before.charge, &after.charge));
    assert_eq!(*before.charge, *after.charge);
    assert_eq!(after.health.overruns, before.health.overruns + 1);
    assert_eq!(after.health.consecutive_failures, 1);
    assert!(after.health.last_error.is_some());

    assert!(bench.scheduler.run_cycle(at(23, 10)).dispatched);
    let recovered = bench.scheduler.latest();
    assert_eq!(recovered.health.consecutive_failures, 0);
    assert_eq!(recovered.charge.local_time, "23:10");
}

#[test]
fn commands_reconfigure_modules_between_cycles() {
    let mut bench = bench();
    let handle = bench.scheduler.handle();
    assert_eq!(bench.scheduler.run_cycle(at(12, 0)).voted, 0);

    handle.set_module_param("switch", "enabled", json!(true)).unwrap();
    handle.set_module_param("switch", "on", json!("true")).unwrap();
    handle.set_module_param("switch", "amps", json!(10)).unwrap();
    let report = bench.scheduler.run_cycle(at(12, 0));
    assert_eq!(report.voted, 10);
    assert_eq!(report.smoothed, 5);
    let switch = handle
        .snapshot()
        .modules
        .iter()
        .find(|module| module.name == "switch")
        .cloned()
        .unwrap();
    assert_eq!(switch.last_vote, Some(10));

    handle.set_module_param("ocpp", "enabled", json!(true)).unwrap();
    handle.remove_module("switch").unwrap();
    bench.scheduler.run_cycle(at(12, 0));
    assert!(!bench.scheduler.store().modules().contains_key("ocpp"));
    assert!(!bench.scheduler.registry().contains("switch"));
}

fn last_vote(scheduler: &ArbitrationScheduler, module: &str) -> Option<i32> {
    scheduler
        .latest()
        .modules
        .iter()
        .find(|status| status.name == module)
        .and_then(|status| status.last_vote)
}

#[test]
fn poll_cadence_skips_cycles_between_polls() {
    let mut bench = bench();
    let handle = bench.scheduler.handle();
    handle.set_module_param("switch", "enabled", json!(true)).unwrap();
    handle.set_module_param("switch", "on", json!(true)).unwrap();
    handle.set_module_param("switch", "amps", json!(10)).unwrap();
    handle.set_module_param("switch", "poll_cadence", json!(3)).unwrap();

    let mut polled = Vec::new();
    for _ in 0..7 {
        let report = bench.scheduler.run_cycle(at(12, 0));
        if last_vote(&bench.scheduler, "switch") == Some(10) {
            polled.push(report.cycle);
            assert_eq!(report.voted, 10);
        } else {
            assert_eq!(report.voted, 0);
        }
    }
    assert_eq!(polled, vec![0, 3, 6]);
    let status = bench.scheduler.latest();
    let switch = status.modules.iter().find(|m| m.name == "switch").unwrap();
    assert_eq!(switch.poll_cadence, 3);
}

#[test]
fn zero_cadence_module_never_votes() {
    let mut bench = bench();
    let handle = bench.scheduler.handle();
    handle.set_module_param("scheduler", "poll_cadence", json!(0)).unwrap();
    for minute in 0..4 {
        let report = bench.scheduler.run_cycle(at(23, minute));
        assert_eq!(report.voted, 0);
        assert_eq!(last_vote(&bench.scheduler, "scheduler"), None);
    }
}

#[test]
fn absurd_site_reading_clamps_without_stopping_the_loop() {
    let mut bench = bench();
    let handle = bench.scheduler.handle();
    handle
        .set_module_param("loadmanagement", "simulate_ct_site", json!(1.0e12))
        .unwrap();
    assert!(bench.scheduler.run_cycle(at(23, 0)).dispatched);
    let report = bench.scheduler.run_cycle(at(23, 0));
    assert_eq!(report.voted, 32);
    assert_eq!(report.requested, 0);
    assert!(report.site_limit > 0);
    assert_eq!(bench.scheduler.cycle(), 2);
}

#[test]
fn always_supply_overrides_votes_but_not_ceiling() {
    let mut bench = bench();
    let handle = bench.scheduler.handle();
    handle
        .set_module_param("chargeroptions", "always_supply_current", json!(true))
        .unwrap();
    handle
        .set_module_param("chargeroptions", "overall_limit_current", json!(16))
        .unwrap();
    let report = bench.scheduler.run_cycle(at(12, 0));
    assert_eq!(report.voted, 0);
    assert_eq!(report.requested, 16);
}

#[test]
fn disabled_modules_are_loaded_but_not_polled() {
    let mut bench = bench();
    bench.scheduler.run_cycle(at(23, 0));
    let snapshot = bench.scheduler.latest();
    let switch = snapshot
        .modules
        .iter()
        .find(|module| module.name == "switch")
        .unwrap();
    assert!(!switch.enabled);
    assert_eq!(switch.last_vote, None);
    let options = snapshot
        .modules
        .iter()
        .find(|module| module.name == "chargeroptions")
        .unwrap();
    assert_eq!(options.last_vote, None);
}

#[test]
fn cycle_metrics_are_recorded() {
    let registry = new_registry();
    let metrics = StationMetrics::new(registry.clone()).unwrap();
    let mut bench = bench_with(AppConfig::default(), Some(metrics));
    bench.scheduler.run_cycle(at(23, 0));
    bench.station.inject(Fault::Silence, 2);
    bench.scheduler.run_cycle(at(23, 0));

    let body = TextEncoder::new()
        .encode_to_string(&registry.gather())
        .unwrap();
    assert!(body.contains("eo_cycles_total 2"));
    assert!(body.contains("eo_failed_cycles_total 1"));
    assert!(body.contains("eo_amps_sent 32"));
    assert!(body.contains("eo_charger_connected 1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loop_publishes_until_shutdown() {
    let mut config = AppConfig::default();
    config.station.cycle_interval = Duration::from_millis(20);
    let bench = bench_with(config, None);
    let handle = bench.scheduler.handle();
    let mut updates = handle.subscribe();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(bench.scheduler.run(shutdown_rx));

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            updates.changed().await.unwrap();
            if updates.borrow().cycle >= 2 {
                break;
            }
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(()).unwrap();
    task.await.unwrap().unwrap();
    assert!(handle.snapshot().cycle >= 2);
}
