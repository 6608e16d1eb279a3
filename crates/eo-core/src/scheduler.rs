//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Arbitration loop turning module votes into one charger command per cycle."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Arbitration scheduler.
//!
//! One cycle, strictly in order:
//!
//! 1. apply queued [`StationCommand`]s and reconcile the module registry if the
//!    configuration changed;
//! 2. poll every enabled module whose cadence divides the cycle number and keep
//!    the highest clamped vote;
//! 3. apply the "always supply" override and the overall current ceiling;
//! 4. clamp against the site budget when load management is loaded;
//! 5. push the request through the moving average and send the smoothed value;
//! 6. on success replace the published charge status, then run housekeeping,
//!    publish the snapshot and call the module hooks.
//!
//! The loop is the only writer of the snapshot and the only user of the bus.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveDateTime, NaiveTime, Utc};
use eo_common::AppConfig;
use eo_hal::CtChannel;
use eo_metrics::StationMetrics;
use eo_protocol::{ChargerEngine, MAX_AMPS, MIN_CHARGE_AMPS};
use strum::IntoEnumIterator;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::command::{CommandReceiver, StationCommand, StationHandle};
use crate::config_store::ModuleConfigStore;
use crate::housekeeping::Housekeeping;
use crate::pacing::RateLimiter;
use crate::plugin::{ChargerOverrides, PollContext};
use crate::plugins::site_clamp;
use crate::registry::ModuleRegistry;
use crate::smoothing::MovingAverage;
use crate::snapshot::{
    AggregatedRequest, ChargeStatus, SnapshotPublisher, StationHealth, StationSnapshot,
};
use crate::SERVICE_NAME;

/// Clamp one module vote to 0..=32; anything below the charging minimum reads as 0.
pub fn clamp_vote(amps: i32) -> i32 {
    let amps = amps.clamp(0, MAX_AMPS);
    if amps < MIN_CHARGE_AMPS {
        0
    } else {
        amps
    }
}

/// Highest clamped vote, 0 when nobody voted.
pub fn aggregate_votes<I>(votes: I) -> i32
where
    I: IntoIterator<Item = i32>,
{
    votes.into_iter().map(clamp_vote).max().unwrap_or(0)
}

/// "Always supply" forces the maximum; the overall ceiling still applies after it.
pub fn apply_overrides(voted: i32, overrides: &ChargerOverrides) -> i32 {
    let requested = if overrides.always_supply_current {
        MAX_AMPS
    } else {
        voted
    };
    requested.min(overrides.overall_limit_current)
}

/// Summary of one cycle, mostly for tests and tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub voted: i32,
    pub requested: i32,
    pub site_limit: i32,
    pub smoothed: i32,
    pub dispatched: bool,
}

pub struct ArbitrationScheduler {
    engine: ChargerEngine,
    store: ModuleConfigStore,
    registry: ModuleRegistry,
    smoothing: MovingAverage<i32>,
    commands: mpsc::UnboundedSender<StationCommand>,
    inbox: CommandReceiver,
    publisher: SnapshotPublisher,
    metrics: Option<StationMetrics>,
    housekeeping: Housekeeping,
    interval: Duration,
    cycle: u64,
    charge: Arc<ChargeStatus>,
    charge_cycle: Option<u64>,
    consecutive_failures: u32,
    last_error: Option<String>,
}

impl ArbitrationScheduler {
    pub fn new(config: &AppConfig, engine: ChargerEngine, metrics: Option<StationMetrics>) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (publisher, _) = SnapshotPublisher::channel();
        Self {
            engine,
            store: ModuleConfigStore::new(config.modules.clone()),
            registry: ModuleRegistry::default(),
            smoothing: MovingAverage::new(config.station.smoothing_window),
            commands,
            inbox,
            publisher,
            metrics,
            housekeeping: Housekeeping::new(SERVICE_NAME, &config.logging),
            interval: config.station.cycle_interval,
            cycle: 0,
            charge: Arc::new(ChargeStatus::default()),
            charge_cycle: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    pub fn with_housekeeping(mut self, housekeeping: Housekeeping) -> Self {
        self.housekeeping = housekeeping;
        self
    }

    /// Command and snapshot access for collaborators.
    pub fn handle(&self) -> StationHandle {
        StationHandle::new(self.commands.clone(), self.publisher.subscribe())
    }

    pub fn engine(&self) -> &ChargerEngine {
        &self.engine
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ModuleConfigStore {
        &self.store
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn latest(&self) -> Arc<StationSnapshot> {
        self.publisher.latest()
    }

    /// Run cycles at the configured period until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut limiter = RateLimiter::new(self.interval);
        info!(
            interval_ms = self.interval.as_millis() as u64,
            transport = %self.engine.transport_kind(),
            "arbitration loop started"
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("arbitration loop shutdown signal received");
                    break;
                }
                _ = limiter.tick() => {
                    let local_now = Local::now().naive_local();
                    // the bus exchange blocks for up to the receive timeout
                    tokio::task::block_in_place(|| self.run_cycle(local_now));
                }
            }
        }
        info!(cycles = self.cycle, "arbitration loop stopped");
        Ok(())
    }

    /// Execute one full cycle at local wall-clock time `local_now`.
    pub fn run_cycle(&mut self, local_now: NaiveDateTime) -> CycleReport {
        let cycle = self.cycle;
        self.drain_inbox();
        if self.store.take_changed() {
            let report = self.registry.reconcile(self.store.modules());
            info!(
                cycle,
                loaded = ?report.loaded,
                unloaded = ?report.unloaded,
                failed = ?report.failed,
                "module registry reconciled"
            );
        }

        let voted = self.collect_votes(cycle, local_now.time());
        let overrides = self.registry.charger_overrides();
        let mut requested = apply_overrides(voted, &overrides);

        let mut site_limit = 0;
        if let Some(limits) = self.registry.site_limits() {
            let clamp = site_clamp(
                requested,
                limits.site_limit_current,
                self.charge.ct.site,
                self.charge.ct.vehicle,
            );
            if clamp.shortfall > 0 {
                info!(
                    cycle,
                    available = clamp.available,
                    shortfall = clamp.shortfall,
                    site_ct = self.charge.ct.site,
                    vehicle_ct = self.charge.ct.vehicle,
                    "site limit active"
                );
            }
            requested = clamp.amps;
            site_limit = clamp.shortfall;
        }

        let smoothed = self.smoothing.push_amps(requested);
        info!(
            cycle,
            voted,
            requested,
            smoothed,
            overall_limit = overrides.overall_limit_current,
            always_supply = overrides.always_supply_current,
            state = %self.charge.state,
            "amps requested"
        );

        let request = AggregatedRequest {
            voted,
            requested,
            site_limit,
            smoothed,
            ..AggregatedRequest::default()
        };
        let calibration = self.registry.ct_calibration();
        let dispatched = match self.engine.set_amp_limit(smoothed, &calibration) {
            Ok(reading) => {
                self.charge = Arc::new(ChargeStatus::from_reading(
                    &reading,
                    request,
                    overrides.mains_voltage_correction,
                    local_now,
                ));
                self.charge_cycle = Some(cycle);
                self.consecutive_failures = 0;
                self.last_error = None;
                true
            }
            Err(err) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                warn!(
                    cycle,
                    error = %err,
                    consecutive_failures = self.consecutive_failures,
                    "current limit not applied, keeping previous telemetry"
                );
                self.last_error = Some(err.to_string());
                false
            }
        };

        let health = StationHealth {
            connected: self.engine.is_connected(),
            overruns: self.engine.overruns().get(),
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.clone(),
            system: self.housekeeping.run(cycle),
        };
        self.record_metrics(dispatched, &request, &health);

        let snapshot = self.publisher.publish(StationSnapshot {
            cycle,
            charge: self.charge.clone(),
            health,
            modules: self.registry.statuses(),
            published_at: Utc::now(),
        });
        if dispatched {
            for plugin in self.registry.plugins_mut() {
                plugin.late_poll(&snapshot);
            }
        }
        for plugin in self.registry.plugins_mut() {
            plugin.sync_state(&snapshot);
        }

        self.cycle += 1;
        CycleReport {
            cycle,
            voted,
            requested,
            site_limit,
            smoothed,
            dispatched,
        }
    }

    fn drain_inbox(&mut self) {
        while let Ok(command) = self.inbox.try_recv() {
            if let Err(err) = self.store.apply(command) {
                warn!(error = %err, "station command rejected");
            }
        }
    }

    fn collect_votes(&mut self, cycle: u64, local_time: NaiveTime) -> i32 {
        let ctx = PollContext {
            cycle,
            local_time,
            charge: &self.charge,
            charge_cycle: self.charge_cycle,
        };
        let mut voted = 0;
        for (name, entry) in self.registry.entries_mut() {
            entry.last_vote = None;
            if !entry.plugin.enabled() {
                continue;
            }
            let cadence = entry.plugin.poll_cadence();
            if cadence == 0 || cycle % cadence != 0 {
                continue;
            }
            match entry.plugin.poll(&ctx) {
                Ok(Some(amps)) => {
                    let amps = clamp_vote(amps);
                    debug!(module = %name, amps, "module polled");
                    entry.last_vote = Some(amps);
                    voted = voted.max(amps);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(module = %name, error = %err, "module poll failed, ignoring its vote");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_poll_failure(name);
                    }
                }
            }
        }
        voted
    }

    fn record_metrics(&self, dispatched: bool, request: &AggregatedRequest, health: &StationHealth) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        metrics.record_cycle(dispatched);
        metrics.set_link(health.connected, health.overruns);
        metrics.set_request(request.requested, request.smoothed, request.site_limit);
        if dispatched {
            metrics.set_charger(self.charge.state.id(), self.charge.live_voltage);
            for channel in CtChannel::iter() {
                metrics.set_ct(channel.as_ref(), self.charge.ct.get(channel));
            }
        }
    }
}
