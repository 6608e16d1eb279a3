//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the controller.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Address actually bound, useful when listening on port 0.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "eo_chargerd_starts_total",
            "Total number of times the charger daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "eo_chargerd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "eo_chargerd_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "target", "mode"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, target: &str, mode: &str) {
        self.build_info
            .with_label_values(&[version, target, mode])
            .set(1.0);
    }
}

/// Per-cycle view of the arbitration loop and the charger link.
#[derive(Clone, Debug)]
pub struct StationMetrics {
    cycles_total: IntCounter,
    failed_cycles_total: IntCounter,
    serial_overruns: IntGauge,
    connected: IntGauge,
    amps_requested: IntGauge,
    amps_sent: IntGauge,
    site_shortfall: IntGauge,
    charger_state: IntGauge,
    ct_current: GaugeVec,
    live_voltage: Gauge,
    module_poll_failures: IntCounterVec,
}

impl StationMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let cycles_total = IntCounter::with_opts(Opts::new(
            "eo_cycles_total",
            "Arbitration cycles executed",
        ))?;
        registry.register(Box::new(cycles_total.clone()))?;

        let failed_cycles_total = IntCounter::with_opts(Opts::new(
            "eo_failed_cycles_total",
            "Cycles whose current limit could not be applied",
        ))?;
        registry.register(Box::new(failed_cycles_total.clone()))?;

        let serial_overruns = IntGauge::with_opts(Opts::new(
            "eo_serial_overruns",
            "Charger replies discarded because of receive overruns since startup",
        ))?;
        registry.register(Box::new(serial_overruns.clone()))?;

        let connected = IntGauge::with_opts(Opts::new(
            "eo_charger_connected",
            "Indicator (0/1) whether the charger controller address is known",
        ))?;
        registry.register(Box::new(connected.clone()))?;

        let amps_requested = IntGauge::with_opts(Opts::new(
            "eo_amps_requested",
            "Arbitrated current before smoothing",
        ))?;
        registry.register(Box::new(amps_requested.clone()))?;

        let amps_sent = IntGauge::with_opts(Opts::new(
            "eo_amps_sent",
            "Smoothed current sent to the charger",
        ))?;
        registry.register(Box::new(amps_sent.clone()))?;

        let site_shortfall = IntGauge::with_opts(Opts::new(
            "eo_site_limit_shortfall_amps",
            "Amps removed from the request to respect the site limit",
        ))?;
        registry.register(Box::new(site_shortfall.clone()))?;

        let charger_state = IntGauge::with_opts(Opts::new(
            "eo_charger_state",
            "Charger state id last reported by the board",
        ))?;
        registry.register(Box::new(charger_state.clone()))?;

        let ct_current = GaugeVec::new(
            Opts::new("eo_ct_current_amps", "Calibrated CT current by channel"),
            &["channel"],
        )?;
        registry.register(Box::new(ct_current.clone()))?;

        let live_voltage = Gauge::with_opts(Opts::new(
            "eo_live_voltage_rms",
            "RMS line voltage derived from charger telemetry",
        ))?;
        registry.register(Box::new(live_voltage.clone()))?;

        let module_poll_failures = IntCounterVec::new(
            Opts::new(
                "eo_module_poll_failures_total",
                "Policy module polls that failed or returned an unusable vote",
            ),
            &["module"],
        )?;
        registry.register(Box::new(module_poll_failures.clone()))?;

        Ok(Self {
            cycles_total,
            failed_cycles_total,
            serial_overruns,
            connected,
            amps_requested,
            amps_sent,
            site_shortfall,
            charger_state,
            ct_current,
            live_voltage,
            module_poll_failures,
        })
    }

    pub fn record_cycle(&self, success: bool) {
        self.cycles_total.inc();
        if !success {
            self.failed_cycles_total.inc();
        }
    }

    pub fn set_link(&self, connected: bool, overruns: u64) {
        self.connected.set(i64::from(connected));
        self.serial_overruns.set(overruns as i64);
    }

    pub fn set_request(&self, requested: i32, sent: i32, shortfall: i32) {
        self.amps_requested.set(i64::from(requested));
        self.amps_sent.set(i64::from(sent));
        self.site_shortfall.set(i64::from(shortfall));
    }

    pub fn set_charger(&self, state_id: u8, live_voltage: f64) {
        self.charger_state.set(i64::from(state_id));
        self.live_voltage.set(live_voltage);
    }

    pub fn set_ct(&self, channel: &str, amps: f64) {
        self.ct_current.with_label_values(&[channel]).set(amps);
    }

    pub fn record_poll_failure(&self, module: &str) {
        self.module_poll_failures.with_label_values(&[module]).inc();
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_metrics_register_and_render() {
        let registry = new_registry();
        let metrics = StationMetrics::new(registry.clone()).unwrap();
        metrics.record_cycle(true);
        metrics.record_cycle(false);
        metrics.set_request(20, 15, 5);
        metrics.set_ct("site", 12.5);
        metrics.record_poll_failure("scheduler");

        let body = TextEncoder::new()
            .encode_to_string(&registry.gather())
            .unwrap();
        assert!(body.contains("eo_cycles_total 2"));
        assert!(body.contains("eo_failed_cycles_total 1"));
        assert!(body.contains("eo_site_limit_shortfall_amps 5"));
        assert!(body.contains("eo_ct_current_amps{channel=\"site\"} 12.5"));
        assert!(body.contains("eo_module_poll_failures_total{module=\"scheduler\"} 1"));
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let registry = new_registry();
        StationMetrics::new(registry.clone()).unwrap();
        assert!(StationMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn handler_serves_text_exposition() {
        let registry = new_registry();
        DaemonMetrics::new(registry.clone()).unwrap().inc_start();
        let response = metrics_handler(registry).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            prometheus::TEXT_FORMAT
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exporter_binds_and_shuts_down() {
        let registry = new_registry();
        DaemonMetrics::new(registry.clone()).unwrap().inc_start();
        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(server.addr().port(), 0);
        server.shutdown().await.unwrap();
    }
}
