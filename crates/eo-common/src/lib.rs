//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared configuration and logging primitives."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the charge-point controller workspace.
//! This crate exposes configuration loading and the tracing bootstrap
//! consumed by the hardware, protocol and scheduling crates.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, BoardSelection, BridgeBusConfig, HardwareConfig, LoadedAppConfig, LoggingConfig,
    MeteringConfig, MetricsConfig, Mode, ModuleParams, SimulationConfig, StationConfig,
    KNOWN_MODULES,
};
pub use logging::{init_tracing, purge_expired_logs, LogFormat};
