//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Current arbitration core for the charge-point controller."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Policy modules, the arbitration loop and the published station snapshot.

pub mod command;
pub mod config_store;
pub mod error;
pub mod housekeeping;
pub mod pacing;
pub mod params;
pub mod plugin;
pub mod plugins;
pub mod registry;
pub mod scheduler;
pub mod smoothing;
pub mod snapshot;

/// Name the daemon logs and rolls files under.
pub const SERVICE_NAME: &str = "eo-chargerd";

pub use command::{StationCommand, StationHandle};
pub use config_store::ModuleConfigStore;
pub use error::{ConfigError, PluginError};
pub use housekeeping::Housekeeping;
pub use pacing::RateLimiter;
pub use params::{ModuleSettings, ParamDefault, ParamKind, ParamSpec, ResolvedParams};
pub use plugin::{ChargePlugin, ChargerOverrides, PollContext, SiteLimits};
pub use plugins::PluginKind;
pub use registry::{ModuleRegistry, ReconcileReport};
pub use scheduler::{aggregate_votes, apply_overrides, clamp_vote, ArbitrationScheduler, CycleReport};
pub use smoothing::MovingAverage;
pub use snapshot::{
    AggregatedRequest, ChargeStatus, ModuleStatus, SnapshotPublisher, SnapshotReceiver,
    StationHealth, StationSnapshot, SystemMetrics,
};
