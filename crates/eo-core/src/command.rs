//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Commands into the arbitration loop and the collaborator handle."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use eo_common::config::ModuleParams;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ConfigError;
use crate::snapshot::{SnapshotReceiver, StationSnapshot};

/// A change requested by a collaborator. Applied by the scheduler at the start
/// of its next cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum StationCommand {
    /// Replace the module's whole parameter table, loading it if absent.
    ConfigureModule { module: String, params: ModuleParams },
    SetModuleParam {
        module: String,
        key: String,
        value: Value,
    },
    RemoveModule { module: String },
}

impl StationCommand {
    pub fn module(&self) -> &str {
        match self {
            StationCommand::ConfigureModule { module, .. }
            | StationCommand::SetModuleParam { module, .. }
            | StationCommand::RemoveModule { module } => module,
        }
    }
}

pub(crate) type CommandReceiver = mpsc::UnboundedReceiver<StationCommand>;

/// Cloneable access to a running station for web, MQTT or OCPP style collaborators.
#[derive(Debug, Clone)]
pub struct StationHandle {
    commands: mpsc::UnboundedSender<StationCommand>,
    snapshots: SnapshotReceiver,
}

impl StationHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<StationCommand>,
        snapshots: SnapshotReceiver,
    ) -> Self {
        Self {
            commands,
            snapshots,
        }
    }

    pub fn send(&self, command: StationCommand) -> Result<(), ConfigError> {
        self.commands
            .send(command)
            .map_err(|_| ConfigError::InboxClosed)
    }

    pub fn configure_module(
        &self,
        module: impl Into<String>,
        params: ModuleParams,
    ) -> Result<(), ConfigError> {
        self.send(StationCommand::ConfigureModule {
            module: module.into(),
            params,
        })
    }

    pub fn set_module_param(
        &self,
        module: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), ConfigError> {
        self.send(StationCommand::SetModuleParam {
            module: module.into(),
            key: key.into(),
            value,
        })
    }

    pub fn remove_module(&self, module: impl Into<String>) -> Result<(), ConfigError> {
        self.send(StationCommand::RemoveModule {
            module: module.into(),
        })
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<StationSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Receiver that wakes on every publication.
    pub fn subscribe(&self) -> SnapshotReceiver {
        self.snapshots.clone()
    }
}
