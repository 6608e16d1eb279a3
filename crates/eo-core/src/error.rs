//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Error types for policy modules and station commands."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use thiserror::Error;

/// Failures raised by a policy module while configuring or polling.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("module '{module}' rejected parameter '{param}': {reason}")]
    InvalidParameter {
        module: &'static str,
        param: &'static str,
        reason: String,
    },
    #[error("module '{module}' failed to poll: {reason}")]
    Poll { module: &'static str, reason: String },
    #[error("unknown module '{0}'")]
    UnknownModule(String),
}

/// Rejections of commands sent to the station through its inbox.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown module '{0}'")]
    UnknownModule(String),
    #[error("module '{0}' is not configured")]
    NotConfigured(String),
    #[error("station command inbox is closed")]
    InboxClosed,
}
