//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Host board identification for transport selection."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::transport::TransportKind;

/// Board revisions wired to the UART bridge. Everything else talks direct serial.
pub const BRIDGE_BOARD_REVISIONS: &[&str] = &["900092", "900093", "9000c1", "902120"];

/// What the probe learned about the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBoard {
    pub revision: Option<String>,
    pub transport: TransportKind,
}

/// Classify a `/proc/cpuinfo` style document.
pub fn identify_board(cpuinfo: &str) -> HostBoard {
    let revision = cpuinfo.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == "Revision").then(|| value.trim().to_ascii_lowercase())
    });
    let transport = match revision.as_deref() {
        Some(rev) if BRIDGE_BOARD_REVISIONS.contains(&rev) => TransportKind::Bridge,
        _ => TransportKind::DirectSerial,
    };
    HostBoard {
        revision,
        transport,
    }
}

/// Read and classify the host identity file. An unreadable file falls back to direct serial.
pub fn probe_board(cpuinfo_path: &Path) -> HostBoard {
    let board = match fs::read_to_string(cpuinfo_path) {
        Ok(contents) => identify_board(&contents),
        Err(err) => {
            warn!(path = %cpuinfo_path.display(), error = %err, "board identity unavailable");
            HostBoard {
                revision: None,
                transport: TransportKind::DirectSerial,
            }
        }
    };
    info!(revision = ?board.revision, transport = %board.transport, "host board probed");
    board
}
