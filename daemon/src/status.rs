use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::monitor::DockState;

/// Current operational state of the monitor.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    /// The initial device scan has not completed yet.
    Starting,
    Docked,
    Undocked,
}

impl From<DockState> for MonitorState {
    fn from(state: DockState) -> Self {
        match state {
            DockState::Docked => MonitorState::Docked,
            DockState::Undocked => MonitorState::Undocked,
        }
    }
}

/// Runtime status written by the monitor to %APPDATA%\DockMonitor\status.toml.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorStatus {
    /// Binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: MonitorState,
    /// RFC 3339 timestamp of the most recent dock state change, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition: Option<String>,
    /// Message of the most recent failed device scan; cleared on the next success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MonitorStatus {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: MonitorState::Starting,
            last_transition: None,
            error: None,
        }
    }
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Failures are logged, never propagated.
pub fn write_status(path: &Path, status: &MonitorStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("Failed to create status directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!("Failed to write status file: {e}");
            }
        }
        Err(e) => warn!("Failed to serialize status: {e}"),
    }
}

/// Owns the status file for one host lifetime and rewrites it on every change.
#[derive(Debug)]
pub struct StatusFile {
    path: PathBuf,
    status: MonitorStatus,
}

impl StatusFile {
    /// Writes the initial `starting` status.
    pub fn create(path: PathBuf) -> Self {
        let status = MonitorStatus::new();
        write_status(&path, &status);
        Self { path, status }
    }

    pub fn status(&self) -> &MonitorStatus {
        &self.status
    }

    pub fn record_transition(&mut self, state: DockState) {
        self.status.state = state.into();
        self.status.last_transition = Some(chrono::Local::now().to_rfc3339());
        self.status.error = None;
        write_status(&self.path, &self.status);
    }

    pub fn record_error(&mut self, message: String) {
        if self.status.error.as_deref() == Some(message.as_str()) {
            return;
        }
        self.status.error = Some(message);
        write_status(&self.path, &self.status);
    }

    /// Clears a previously recorded error. No write when there was none.
    pub fn clear_error(&mut self) {
        if self.status.error.take().is_some() {
            write_status(&self.path, &self.status);
        }
    }
}
