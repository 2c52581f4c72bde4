/// Canonical file paths for Dock Monitor data files.
///
/// Everything lives under %APPDATA%\DockMonitor\:
///   - config.toml  Edited by the user and the setup wizards, read by the monitor.
///   - status.toml  Written by the monitor, read by anyone curious about its state.
///   - logs\        Daily rolling log files.
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "DockMonitor";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";
pub const LOG_DIR_NAME: &str = "logs";
pub const LOG_FILE_PREFIX: &str = "dock-monitor.log";

/// Resolved locations of every file the monitor touches.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Resolves the data directory from %APPDATA%.
    pub fn from_env() -> Result<Self> {
        let appdata = std::env::var_os("APPDATA").context("APPDATA environment variable not set")?;
        Ok(Self::with_root(Path::new(&appdata)))
    }

    /// Places the data directory under an arbitrary root (used by tests).
    pub fn with_root(root: &Path) -> Self {
        Self {
            data_dir: root.join(APP_DIR_NAME),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    pub fn status_file(&self) -> PathBuf {
        self.data_dir.join(STATUS_FILE_NAME)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join(LOG_DIR_NAME)
    }

    /// Creates the data directory and its `logs` sub-directory.
    pub fn ensure_data_dir(&self) -> Result<()> {
        std::fs::create_dir_all(self.log_dir()).with_context(|| {
            format!("Failed to create data directory {}", self.data_dir.display())
        })
    }
}
