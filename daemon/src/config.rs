use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::actions::audio::{Direction, Role};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const MIN_POLL_INTERVAL_MS: u64 = 200;
pub const DEFAULT_TEMP_WIDTH: u32 = 1280;
pub const DEFAULT_TEMP_HEIGHT: u32 = 1024;
pub const DEFAULT_RESTORE_DELAY_MS: u64 = 2000;

/// Written on first run so the file is self-describing when opened by hand.
pub const DEFAULT_CONFIG_TOML: &str = r#"# Dock Monitor configuration.
# Any change to this file restarts the monitor automatically.

# How often the device list is polled, in milliseconds (minimum 200).
poll_interval_ms = 1000

# Device instance ids restarted on every dock, e.g.
# restart_devices = ['USB\VID_0BDA&PID_8153\000001']
restart_devices = []

# Tokens identifying the dock. Run `dock-monitor detect` to fill this in.
# Each entry is either a bare string or a table with a label:
# dock_devices = ["VID_17EF&PID_3082", { token = "VID_17EF&PID_3083", name = "USB Hub" }]
dock_devices = []

[docked]
# Paired Bluetooth devices to (re)connect, e.g. ["80:39:8C:6A:92:D3"].
bluetooth_connect = []
# Briefly switch to temp_width x temp_height to force monitors to re-negotiate.
reset_resolution = false
temp_width = 1280
temp_height = 1024
restore_delay_ms = 2000

# Default audio endpoints. Run `dock-monitor set-audio` to pick them interactively.
[docked.audio]

[undocked]
bluetooth_connect = []
reset_resolution = false

[undocked.audio]
"#;

/// Root configuration structure. Deserialized from %APPDATA%\DockMonitor\config.toml.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Delay between device snapshots. Clamped to at least [`MIN_POLL_INTERVAL_MS`].
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Device instance ids restarted, in order, whenever the dock is attached.
    #[serde(default)]
    pub restart_devices: Vec<String>,
    /// The dock signature: present if any token matches any device id.
    #[serde(default)]
    pub dock_devices: Vec<DockDevice>,
    #[serde(default)]
    pub docked: ProfileConfig,
    #[serde(default)]
    pub undocked: ProfileConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            restart_devices: Vec::new(),
            dock_devices: Vec::new(),
            docked: ProfileConfig::default(),
            undocked: ProfileConfig::default(),
        }
    }
}

impl Config {
    /// Returns the poll interval with the lower bound applied.
    pub fn effective_poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }
}

/// One dock match token with an optional human-readable label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DockDeviceEntry")]
pub struct DockDevice {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DockDevice {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            name: None,
        }
    }
}

/// Accepts both `"VID_..."` and `{ token = "VID_...", name = "..." }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum DockDeviceEntry {
    Token(String),
    Full {
        token: String,
        #[serde(default)]
        name: Option<String>,
    },
}

impl From<DockDeviceEntry> for DockDevice {
    fn from(entry: DockDeviceEntry) -> Self {
        match entry {
            DockDeviceEntry::Token(token) => DockDevice { token, name: None },
            DockDeviceEntry::Full { token, name } => DockDevice { token, name },
        }
    }
}

/// Side effects applied on entering one dock state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Bluetooth MAC addresses connected in order.
    #[serde(default)]
    pub bluetooth_connect: Vec<String>,
    #[serde(default)]
    pub reset_resolution: bool,
    #[serde(default = "default_temp_width")]
    pub temp_width: u32,
    #[serde(default = "default_temp_height")]
    pub temp_height: u32,
    #[serde(default = "default_restore_delay")]
    pub restore_delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfig>,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            bluetooth_connect: Vec::new(),
            reset_resolution: false,
            temp_width: DEFAULT_TEMP_WIDTH,
            temp_height: DEFAULT_TEMP_HEIGHT,
            restore_delay_ms: DEFAULT_RESTORE_DELAY_MS,
            audio: None,
        }
    }
}

impl ProfileConfig {
    /// The audio assignment, if it names at least one endpoint.
    ///
    /// An empty `[docked.audio]` table (as written by the default config) counts
    /// as "no audio action".
    pub fn audio_action(&self) -> Option<&AudioConfig> {
        self.audio.as_ref().filter(|a| !a.is_empty())
    }

    pub fn restore_delay(&self) -> Duration {
        Duration::from_millis(self.restore_delay_ms)
    }
}

/// Default endpoint name patterns, one per (direction, role) slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_multimedia: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_communications: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_multimedia: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_communications: Option<String>,
}

/// A configured slot with a non-blank pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSlot<'a> {
    pub direction: Direction,
    pub role: Role,
    pub pattern: &'a str,
}

impl AudioConfig {
    /// Returns the configured slots in application order (render first, then capture).
    pub fn slots(&self) -> Vec<AudioSlot<'_>> {
        [
            (Direction::Render, Role::Console, &self.render_default),
            (Direction::Render, Role::Multimedia, &self.render_multimedia),
            (Direction::Render, Role::Communications, &self.render_communications),
            (Direction::Capture, Role::Console, &self.capture_default),
            (Direction::Capture, Role::Multimedia, &self.capture_multimedia),
            (Direction::Capture, Role::Communications, &self.capture_communications),
        ]
        .into_iter()
        .filter_map(|(direction, role, pattern)| {
            let pattern = pattern.as_deref()?.trim();
            (!pattern.is_empty()).then_some(AudioSlot {
                direction,
                role,
                pattern,
            })
        })
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Like [`load_or_default`] but never fails: a malformed file yields the defaults.
/// Used by the one-shot CLI tools.
pub fn load_lenient(path: &Path) -> Config {
    load_or_default(path).unwrap_or_else(|e| {
        warn!("{e:#}; using defaults");
        Config::default()
    })
}

/// Writes [`DEFAULT_CONFIG_TOML`] to `path` unless a file is already there.
pub fn ensure_default_exists(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("Failed to write default config: {}", path.display()))
}

/// Reads `path` as a generic TOML table, lets `edit` modify it, and writes it back.
///
/// A missing or unparseable file is treated as an empty table so the wizards can
/// always save their result. Keys the edit does not touch are preserved; comments are not.
pub fn update_document<F>(path: &Path, edit: F) -> Result<()>
where
    F: FnOnce(&mut toml::Table),
{
    let mut table = match std::fs::read_to_string(path) {
        Ok(content) => content.parse::<toml::Table>().unwrap_or_else(|e| {
            warn!("Existing config is not valid TOML, starting from an empty document: {e}");
            toml::Table::new()
        }),
        Err(_) => toml::Table::new(),
    };

    edit(&mut table);

    let content = toml::to_string_pretty(&table).context("Failed to serialize config")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))
}

/// True if `event` is a create/modify touching `path`.
fn is_config_write(event: &notify::Event, path: &Path) -> bool {
    let affects_config = event.paths.iter().any(|p| p == path);
    let is_write = matches!(
        event.kind,
        notify::EventKind::Create(_) | notify::EventKind::Modify(_)
    );
    affects_config && is_write
}

/// Spawns a file watcher on the parent directory of `path` and sends one `()` per
/// create/modify event on the config file. Bursts are coalesced by the receiver.
///
/// Returns when `tx` is closed or the watcher cannot be created.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<()>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            error!("Failed to create config watcher: {e}");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            error!("Config path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        error!("Failed to watch config directory {}: {e}", watch_dir.display());
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        if is_config_write(&event, &path) {
            debug!(kind = ?event.kind, "Config file changed");
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_temp_width() -> u32 {
    DEFAULT_TEMP_WIDTH
}

fn default_temp_height() -> u32 {
    DEFAULT_TEMP_HEIGHT
}

fn default_restore_delay() -> u64 {
    DEFAULT_RESTORE_DELAY_MS
}
