/// Transition actions.
///
/// When the dock state changes the configured profile is applied step by step:
///
/// 1. restart the configured devices (docking only)
/// 2. connect Bluetooth peers
/// 3. wait for Bluetooth audio endpoints to appear (only if a peer connected and a
///    default-audio change follows)
/// 4. switch default audio endpoints
/// 5. bounce the display resolution
///
/// Every step is isolated: a failure is logged and the next step still runs. The
/// OS calls of the restart, Bluetooth and audio steps block, so each of those steps
/// runs on the blocking pool.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, ProfileConfig};
use crate::delay::sleep_or_cancel;
use crate::monitor::DockState;

use self::audio::{apply_audio_config, AudioEndpoints, NativeAudio};
use self::bluetooth::{connect_all, Bluetooth, NativeBluetooth};
use self::device_restart::{restart_all, DeviceRestarter, NativeDeviceRestarter};
use self::display::{reset_resolution, DisplayModes, NativeDisplay, ResetError};

pub mod audio;
pub mod bluetooth;
pub mod device_restart;
pub mod display;

/// Time given to the audio stack to publish endpoints of a freshly connected peer.
pub const BLUETOOTH_SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Invoked by the monitor once per committed state change.
#[async_trait]
pub trait TransitionHandler: Send + Sync {
    async fn on_transition(&self, state: DockState, config: &Config, cancel: &CancellationToken);
}

/// The OS capabilities the pipeline drives.
#[derive(Clone)]
pub struct Capabilities {
    pub restarter: Arc<dyn DeviceRestarter>,
    pub bluetooth: Arc<dyn Bluetooth>,
    pub audio: Arc<dyn AudioEndpoints>,
    pub display: Arc<dyn DisplayModes>,
}

impl Capabilities {
    pub fn native() -> Self {
        Self {
            restarter: Arc::new(NativeDeviceRestarter),
            bluetooth: Arc::new(NativeBluetooth),
            audio: Arc::new(NativeAudio),
            display: Arc::new(NativeDisplay),
        }
    }
}

pub struct ActionPipeline {
    caps: Capabilities,
    bluetooth_settle: Duration,
}

impl ActionPipeline {
    pub fn new(caps: Capabilities) -> Self {
        Self {
            caps,
            bluetooth_settle: BLUETOOTH_SETTLE_DELAY,
        }
    }

    pub async fn on_docked(&self, config: &Config, cancel: &CancellationToken) {
        if !config.restart_devices.is_empty() {
            info!(count = config.restart_devices.len(), "Restarting configured devices");
            let restarter = Arc::clone(&self.caps.restarter);
            let ids = config.restart_devices.clone();
            if let Err(e) =
                tokio::task::spawn_blocking(move || restart_all(restarter.as_ref(), &ids)).await
            {
                warn!("Device restart task panicked: {e}");
            }
        }
        self.apply_profile(DockState::Docked, &config.docked, cancel).await;
    }

    pub async fn on_undocked(&self, config: &Config, cancel: &CancellationToken) {
        self.apply_profile(DockState::Undocked, &config.undocked, cancel).await;
    }

    /// Applies the Bluetooth, audio and display parts of `profile`.
    pub async fn apply_profile(
        &self,
        state: DockState,
        profile: &ProfileConfig,
        cancel: &CancellationToken,
    ) {
        let audio = profile.audio_action();

        let mut any_connected = false;
        if !profile.bluetooth_connect.is_empty() {
            info!(%state, count = profile.bluetooth_connect.len(), "Connecting Bluetooth devices");
            let bluetooth = Arc::clone(&self.caps.bluetooth);
            let addresses = profile.bluetooth_connect.clone();
            any_connected =
                tokio::task::spawn_blocking(move || connect_all(bluetooth.as_ref(), &addresses))
                    .await
                    .unwrap_or_else(|e| {
                        warn!(%state, "Bluetooth connect task panicked: {e}");
                        false
                    });
        }

        if any_connected && audio.is_some() {
            info!(delay_ms = self.bluetooth_settle.as_millis() as u64, "Waiting for Bluetooth audio endpoints");
            if !sleep_or_cancel(self.bluetooth_settle, cancel).await {
                warn!(%state, "Shutdown requested; skipping remaining transition steps");
                return;
            }
        }

        if let Some(audio) = audio {
            info!(%state, "Applying default audio devices");
            let system = Arc::clone(&self.caps.audio);
            let audio = audio.clone();
            match tokio::task::spawn_blocking(move || apply_audio_config(system.as_ref(), &audio)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(%state, "Audio switch incomplete: {e}"),
                Err(e) => warn!(%state, "Audio switch task panicked: {e}"),
            }
        }

        if profile.reset_resolution {
            match reset_resolution(
                self.caps.display.as_ref(),
                profile.temp_width,
                profile.temp_height,
                profile.restore_delay(),
                cancel,
            )
            .await
            {
                Ok(()) => {}
                Err(e @ ResetError::Restore { .. }) => {
                    warn!(%state, "Display restore failed, temporary mode may still be active: {e}")
                }
                Err(e) => warn!(%state, "Display reset failed: {e}"),
            }
        }
    }
}

#[async_trait]
impl TransitionHandler for ActionPipeline {
    async fn on_transition(&self, state: DockState, config: &Config, cancel: &CancellationToken) {
        match state {
            DockState::Docked => self.on_docked(config, cancel).await,
            DockState::Undocked => self.on_undocked(config, cancel).await,
        }
    }
}
