use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::actions::TransitionHandler;
use crate::classifier::is_docked;
use crate::config::Config;
use crate::delay::sleep_or_cancel;
use crate::inventory::{DeviceInventory, Snapshot};
use crate::status::StatusFile;

/// Wait after a failed device scan before the next attempt.
pub const SCAN_FAILURE_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockState {
    Docked,
    Undocked,
}

impl DockState {
    pub fn from_docked(docked: bool) -> Self {
        if docked {
            DockState::Docked
        } else {
            DockState::Undocked
        }
    }
}

impl fmt::Display for DockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DockState::Docked => "Docked",
            DockState::Undocked => "Undocked",
        })
    }
}

/// Dock state machine over successive device snapshots.
///
/// The engine owns the current state and the baseline snapshot; ticks take `&mut self`
/// so they can never overlap.
pub struct MonitorEngine<I, H> {
    inventory: I,
    handler: H,
    config: Arc<RwLock<Config>>,
    cancel: CancellationToken,
    baseline: Snapshot,
    state: Option<DockState>,
}

impl<I: DeviceInventory, H: TransitionHandler> MonitorEngine<I, H> {
    pub fn new(
        inventory: I,
        handler: H,
        config: Arc<RwLock<Config>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inventory,
            handler,
            config,
            cancel,
            baseline: Snapshot::new(),
            state: None,
        }
    }

    /// `None` until [`initialize`](Self::initialize) has succeeded.
    pub fn state(&self) -> Option<DockState> {
        self.state
    }

    pub async fn poll_interval(&self) -> Duration {
        self.config.read().await.effective_poll_interval()
    }

    /// Classifies the first snapshot and applies its profile unconditionally.
    pub async fn initialize(&mut self) -> Result<DockState> {
        let snapshot = self.inventory.snapshot()?;
        let config = self.config.read().await.clone();
        let state = DockState::from_docked(is_docked(&config.dock_devices, &snapshot));
        info!(%state, devices = snapshot.len(), "Initial dock state");

        self.baseline = snapshot;
        self.state = Some(state);
        self.handler.on_transition(state, &config, &self.cancel).await;
        Ok(state)
    }

    /// Takes a new snapshot and applies the new profile if the dock state flipped.
    ///
    /// Returns the new state on a transition. Scan failures leave the engine untouched.
    pub async fn tick(&mut self) -> Result<Option<DockState>> {
        let Some(current) = self.state else {
            return self.initialize().await.map(Some);
        };

        let snapshot = self.inventory.snapshot()?;
        if snapshot.set_eq(&self.baseline) {
            return Ok(None);
        }

        let config = self.config.read().await.clone();
        let next = DockState::from_docked(is_docked(&config.dock_devices, &snapshot));
        debug!(devices = snapshot.len(), state = %next, "Device set changed");
        self.baseline = snapshot;

        if next == current {
            return Ok(None);
        }

        info!(from = %current, to = %next, "Dock state changed");
        self.state = Some(next);
        self.handler.on_transition(next, &config, &self.cancel).await;
        Ok(Some(next))
    }

    #[cfg(test)]
    fn baseline(&self) -> &Snapshot {
        &self.baseline
    }
}

/// Polls until `cancel` fires.
///
/// The initial scan is retried until it succeeds. Tick failures are logged and
/// followed by [`SCAN_FAILURE_BACKOFF`]; the loop itself never gives up.
pub async fn run<I, H>(mut engine: MonitorEngine<I, H>, mut status: StatusFile, cancel: CancellationToken)
where
    I: DeviceInventory,
    H: TransitionHandler,
{
    loop {
        match engine.initialize().await {
            Ok(state) => {
                status.record_transition(state);
                break;
            }
            Err(e) => {
                error!("Initial device scan failed: {e:#}");
                status.record_error(format!("{e:#}"));
                if !sleep_or_cancel(SCAN_FAILURE_BACKOFF, &cancel).await {
                    return;
                }
            }
        }
    }

    loop {
        let interval = engine.poll_interval().await;
        if !sleep_or_cancel(interval, &cancel).await {
            break;
        }

        match engine.tick().await {
            Ok(Some(state)) => status.record_transition(state),
            Ok(None) => status.clear_error(),
            Err(e) => {
                error!("Device scan failed: {e:#}");
                status.record_error(format!("{e:#}"));
                if !sleep_or_cancel(SCAN_FAILURE_BACKOFF, &cancel).await {
                    break;
                }
            }
        }
    }
    info!("Monitor loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DockDevice;
    use crate::inventory::DeviceNames;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const DOCK: &str = "VID_17EF&PID_3082";

    /// Replays scripted snapshots; the last one repeats forever.
    struct ScriptedInventory {
        script: Mutex<VecDeque<Option<Vec<String>>>>,
        last: Mutex<Option<Vec<String>>>,
        scanned_at: Arc<Mutex<Vec<tokio::time::Instant>>>,
    }

    impl ScriptedInventory {
        /// `None` entries make that scan fail.
        fn new(script: Vec<Option<Vec<String>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(Some(Vec::new())),
                scanned_at: Arc::default(),
            }
        }
    }

    impl DeviceInventory for ScriptedInventory {
        fn snapshot(&self) -> Result<Snapshot> {
            self.scanned_at.lock().unwrap().push(tokio::time::Instant::now());
            let next = self.script.lock().unwrap().pop_front();
            let ids = match next {
                Some(entry) => {
                    *self.last.lock().unwrap() = entry.clone();
                    entry
                }
                None => self.last.lock().unwrap().clone(),
            };
            let ids = ids.ok_or_else(|| anyhow!("enumeration failed"))?;
            Ok(ids.iter().map(String::as_str).collect())
        }

        fn names(&self) -> Result<DeviceNames> {
            Ok(DeviceNames::new())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingHandler {
        calls: Arc<Mutex<Vec<DockState>>>,
    }

    #[async_trait]
    impl TransitionHandler for RecordingHandler {
        async fn on_transition(&self, state: DockState, _config: &Config, _cancel: &CancellationToken) {
            self.calls.lock().unwrap().push(state);
        }
    }

    fn docked(suffix: &str) -> Option<Vec<String>> {
        Some(vec![
            format!(r"USB\{DOCK}&MI_00\{suffix}"),
            r"ACPI\PNP0C0A\1".to_string(),
        ])
    }

    fn undocked(suffix: &str) -> Option<Vec<String>> {
        Some(vec![r"ACPI\PNP0C0A\1".to_string(), format!(r"HID\VID_1234&PID_5678\{suffix}")])
    }

    fn engine(
        script: Vec<Option<Vec<String>>>,
    ) -> (MonitorEngine<ScriptedInventory, RecordingHandler>, RecordingHandler) {
        let handler = RecordingHandler::default();
        let config = Config {
            dock_devices: vec![DockDevice::new(DOCK)],
            ..Config::default()
        };
        let engine = MonitorEngine::new(
            ScriptedInventory::new(script),
            handler.clone(),
            Arc::new(RwLock::new(config)),
            CancellationToken::new(),
        );
        (engine, handler)
    }

    #[tokio::test]
    async fn initialize_applies_undocked_profile_too() {
        let (mut engine, handler) = engine(vec![undocked("a")]);
        assert_eq!(engine.initialize().await.unwrap(), DockState::Undocked);
        assert_eq!(*handler.calls.lock().unwrap(), vec![DockState::Undocked]);
    }

    #[tokio::test]
    async fn instance_noise_never_retriggers_actions() {
        let (mut engine, handler) = engine(vec![
            docked("7&1"),
            docked("7&2"),
            docked("7&3"),
            docked("8&4"),
            docked("9&5"),
        ]);

        engine.initialize().await.unwrap();
        for _ in 0..4 {
            assert_eq!(engine.tick().await.unwrap(), None);
        }
        assert_eq!(*handler.calls.lock().unwrap(), vec![DockState::Docked]);
    }

    #[tokio::test]
    async fn every_flip_is_applied_once_in_order() {
        let (mut engine, handler) = engine(vec![
            docked("1"),
            undocked("2"),
            docked("3"),
            undocked("4"),
            undocked("5"),
            docked("6"),
        ]);

        engine.initialize().await.unwrap();
        let mut transitions = Vec::new();
        for _ in 0..5 {
            if let Some(state) = engine.tick().await.unwrap() {
                transitions.push(state);
            }
        }

        assert_eq!(
            transitions,
            vec![DockState::Undocked, DockState::Docked, DockState::Undocked, DockState::Docked]
        );
        assert_eq!(
            *handler.calls.lock().unwrap(),
            vec![
                DockState::Docked,
                DockState::Undocked,
                DockState::Docked,
                DockState::Undocked,
                DockState::Docked
            ]
        );
    }

    #[tokio::test]
    async fn baseline_is_replaced_even_without_a_flip() {
        let (mut engine, _handler) = engine(vec![undocked("1"), undocked("2")]);
        engine.initialize().await.unwrap();
        engine.tick().await.unwrap();
        assert!(engine.baseline().contains(r"HID\VID_1234&PID_5678\2"));
        assert!(!engine.baseline().contains(r"HID\VID_1234&PID_5678\1"));
    }

    #[tokio::test]
    async fn case_only_differences_are_not_a_change() {
        let (mut engine, _handler) = engine(vec![
            Some(vec![r"USB\Dock\abc".to_string()]),
            Some(vec![r"usb\dock\ABC".to_string()]),
        ]);
        engine.initialize().await.unwrap();
        engine.tick().await.unwrap();
        // Fast path: the original spelling is still the baseline.
        assert_eq!(engine.baseline().iter().next(), Some(r"USB\Dock\abc"));
    }

    #[tokio::test]
    async fn scan_failure_leaves_state_unchanged() {
        let (mut engine, handler) = engine(vec![docked("1"), None, docked("1")]);
        engine.initialize().await.unwrap();

        assert!(engine.tick().await.is_err());
        assert_eq!(engine.state(), Some(DockState::Docked));
        assert_eq!(engine.tick().await.unwrap(), None);
        assert_eq!(handler.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tick_before_initialize_initializes() {
        let (mut engine, handler) = engine(vec![docked("1")]);
        assert_eq!(engine.tick().await.unwrap(), Some(DockState::Docked));
        assert_eq!(handler.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_signature_is_always_undocked() {
        let handler = RecordingHandler::default();
        let mut engine = MonitorEngine::new(
            ScriptedInventory::new(vec![docked("1")]),
            handler.clone(),
            Arc::new(RwLock::new(Config::default())),
            CancellationToken::new(),
        );
        assert_eq!(engine.initialize().await.unwrap(), DockState::Undocked);
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_initial_scan_and_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let status_path = dir.path().join("status.toml");
        let (engine, handler) = engine(vec![None, docked("1"), undocked("2")]);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            engine,
            StatusFile::create(status_path.clone()),
            cancel.clone(),
        ));

        // One failed scan (5 s backoff), initialize, then one tick after the 1 s interval.
        tokio::time::sleep(SCAN_FAILURE_BACKOFF + Duration::from_millis(1500)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(
            *handler.calls.lock().unwrap(),
            vec![DockState::Docked, DockState::Undocked]
        );
        let content = std::fs::read_to_string(&status_path).unwrap();
        assert!(content.contains("state = \"undocked\""));
        assert!(!content.contains("error"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tick_backs_off_and_polling_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let status_path = dir.path().join("status.toml");
        let inventory = ScriptedInventory::new(vec![docked("1"), None, docked("1"), undocked("2")]);
        let scanned_at = Arc::clone(&inventory.scanned_at);
        let handler = RecordingHandler::default();
        let engine = MonitorEngine::new(
            inventory,
            handler.clone(),
            Arc::new(RwLock::new(Config {
                dock_devices: vec![DockDevice::new(DOCK)],
                ..Config::default()
            })),
            CancellationToken::new(),
        );
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        let task = tokio::spawn(run(
            engine,
            StatusFile::create(status_path.clone()),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(3000)).await;
        let content = std::fs::read_to_string(&status_path).unwrap();
        assert!(content.contains("enumeration failed"), "{content}");

        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert!(!task.is_finished());
        cancel.cancel();
        task.await.unwrap();

        // initialize at 0, failing tick at 1 s, then 5 s backoff plus the 1 s interval.
        let offsets: Vec<u128> = scanned_at
            .lock()
            .unwrap()
            .iter()
            .map(|t| (*t - start).as_millis())
            .collect();
        assert_eq!(offsets, vec![0, 1000, 7000, 8000]);
        assert_eq!(
            *handler.calls.lock().unwrap(),
            vec![DockState::Docked, DockState::Undocked]
        );
        let content = std::fs::read_to_string(&status_path).unwrap();
        assert!(content.contains("state = \"undocked\""));
        assert!(!content.contains("enumeration failed"));
    }
}
