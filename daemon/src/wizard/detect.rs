/// Dock signature detection.
///
/// For each dock port the user connects and disconnects the dock; the ids that only
/// exist while connected are reduced to `VID_xxxx&PID_yyyy` tokens. The union over
/// all rounds becomes `dock_devices`, so docking on any tested port is recognised.
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use super::ask;
use crate::classifier::extract_hardware_token;
use crate::config::{update_document, DockDevice};
use crate::inventory::{canonical, DeviceInventory, DeviceNames, Snapshot};

/// Tokens of the devices in `docked` but not in `undocked`.
///
/// The first friendly name seen for a token is recorded in `labels`.
pub fn tokens_added(
    docked: &Snapshot,
    undocked: &Snapshot,
    names: &DeviceNames,
    labels: &mut BTreeMap<String, String>,
) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    for id in docked.difference(undocked) {
        let Some(token) = extract_hardware_token(id) else {
            continue;
        };
        if !labels.contains_key(&token) {
            if let Some(name) = names.get(&canonical(id)).filter(|n| !n.trim().is_empty()) {
                labels.insert(token.clone(), name.clone());
            }
        }
        tokens.insert(token);
    }
    tokens
}

/// Sorted dock devices for `tokens`, labelled where a name is known.
pub fn dock_devices(tokens: &BTreeSet<String>, labels: &BTreeMap<String, String>) -> Vec<DockDevice> {
    tokens
        .iter()
        .map(|token| DockDevice {
            token: token.clone(),
            name: labels.get(token).cloned(),
        })
        .collect()
}

/// Replaces `dock_devices` in the config file, keeping every other key.
pub fn save_dock_devices(config_path: &Path, devices: &[DockDevice]) -> Result<()> {
    let value = toml::Value::try_from(devices).context("Failed to serialize dock devices")?;
    update_document(config_path, |table| {
        table.insert("dock_devices".to_string(), value);
    })
}

fn describe(token: &str, labels: &BTreeMap<String, String>) -> String {
    match labels.get(token) {
        Some(name) => format!("  {token}  ({name})"),
        None => format!("  {token}"),
    }
}

/// Runs the wizard. Returns 1 when no dock device was found.
pub fn run<R: BufRead, W: Write>(
    inventory: &dyn DeviceInventory,
    input: &mut R,
    out: &mut W,
    config_path: &Path,
) -> Result<i32> {
    let mut all_tokens = BTreeSet::new();
    let mut labels = BTreeMap::new();
    let mut rounds = 0;

    loop {
        writeln!(out, "--- Port {} ---", rounds + 1)?;
        if ask(input, out, "Connect docking station, then press Enter...")?.is_none() {
            break;
        }
        let docked = inventory.snapshot()?;
        // Names can only be read while the dock's devices are present.
        let names = inventory.names().unwrap_or_else(|e| {
            warn!("Could not read device names: {e:#}");
            DeviceNames::new()
        });

        if ask(input, out, "Disconnect docking station, then press Enter...")?.is_none() {
            break;
        }
        let undocked = inventory.snapshot()?;

        let port_tokens = tokens_added(&docked, &undocked, &names, &mut labels);
        rounds += 1;
        if port_tokens.is_empty() {
            writeln!(out, "No new devices detected on this port.")?;
        } else {
            writeln!(out, "Detected {} token(s) on port {rounds}:", port_tokens.len())?;
            for token in &port_tokens {
                writeln!(out, "{}", describe(token, &labels))?;
            }
        }
        all_tokens.extend(port_tokens);

        writeln!(out)?;
        match ask(
            input,
            out,
            "Connect to another port and press Enter, or press Space+Enter to finish.",
        )? {
            Some(answer) if !answer.contains(' ') => continue,
            _ => break,
        }
    }

    if all_tokens.is_empty() {
        writeln!(out, "No dock devices detected across all ports.")?;
        return Ok(1);
    }

    let devices = dock_devices(&all_tokens, &labels);
    writeln!(out)?;
    writeln!(
        out,
        "=== Final result: {} dock device token(s) (union of {rounds} port(s)) ===",
        devices.len()
    )?;
    for device in &devices {
        writeln!(out, "{}", describe(&device.token, &labels))?;
    }

    save_dock_devices(config_path, &devices)?;
    writeln!(out)?;
    writeln!(out, "dock_devices written to {}", config_path.display())?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_or_default;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedInventory {
        snapshots: Mutex<VecDeque<Snapshot>>,
        names: DeviceNames,
    }

    impl ScriptedInventory {
        fn new(snapshots: Vec<Vec<&str>>, names: &[(&str, &str)]) -> Self {
            Self {
                snapshots: Mutex::new(
                    snapshots
                        .into_iter()
                        .map(|ids| ids.into_iter().collect())
                        .collect(),
                ),
                names: names
                    .iter()
                    .map(|(id, name)| (canonical(id), name.to_string()))
                    .collect(),
            }
        }
    }

    impl DeviceInventory for ScriptedInventory {
        fn snapshot(&self) -> Result<Snapshot> {
            Ok(self.snapshots.lock().unwrap().pop_front().unwrap_or_default())
        }

        fn names(&self) -> Result<DeviceNames> {
            Ok(self.names.clone())
        }
    }

    const BASE: &str = r"ACPI\PNP0C0A\1";
    const HUB_IF0: &str = r"USB\VID_17EF&PID_3082&MI_00\7&2B0F9A5B&0&0000";
    const HUB_IF1: &str = r"USB\VID_17EF&PID_3082&MI_01\7&2B0F9A5B&0&0001";
    const NIC: &str = r"USB\VID_0BDA&PID_8153\000001000000";
    const AUDIO: &str = r"USB\VID_17EF&PID_306F\1";

    #[test]
    fn added_devices_collapse_to_tokens_with_labels() {
        let docked: Snapshot = [BASE, HUB_IF0, HUB_IF1, NIC, r"ROOT\NOTOKEN\0"].into_iter().collect();
        let undocked: Snapshot = [BASE].into_iter().collect();
        let names: DeviceNames = [
            (canonical(HUB_IF1), "USB Hub".to_string()),
            (canonical(NIC), "Realtek USB GbE".to_string()),
        ]
        .into_iter()
        .collect();
        let mut labels = BTreeMap::new();

        let tokens = tokens_added(&docked, &undocked, &names, &mut labels);

        assert_eq!(
            tokens.into_iter().collect::<Vec<_>>(),
            vec!["VID_0BDA&PID_8153", "VID_17EF&PID_3082"]
        );
        assert_eq!(labels["VID_17EF&PID_3082"], "USB Hub");
        assert_eq!(labels["VID_0BDA&PID_8153"], "Realtek USB GbE");
    }

    #[test]
    fn two_ports_are_unioned_and_saved() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "poll_interval_ms = 500\ndock_devices = [\"OLD\"]\n").unwrap();

        let inventory = ScriptedInventory::new(
            vec![
                vec![BASE, HUB_IF0, NIC],
                vec![BASE],
                vec![BASE, AUDIO, NIC],
                vec![BASE],
            ],
            &[(NIC, "Realtek USB GbE")],
        );
        let mut input = "\n\n\n\n\n \n".as_bytes();
        let mut out = Vec::new();

        let code = run(&inventory, &mut input, &mut out, &config_path).unwrap();

        assert_eq!(code, 0);
        let config = load_or_default(&config_path).unwrap();
        assert_eq!(config.poll_interval_ms, 500);
        let tokens: Vec<_> = config.dock_devices.iter().map(|d| d.token.as_str()).collect();
        assert_eq!(tokens, vec!["VID_0BDA&PID_8153", "VID_17EF&PID_306F", "VID_17EF&PID_3082"]);
        assert_eq!(config.dock_devices[0].name.as_deref(), Some("Realtek USB GbE"));
        assert!(config.dock_devices[1].name.is_none());
        assert!(config.dock_devices[2].name.is_none());

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("--- Port 2 ---"));
        assert!(text.contains("union of 2 port(s)"));
    }

    #[test]
    fn nothing_detected_exits_1_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        let inventory = ScriptedInventory::new(vec![vec![BASE], vec![BASE]], &[]);
        let mut input = "\n\n \n".as_bytes();
        let mut out = Vec::new();

        assert_eq!(run(&inventory, &mut input, &mut out, &config_path).unwrap(), 1);
        assert!(!config_path.exists());
    }

    #[test]
    fn end_of_input_finishes_with_what_was_found() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        let inventory = ScriptedInventory::new(vec![vec![BASE, NIC], vec![BASE]], &[]);
        let mut input = "\n\n".as_bytes();
        let mut out = Vec::new();

        assert_eq!(run(&inventory, &mut input, &mut out, &config_path).unwrap(), 0);
        let config = load_or_default(&config_path).unwrap();
        assert_eq!(config.dock_devices, vec![DockDevice::new("VID_0BDA&PID_8153")]);
    }
}
