/// One-shot CLI commands. Each returns the process exit code.
use std::io::Write;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::actions::bluetooth::{Bluetooth, MacAddress};
use crate::actions::device_restart::DeviceRestarter;
use crate::actions::{ActionPipeline, TransitionHandler};
use crate::classifier::is_docked;
use crate::config::Config;
use crate::inventory::DeviceInventory;
use crate::monitor::DockState;

/// `list-usb`: every present device id, sorted, then the total.
pub fn list_devices(inventory: &dyn DeviceInventory, out: &mut dyn Write) -> Result<i32> {
    let snapshot = inventory.snapshot()?;
    for id in snapshot.iter() {
        writeln!(out, "{id}")?;
    }
    writeln!(out, "Total: {}", snapshot.len())?;
    Ok(0)
}

/// `test`: 0 when docked, 1 when undocked.
pub fn test_docked(inventory: &dyn DeviceInventory, config: &Config, out: &mut dyn Write) -> Result<i32> {
    let snapshot = inventory.snapshot()?;
    let state = DockState::from_docked(is_docked(&config.dock_devices, &snapshot));
    writeln!(out, "{state}")?;
    Ok(match state {
        DockState::Docked => 0,
        DockState::Undocked => 1,
    })
}

/// `docked` / `undocked`: runs that state's actions once, exactly as a transition would.
pub async fn apply_state(
    pipeline: &ActionPipeline,
    state: DockState,
    config: &Config,
    out: &mut dyn Write,
) -> Result<i32> {
    writeln!(out, "Executing {} actions...", state.to_string().to_lowercase())?;
    pipeline
        .on_transition(state, config, &CancellationToken::new())
        .await;
    writeln!(out, "Done.")?;
    Ok(0)
}

/// `list-bt`: paired devices with their state; 1 when there are none.
pub fn list_bluetooth(bluetooth: &dyn Bluetooth, out: &mut dyn Write) -> Result<i32> {
    let devices = bluetooth.paired_devices()?;
    if devices.is_empty() {
        writeln!(out, "No paired Bluetooth devices found.")?;
        return Ok(1);
    }

    writeln!(out, "Paired Bluetooth devices:")?;
    for device in &devices {
        let status = if device.connected {
            "Connected"
        } else if device.remembered {
            "Paired"
        } else {
            "Unknown"
        };
        writeln!(out, "  {}  [{status:<9}]  {}", device.address, device.name)?;
    }
    writeln!(out, "Total: {}", devices.len())?;
    Ok(0)
}

/// `connect-bt <MAC>`.
pub fn connect_bluetooth(bluetooth: &dyn Bluetooth, mac: &str, out: &mut dyn Write) -> Result<i32> {
    let address = MacAddress::parse(mac)?;
    writeln!(out, "Connecting to {address}...")?;
    let services = bluetooth.connect(address)?;
    writeln!(out, "Done ({services} service(s) re-enabled).")?;
    Ok(0)
}

/// `restart-bt`: restarts `adapter`, the radio picked from the present Bluetooth devices.
pub fn restart_bluetooth(
    restarter: &dyn DeviceRestarter,
    adapter: Option<String>,
    out: &mut dyn Write,
) -> Result<i32> {
    let Some(adapter) = adapter else {
        writeln!(out, "No Bluetooth adapter found.")?;
        return Ok(1);
    };
    writeln!(out, "Restarting Bluetooth adapter: {adapter}")?;
    restarter.restart(&adapter)?;
    writeln!(out, "Done.")?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::bluetooth::tests::FakeBluetooth;
    use crate::actions::bluetooth::PairedDevice;
    use crate::actions::device_restart::tests::FakeRestarter;
    use crate::config::DockDevice;
    use crate::error::CapabilityError;
    use crate::inventory::{DeviceNames, Snapshot};

    struct FixedInventory(Vec<&'static str>);

    impl DeviceInventory for FixedInventory {
        fn snapshot(&self) -> Result<Snapshot> {
            Ok(self.0.iter().copied().collect())
        }

        fn names(&self) -> Result<DeviceNames> {
            Ok(DeviceNames::new())
        }
    }

    struct PairedList(Vec<PairedDevice>);

    impl Bluetooth for PairedList {
        fn paired_devices(&self) -> Result<Vec<PairedDevice>, CapabilityError> {
            Ok(self.0.clone())
        }

        fn connect(&self, _address: MacAddress) -> Result<usize, CapabilityError> {
            Ok(1)
        }
    }

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn list_devices_sorts_and_counts() {
        let inventory = FixedInventory(vec![r"USB\B", r"ACPI\A", r"HID\C"]);
        let mut out = Vec::new();
        assert_eq!(list_devices(&inventory, &mut out).unwrap(), 0);
        assert_eq!(output(out), "ACPI\\A\nHID\\C\nUSB\\B\nTotal: 3\n");
    }

    #[test]
    fn test_docked_exit_codes() {
        let inventory = FixedInventory(vec![r"USB\VID_17EF&PID_3082\1"]);
        let docked = Config {
            dock_devices: vec![DockDevice::new("VID_17EF&PID_3082")],
            ..Config::default()
        };

        let mut out = Vec::new();
        assert_eq!(test_docked(&inventory, &docked, &mut out).unwrap(), 0);
        assert_eq!(output(out), "Docked\n");

        let mut out = Vec::new();
        assert_eq!(test_docked(&inventory, &Config::default(), &mut out).unwrap(), 1);
        assert_eq!(output(out), "Undocked\n");
    }

    #[test]
    fn list_bluetooth_shows_state_labels() {
        let device = |mac: &str, name: &str, connected, remembered| PairedDevice {
            address: MacAddress::parse(mac).unwrap(),
            name: name.to_string(),
            connected,
            authenticated: true,
            remembered,
        };
        let bt = PairedList(vec![
            device("80:39:8C:6A:92:D3", "WH-1000XM4", true, true),
            device("00:11:22:33:44:55", "Keyboard", false, true),
        ]);

        let mut out = Vec::new();
        assert_eq!(list_bluetooth(&bt, &mut out).unwrap(), 0);
        let text = output(out);
        assert!(text.contains("  80:39:8C:6A:92:D3  [Connected]  WH-1000XM4"));
        assert!(text.contains("  00:11:22:33:44:55  [Paired   ]  Keyboard"));
        assert!(text.ends_with("Total: 2\n"));
    }

    #[test]
    fn list_bluetooth_without_devices_exits_1() {
        let mut out = Vec::new();
        assert_eq!(list_bluetooth(&PairedList(Vec::new()), &mut out).unwrap(), 1);
    }

    #[test]
    fn connect_bluetooth_rejects_bad_mac() {
        let mut out = Vec::new();
        let err = connect_bluetooth(&FakeBluetooth::default(), "80:39", &mut out).unwrap_err();
        assert!(err.to_string().contains("invalid Bluetooth MAC address"));
    }

    #[test]
    fn restart_bluetooth_without_adapter_exits_1() {
        let restarter = FakeRestarter::default();
        let mut out = Vec::new();
        assert_eq!(restart_bluetooth(&restarter, None, &mut out).unwrap(), 1);
        assert!(restarter.restarted.lock().unwrap().is_empty());

        let mut out = Vec::new();
        let adapter = Some(r"USB\VID_8087&PID_0026\5&1".to_string());
        assert_eq!(restart_bluetooth(&restarter, adapter, &mut out).unwrap(), 0);
        assert_eq!(restarter.restarted.lock().unwrap().len(), 1);
    }
}
