/// Bluetooth reconnects for paired peers.
///
/// "Connecting" a paired device means cycling its installed services: every
/// service is disabled and then re-enabled, which makes the Bluetooth stack
/// reattach the audio/handsfree profiles. Peers with no reported services get the
/// A2DP sink and Hands-Free profiles.
use std::fmt;

use tracing::{info, warn};

use crate::error::CapabilityError;

/// A 48-bit Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub u64);

impl MacAddress {
    /// Accepts `AA:BB:CC:DD:EE:FF`, `AA-BB-...` or `AABBCCDDEEFF` (any case).
    pub fn parse(input: &str) -> Result<Self, CapabilityError> {
        let digits: String = input
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();
        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CapabilityError::InvalidAddress(input.to_string()));
        }
        u64::from_str_radix(&digits, 16)
            .map(MacAddress)
            .map_err(|_| CapabilityError::InvalidAddress(input.to_string()))
    }

    /// Bytes in little-endian order, as the OS stores them.
    pub fn bytes(&self) -> [u8; 6] {
        let le = self.0.to_le_bytes();
        [le[0], le[1], le[2], le[3], le[4], le[5]]
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.bytes();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

/// A device from the paired-device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedDevice {
    pub address: MacAddress,
    pub name: String,
    pub connected: bool,
    pub authenticated: bool,
    pub remembered: bool,
}

/// OS Bluetooth access.
pub trait Bluetooth: Send + Sync {
    fn paired_devices(&self) -> Result<Vec<PairedDevice>, CapabilityError>;

    /// Cycles the services of a paired peer. Returns how many services were re-enabled.
    fn connect(&self, address: MacAddress) -> Result<usize, CapabilityError>;
}

/// Connects every address in `addresses`, continuing past failures.
///
/// Returns true if at least one connect succeeded.
pub fn connect_all(bluetooth: &dyn Bluetooth, addresses: &[String]) -> bool {
    let mut any_connected = false;
    for raw in addresses.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
        let address = match MacAddress::parse(raw) {
            Ok(a) => a,
            Err(e) => {
                warn!("Skipping Bluetooth entry: {e}");
                continue;
            }
        };
        match bluetooth.connect(address) {
            Ok(services) => {
                info!(%address, services, "Bluetooth device connected");
                any_connected = true;
            }
            Err(e) => warn!(%address, "Bluetooth connect failed: {e}"),
        }
    }
    any_connected
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use windows::core::GUID;
    use windows::Win32::Devices::Bluetooth::{
        BluetoothEnumerateInstalledServices, BluetoothFindDeviceClose, BluetoothFindFirstDevice,
        BluetoothFindNextDevice, BluetoothSetServiceState, BLUETOOTH_ADDRESS,
        BLUETOOTH_DEVICE_INFO, BLUETOOTH_DEVICE_SEARCH_PARAMS, BLUETOOTH_SERVICE_DISABLE,
        BLUETOOTH_SERVICE_ENABLE,
    };
    use windows::Win32::Foundation::{BOOL, ERROR_SUCCESS, HANDLE};

    use super::{MacAddress, PairedDevice};
    use crate::error::CapabilityError;

    const AUDIO_SINK_SERVICE: GUID = GUID::from_u128(0x0000110b_0000_1000_8000_00805f9b34fb);
    const HANDSFREE_SERVICE: GUID = GUID::from_u128(0x0000111e_0000_1000_8000_00805f9b34fb);

    fn empty_info() -> BLUETOOTH_DEVICE_INFO {
        BLUETOOTH_DEVICE_INFO {
            dwSize: std::mem::size_of::<BLUETOOTH_DEVICE_INFO>() as u32,
            ..Default::default()
        }
    }

    fn device_name(info: &BLUETOOTH_DEVICE_INFO) -> String {
        let end = info.szName.iter().position(|&c| c == 0).unwrap_or(info.szName.len());
        String::from_utf16_lossy(&info.szName[..end])
    }

    /// Every paired (authenticated or remembered) device, as raw device info.
    fn enumerate() -> Result<Vec<BLUETOOTH_DEVICE_INFO>, CapabilityError> {
        let params = BLUETOOTH_DEVICE_SEARCH_PARAMS {
            dwSize: std::mem::size_of::<BLUETOOTH_DEVICE_SEARCH_PARAMS>() as u32,
            fReturnAuthenticated: BOOL::from(true),
            fReturnRemembered: BOOL::from(true),
            fReturnUnknown: BOOL::from(false),
            fReturnConnected: BOOL::from(true),
            fIssueInquiry: BOOL::from(false),
            cTimeoutMultiplier: 0,
            hRadio: HANDLE::default(),
        };

        let mut devices = Vec::new();
        let mut info = empty_info();
        let find = match unsafe { BluetoothFindFirstDevice(&params, &mut info) } {
            Ok(find) => find,
            // No radio or no paired devices.
            Err(_) => return Ok(devices),
        };
        loop {
            devices.push(info);
            info = empty_info();
            if unsafe { BluetoothFindNextDevice(find, &mut info) }.is_err() {
                break;
            }
        }
        unsafe {
            let _ = BluetoothFindDeviceClose(find);
        }
        Ok(devices)
    }

    pub fn paired_devices() -> Result<Vec<PairedDevice>, CapabilityError> {
        Ok(enumerate()?
            .iter()
            .map(|info| PairedDevice {
                address: MacAddress(unsafe { info.Address.Anonymous.ullLong }),
                name: device_name(info),
                connected: info.fConnected.as_bool(),
                authenticated: info.fAuthenticated.as_bool(),
                remembered: info.fRemembered.as_bool(),
            })
            .collect())
    }

    fn installed_services(info: &BLUETOOTH_DEVICE_INFO) -> Vec<GUID> {
        let mut count = 0u32;
        // The sizing call reports ERROR_MORE_DATA; only the count matters.
        unsafe {
            BluetoothEnumerateInstalledServices(HANDLE::default(), info, &mut count, None);
        }
        if count == 0 {
            return Vec::new();
        }
        let mut services = vec![GUID::zeroed(); count as usize];
        let rc = unsafe {
            BluetoothEnumerateInstalledServices(
                HANDLE::default(),
                info,
                &mut count,
                Some(services.as_mut_ptr()),
            )
        };
        if rc != ERROR_SUCCESS.0 {
            return Vec::new();
        }
        services.truncate(count as usize);
        services
    }

    pub fn connect(address: MacAddress) -> Result<usize, CapabilityError> {
        let mut info = enumerate()?
            .into_iter()
            .find(|info| unsafe { info.Address.Anonymous.ullLong } == address.0)
            .ok_or_else(|| CapabilityError::NotFound(format!("paired Bluetooth device {address}")))?;
        info.Address = BLUETOOTH_ADDRESS {
            Anonymous: windows::Win32::Devices::Bluetooth::BLUETOOTH_ADDRESS_0 { ullLong: address.0 },
        };

        let mut services = installed_services(&info);
        if services.is_empty() {
            services = vec![AUDIO_SINK_SERVICE, HANDSFREE_SERVICE];
        }

        for service in &services {
            unsafe {
                BluetoothSetServiceState(HANDLE::default(), &info, service, BLUETOOTH_SERVICE_DISABLE);
            }
        }

        let mut enabled = 0;
        let mut last_error = ERROR_SUCCESS.0;
        for service in &services {
            let rc = unsafe {
                BluetoothSetServiceState(HANDLE::default(), &info, service, BLUETOOTH_SERVICE_ENABLE)
            };
            if rc == ERROR_SUCCESS.0 {
                enabled += 1;
            } else {
                last_error = rc;
            }
        }

        if enabled == 0 {
            return Err(CapabilityError::Win32 {
                call: "BluetoothSetServiceState",
                code: last_error,
            });
        }
        Ok(enabled)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// The machine's Bluetooth stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBluetooth;

impl Bluetooth for NativeBluetooth {
    fn paired_devices(&self) -> Result<Vec<PairedDevice>, CapabilityError> {
        #[cfg(windows)]
        {
            imp::paired_devices()
        }
        #[cfg(not(windows))]
        {
            Err(CapabilityError::Unsupported("Bluetooth"))
        }
    }

    fn connect(&self, address: MacAddress) -> Result<usize, CapabilityError> {
        #[cfg(windows)]
        {
            imp::connect(address)
        }
        #[cfg(not(windows))]
        {
            let _ = address;
            Err(CapabilityError::Unsupported("Bluetooth"))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Fake stack: addresses in `reachable` connect, everything else fails.
    #[derive(Default)]
    pub(crate) struct FakeBluetooth {
        pub reachable: Vec<MacAddress>,
        pub attempts: Mutex<Vec<MacAddress>>,
    }

    impl Bluetooth for FakeBluetooth {
        fn paired_devices(&self) -> Result<Vec<PairedDevice>, CapabilityError> {
            Ok(Vec::new())
        }

        fn connect(&self, address: MacAddress) -> Result<usize, CapabilityError> {
            self.attempts.lock().unwrap().push(address);
            if self.reachable.contains(&address) {
                Ok(2)
            } else {
                Err(CapabilityError::NotFound(address.to_string()))
            }
        }
    }

    #[test]
    fn parses_colon_dash_and_bare_forms() {
        let expected = MacAddress(0x0011_22AA_BBCC);
        assert_eq!(MacAddress::parse("00:11:22:AA:BB:CC").unwrap(), expected);
        assert_eq!(MacAddress::parse("00-11-22-aa-bb-cc").unwrap(), expected);
        assert_eq!(MacAddress::parse(" 001122aabbcc ").unwrap(), expected);
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in ["", "00:11:22:33:44", "00:11:22:33:44:55:66", "GG:11:22:33:44:55", "0x1122334455"] {
            assert!(
                matches!(MacAddress::parse(bad), Err(CapabilityError::InvalidAddress(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn displays_most_significant_byte_first() {
        let mac = MacAddress::parse("a4c1:38-11:22:33").unwrap();
        assert_eq!(mac.to_string(), "A4:C1:38:11:22:33");
        assert_eq!(mac.bytes(), [0x33, 0x22, 0x11, 0x38, 0xC1, 0xA4]);
    }

    #[test]
    fn connect_all_continues_past_failures() {
        let good = MacAddress::parse("00:11:22:33:44:55").unwrap();
        let bt = FakeBluetooth {
            reachable: vec![good],
            ..FakeBluetooth::default()
        };
        let addresses = vec![
            "not-a-mac".to_string(),
            "AA:AA:AA:AA:AA:AA".to_string(),
            "00:11:22:33:44:55".to_string(),
        ];

        assert!(connect_all(&bt, &addresses));
        assert_eq!(bt.attempts.lock().unwrap().len(), 2);
    }

    #[test]
    fn connect_all_reports_total_failure() {
        let bt = FakeBluetooth::default();
        assert!(!connect_all(&bt, &["AA:AA:AA:AA:AA:AA".to_string()]));
        assert!(!connect_all(&bt, &[]));
    }

    #[cfg(not(windows))]
    #[test]
    fn native_bluetooth_errors_off_windows() {
        assert!(matches!(
            NativeBluetooth.paired_devices(),
            Err(CapabilityError::Unsupported(_))
        ));
    }
}
