/// Plug-and-Play device inventory.
///
/// A [`Snapshot`] is the set of device instance ids present at one instant.
/// Ids are compared case-insensitively; the original spelling is kept for display.
///
/// On Windows the ids come from CfgMgr32 (`CM_Get_Device_ID_ListW` with the
/// "present" filter) and friendly names from SetupAPI. On other platforms the
/// native inventory compiles but every call returns an error.
use std::collections::{BTreeMap, HashMap};

use anyhow::Result;

#[cfg(not(windows))]
use crate::error::CapabilityError;

/// Case-insensitive key used for membership and name lookups.
pub fn canonical(id: &str) -> String {
    id.to_uppercase()
}

/// Device instance ids captured atomically at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// canonical id → id as reported by the OS
    ids: BTreeMap<String, String>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id`; blank ids are ignored and duplicates (in any case) collapse.
    pub fn insert(&mut self, id: &str) {
        let id = id.trim();
        if id.is_empty() {
            return;
        }
        self.ids.entry(canonical(id)).or_insert_with(|| id.to_string());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(&canonical(id))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids as reported by the OS, sorted case-insensitively.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.values().map(String::as_str)
    }

    /// Upper-cased ids, for case-insensitive substring tests.
    pub fn canonical_ids(&self) -> impl Iterator<Item = &str> {
        self.ids.keys().map(String::as_str)
    }

    /// Case-insensitive set equality (spelling differences are not a change).
    pub fn set_eq(&self, other: &Snapshot) -> bool {
        self.ids.len() == other.ids.len() && self.ids.keys().eq(other.ids.keys())
    }

    /// Ids present here but not in `other`.
    pub fn difference<'a>(&'a self, other: &'a Snapshot) -> impl Iterator<Item = &'a str> + 'a {
        self.ids
            .iter()
            .filter(|(key, _)| !other.ids.contains_key(*key))
            .map(|(_, id)| id.as_str())
    }
}

impl<'a> FromIterator<&'a str> for Snapshot {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        let mut snapshot = Snapshot::new();
        for id in iter {
            snapshot.insert(id);
        }
        snapshot
    }
}

/// Human-readable names keyed by [`canonical`] device id.
pub type DeviceNames = HashMap<String, String>;

/// Source of device snapshots. Implemented natively and by test fakes.
pub trait DeviceInventory: Send + Sync {
    /// Returns the devices present right now. Zero devices is a valid (empty) result.
    fn snapshot(&self) -> Result<Snapshot>;

    /// Returns friendly names for present devices, where the OS has one.
    fn names(&self) -> Result<DeviceNames>;
}

/// Splits a REG_MULTI_SZ style buffer (NUL-separated, double-NUL terminated) into strings.
pub fn split_multi_sz(buffer: &[u16]) -> Vec<String> {
    buffer
        .split(|&c| c == 0)
        .take_while(|s| !s.is_empty())
        .map(String::from_utf16_lossy)
        .collect()
}

/// Prefixes of Bluetooth child devices that are never the radio itself.
const BLUETOOTH_CHILD_PREFIXES: [&str; 4] = ["BTHENUM\\", "BTH\\", "BTHLE\\", "BTHLEDEVICE\\"];

/// A present device of the Bluetooth setup class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothCandidate {
    pub instance_id: String,
    pub service: Option<String>,
}

fn adapter_score(candidate: &BluetoothCandidate) -> Option<u32> {
    let id = canonical(&candidate.instance_id);
    if BLUETOOTH_CHILD_PREFIXES.iter().any(|p| id.starts_with(p)) {
        return None;
    }
    let mut score = 0;
    if id.starts_with("USB\\") {
        score += 10;
    }
    score += match candidate.service.as_deref().map(str::to_uppercase).as_deref() {
        Some("BTHUSB") => 20,
        Some("BTHMINI") => 15,
        Some("BTHPORT") => 5,
        _ => 0,
    };
    Some(score)
}

/// Chooses the device most likely to be the Bluetooth radio.
///
/// Enumerated children are skipped; USB-attached radios and the well-known radio
/// drivers score higher. Ties keep the earliest candidate.
pub fn pick_bluetooth_adapter(candidates: &[BluetoothCandidate]) -> Option<&str> {
    let mut best: Option<(&BluetoothCandidate, u32)> = None;
    for candidate in candidates {
        let Some(score) = adapter_score(candidate) else {
            continue;
        };
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }
    best.map(|(c, _)| c.instance_id.as_str())
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use anyhow::{bail, Result};
    use windows::core::{GUID, PCWSTR};
    use windows::Win32::Devices::DeviceAndDriverInstallation::{
        CM_Get_Device_ID_ListW, CM_Get_Device_ID_List_SizeW, SetupDiDestroyDeviceInfoList,
        SetupDiEnumDeviceInfo, SetupDiGetClassDevsW, SetupDiGetDeviceInstanceIdW,
        SetupDiGetDeviceRegistryPropertyW, CM_GETIDLIST_FILTER_PRESENT, CR_BUFFER_SMALL,
        CR_SUCCESS, DIGCF_ALLCLASSES, DIGCF_PRESENT, GUID_DEVCLASS_BLUETOOTH, HDEVINFO,
        SETUP_DI_REGISTRY_PROPERTY, SPDRP_DEVICEDESC, SPDRP_FRIENDLYNAME, SPDRP_SERVICE,
        SP_DEVINFO_DATA,
    };
    use windows::Win32::Foundation::HWND;

    use super::{canonical, split_multi_sz, BluetoothCandidate, DeviceNames, Snapshot};

    pub fn snapshot() -> Result<Snapshot> {
        // The list can grow between the size query and the fetch; retry a few times.
        for _ in 0..4 {
            let mut len: u32 = 0;
            let cr = unsafe {
                CM_Get_Device_ID_List_SizeW(&mut len, PCWSTR::null(), CM_GETIDLIST_FILTER_PRESENT)
            };
            if cr != CR_SUCCESS {
                bail!("CM_Get_Device_ID_List_SizeW failed (CONFIGRET {})", cr.0);
            }

            let mut buffer = vec![0u16; len as usize];
            let cr = unsafe {
                CM_Get_Device_ID_ListW(PCWSTR::null(), &mut buffer, CM_GETIDLIST_FILTER_PRESENT)
            };
            if cr == CR_BUFFER_SMALL {
                continue;
            }
            if cr != CR_SUCCESS {
                bail!("CM_Get_Device_ID_ListW failed (CONFIGRET {})", cr.0);
            }

            let mut snapshot = Snapshot::new();
            for id in split_multi_sz(&buffer) {
                snapshot.insert(&id);
            }
            return Ok(snapshot);
        }
        bail!("Device list kept changing while it was being read")
    }

    /// RAII guard that always destroys the device information set.
    struct DevInfoSet(HDEVINFO);

    impl Drop for DevInfoSet {
        fn drop(&mut self) {
            unsafe {
                let _ = SetupDiDestroyDeviceInfoList(self.0);
            }
        }
    }

    fn open_set(class: Option<&GUID>, all_classes: bool) -> Result<DevInfoSet> {
        let flags = if all_classes {
            DIGCF_ALLCLASSES | DIGCF_PRESENT
        } else {
            DIGCF_PRESENT
        };
        let set = unsafe {
            SetupDiGetClassDevsW(class.map(|g| g as *const GUID), PCWSTR::null(), HWND::default(), flags)
        }?;
        Ok(DevInfoSet(set))
    }

    /// Calls `f` with the instance id and info data of every member of `set`.
    fn for_each_device(set: &DevInfoSet, mut f: impl FnMut(String, &SP_DEVINFO_DATA)) {
        let mut index = 0;
        loop {
            let mut data = SP_DEVINFO_DATA {
                cbSize: std::mem::size_of::<SP_DEVINFO_DATA>() as u32,
                ..Default::default()
            };
            if unsafe { SetupDiEnumDeviceInfo(set.0, index, &mut data) }.is_err() {
                break;
            }
            index += 1;

            let mut id_buf = [0u16; 512];
            let mut required = 0u32;
            if unsafe {
                SetupDiGetDeviceInstanceIdW(set.0, &data, Some(&mut id_buf), Some(&mut required))
            }
            .is_err()
            {
                continue;
            }
            let end = id_buf.iter().position(|&c| c == 0).unwrap_or(id_buf.len());
            f(String::from_utf16_lossy(&id_buf[..end]), &data);
        }
    }

    fn string_property(
        set: &DevInfoSet,
        data: &SP_DEVINFO_DATA,
        property: SETUP_DI_REGISTRY_PROPERTY,
    ) -> Option<String> {
        let mut buf = [0u8; 1024];
        let mut required = 0u32;
        unsafe {
            SetupDiGetDeviceRegistryPropertyW(
                set.0,
                data,
                property,
                None,
                Some(&mut buf),
                Some(&mut required),
            )
        }
        .ok()?;
        let wide: Vec<u16> = buf
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .take_while(|&c| c != 0)
            .collect();
        let value = String::from_utf16_lossy(&wide);
        (!value.trim().is_empty()).then_some(value)
    }

    pub fn names() -> Result<DeviceNames> {
        let set = open_set(None, true)?;
        let mut names = DeviceNames::new();
        for_each_device(&set, |id, data| {
            let name = string_property(&set, data, SPDRP_FRIENDLYNAME)
                .or_else(|| string_property(&set, data, SPDRP_DEVICEDESC));
            if let Some(name) = name {
                names.insert(canonical(&id), name);
            }
        });
        Ok(names)
    }

    pub fn bluetooth_candidates() -> Result<Vec<BluetoothCandidate>> {
        let set = open_set(Some(&GUID_DEVCLASS_BLUETOOTH), false)?;
        let mut candidates = Vec::new();
        for_each_device(&set, |instance_id, data| {
            let service = string_property(&set, data, SPDRP_SERVICE);
            candidates.push(BluetoothCandidate { instance_id, service });
        });
        Ok(candidates)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// The live Plug-and-Play inventory of this machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeInventory;

impl DeviceInventory for NativeInventory {
    fn snapshot(&self) -> Result<Snapshot> {
        #[cfg(windows)]
        {
            imp::snapshot()
        }
        #[cfg(not(windows))]
        {
            Err(CapabilityError::Unsupported("Device enumeration").into())
        }
    }

    fn names(&self) -> Result<DeviceNames> {
        #[cfg(windows)]
        {
            imp::names()
        }
        #[cfg(not(windows))]
        {
            Err(CapabilityError::Unsupported("Device enumeration").into())
        }
    }
}

/// Returns the instance id of the Bluetooth radio, if one is present.
pub fn bluetooth_adapter_instance_id() -> Result<Option<String>> {
    #[cfg(windows)]
    {
        let candidates = imp::bluetooth_candidates()?;
        Ok(pick_bluetooth_adapter(&candidates).map(str::to_string))
    }
    #[cfg(not(windows))]
    {
        Err(CapabilityError::Unsupported("Bluetooth adapter lookup").into())
    }
}
