/// Restarting PnP devices by instance id.
///
/// A restart is first attempted as a property-change (the driver stack is
/// stopped and started in place). If the class installer refuses that, the device
/// is disabled, given a short pause and enabled again.
use tracing::{info, warn};

use crate::error::CapabilityError;

/// How a device restart was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartMethod {
    PropertyChange,
    DisableEnable,
}

/// OS device restart access.
pub trait DeviceRestarter: Send + Sync {
    fn restart(&self, instance_id: &str) -> Result<RestartMethod, CapabilityError>;
}

/// Restarts each id in turn; a failure is logged and the next id is still tried.
///
/// Returns the number of devices restarted.
pub fn restart_all(restarter: &dyn DeviceRestarter, instance_ids: &[String]) -> usize {
    let mut restarted = 0;
    for id in instance_ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
        match restarter.restart(id) {
            Ok(method) => {
                info!(device = id, ?method, "Device restarted");
                restarted += 1;
            }
            Err(e) => warn!(device = id, "Device restart failed: {e}"),
        }
    }
    restarted
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::time::Duration;

    use windows::core::PCWSTR;
    use windows::Win32::Devices::DeviceAndDriverInstallation::{
        SetupDiCallClassInstaller, SetupDiCreateDeviceInfoList, SetupDiDestroyDeviceInfoList,
        SetupDiOpenDeviceInfoW, SetupDiSetClassInstallParamsW, DICS_DISABLE, DICS_ENABLE,
        DICS_FLAG_GLOBAL, DICS_PROPCHANGE, DIF_PROPERTYCHANGE, HDEVINFO, SETUP_DI_STATE_CHANGE,
        SP_CLASSINSTALL_HEADER, SP_DEVINFO_DATA, SP_PROPCHANGE_PARAMS,
    };
    use windows::Win32::Foundation::HWND;

    use super::RestartMethod;
    use crate::error::CapabilityError;

    const DISABLE_PAUSE: Duration = Duration::from_millis(500);

    struct DevInfoSet(HDEVINFO);

    impl Drop for DevInfoSet {
        fn drop(&mut self) {
            unsafe {
                let _ = SetupDiDestroyDeviceInfoList(self.0);
            }
        }
    }

    fn change_state(
        set: &DevInfoSet,
        data: &SP_DEVINFO_DATA,
        state: SETUP_DI_STATE_CHANGE,
    ) -> Result<(), CapabilityError> {
        let params = SP_PROPCHANGE_PARAMS {
            ClassInstallHeader: SP_CLASSINSTALL_HEADER {
                cbSize: std::mem::size_of::<SP_CLASSINSTALL_HEADER>() as u32,
                InstallFunction: DIF_PROPERTYCHANGE,
            },
            StateChange: state,
            Scope: DICS_FLAG_GLOBAL,
            HwProfile: 0,
        };
        unsafe {
            SetupDiSetClassInstallParamsW(
                set.0,
                Some(data),
                Some(&params.ClassInstallHeader),
                std::mem::size_of::<SP_PROPCHANGE_PARAMS>() as u32,
            )
            .map_err(|e| CapabilityError::win32("SetupDiSetClassInstallParamsW", e))?;
            SetupDiCallClassInstaller(DIF_PROPERTYCHANGE, set.0, Some(data))
                .map_err(|e| CapabilityError::win32("SetupDiCallClassInstaller", e))
        }
    }

    pub fn restart(instance_id: &str) -> Result<RestartMethod, CapabilityError> {
        let wide: Vec<u16> = instance_id.encode_utf16().chain(std::iter::once(0)).collect();
        let set = unsafe { SetupDiCreateDeviceInfoList(None, HWND::default()) }
            .map(DevInfoSet)
            .map_err(|e| CapabilityError::win32("SetupDiCreateDeviceInfoList", e))?;

        let mut data = SP_DEVINFO_DATA {
            cbSize: std::mem::size_of::<SP_DEVINFO_DATA>() as u32,
            ..Default::default()
        };
        unsafe {
            SetupDiOpenDeviceInfoW(
                set.0,
                PCWSTR::from_raw(wide.as_ptr()),
                HWND::default(),
                0,
                Some(&mut data),
            )
        }
        .map_err(|_| CapabilityError::NotFound(format!("device {instance_id}")))?;

        if change_state(&set, &data, DICS_PROPCHANGE).is_ok() {
            return Ok(RestartMethod::PropertyChange);
        }

        change_state(&set, &data, DICS_DISABLE)?;
        std::thread::sleep(DISABLE_PAUSE);
        change_state(&set, &data, DICS_ENABLE)?;
        Ok(RestartMethod::DisableEnable)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct NativeDeviceRestarter;

impl DeviceRestarter for NativeDeviceRestarter {
    fn restart(&self, instance_id: &str) -> Result<RestartMethod, CapabilityError> {
        #[cfg(windows)]
        {
            imp::restart(instance_id)
        }
        #[cfg(not(windows))]
        {
            let _ = instance_id;
            Err(CapabilityError::Unsupported("Device restart"))
        }
    }
}
