/// Default audio endpoint switching.
///
/// Each configured slot (render/capture × console/multimedia/communications) names an
/// endpoint by friendly name. Resolution prefers an exact case-insensitive match and
/// falls back to a substring match in either direction; a slot without a match is
/// skipped with a warning while the remaining slots still apply.
///
/// On Windows endpoints are listed with `IMMDeviceEnumerator` and defaults are set via
/// the undocumented `IPolicyConfig` interface that the Sound control panel uses.
use std::fmt;

use tracing::{info, warn};

use crate::config::AudioConfig;
use crate::error::CapabilityError;

/// Data-flow direction of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Render,
    Capture,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Render => "render",
            Direction::Capture => "capture",
        })
    }
}

/// Which default an endpoint is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Console,
    Multimedia,
    Communications,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Console => "default",
            Role::Multimedia => "multimedia",
            Role::Communications => "communications",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEndpoint {
    /// Opaque endpoint id passed back to [`AudioEndpoints::set_default`].
    pub id: String,
    pub name: String,
    pub direction: Direction,
    /// False for endpoints that are known but currently unplugged.
    pub active: bool,
}

/// OS audio endpoint access.
pub trait AudioEndpoints: Send + Sync {
    /// Lists endpoints of `direction`; unplugged ones only when asked for.
    fn list(
        &self,
        direction: Direction,
        include_unplugged: bool,
    ) -> Result<Vec<AudioEndpoint>, CapabilityError>;

    fn set_default(&self, endpoint_id: &str, role: Role) -> Result<(), CapabilityError>;
}

/// Finds the endpoint of `direction` that `pattern` refers to.
///
/// Exact (case-insensitive) name matches win over substring matches; among several
/// candidates of the same kind any one may be returned.
pub fn find_endpoint<'a>(
    endpoints: &'a [AudioEndpoint],
    direction: Direction,
    pattern: &str,
) -> Option<&'a AudioEndpoint> {
    let pattern = pattern.trim().to_lowercase();
    if pattern.is_empty() {
        return None;
    }
    let candidates = || endpoints.iter().filter(move |e| e.direction == direction);

    candidates()
        .find(|e| e.name.to_lowercase() == pattern)
        .or_else(|| {
            candidates().find(|e| {
                let name = e.name.to_lowercase();
                !name.is_empty() && (name.contains(&pattern) || pattern.contains(&name))
            })
        })
}

/// Applies every configured slot of `audio`.
///
/// Missing endpoints are warnings; failures to set a default are collected and
/// reported together after all slots were attempted.
pub fn apply_audio_config(
    system: &dyn AudioEndpoints,
    audio: &AudioConfig,
) -> Result<(), CapabilityError> {
    let slots = audio.slots();
    if slots.is_empty() {
        return Ok(());
    }

    let mut endpoints = system.list(Direction::Render, false)?;
    endpoints.extend(system.list(Direction::Capture, false)?);

    let mut failures = Vec::new();
    for slot in slots {
        let Some(endpoint) = find_endpoint(&endpoints, slot.direction, slot.pattern) else {
            warn!(
                pattern = slot.pattern,
                direction = %slot.direction,
                role = %slot.role,
                "Audio device not found"
            );
            continue;
        };

        info!(
            direction = %slot.direction,
            role = %slot.role,
            device = %endpoint.name,
            id = %endpoint.id,
            "Setting default audio device"
        );
        if let Err(e) = system.set_default(&endpoint.id, slot.role) {
            warn!(device = %endpoint.name, role = %slot.role, "Failed to set default audio device: {e}");
            failures.push(format!("{} {} -> {}: {e}", slot.direction, slot.role, endpoint.name));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(CapabilityError::Partial(failures))
    }
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::ffi::c_void;

    use windows::core::{interface, IUnknown, IUnknown_Vtbl, GUID, HRESULT, PCWSTR};
    use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
    use windows::Win32::Foundation::REGDB_E_CLASSNOTREG;
    use windows::Win32::Media::Audio::{
        eCapture, eCommunications, eConsole, eMultimedia, eRender, EDataFlow, ERole,
        IMMDeviceEnumerator, MMDeviceEnumerator, DEVICE_STATE, DEVICE_STATE_ACTIVE,
        DEVICE_STATE_UNPLUGGED,
    };
    use windows::Win32::System::Com::{
        CoCreateInstance, CoInitializeEx, CoTaskMemFree, CLSCTX_ALL, COINIT_MULTITHREADED,
        STGM_READ,
    };

    use super::{AudioEndpoint, Direction, Role};
    use crate::error::CapabilityError;

    const CLSID_POLICY_CONFIG_CLIENT: GUID = GUID::from_u128(0x870af99c_171d_4f9e_af0d_e63df40c2bc9);

    /// Only `SetDefaultEndpoint` is used, but every preceding vtable slot must be declared.
    #[interface("f8679f50-850a-41cf-9c72-430f290290c8")]
    unsafe trait IPolicyConfig: IUnknown {
        fn GetMixFormat(&self, device: PCWSTR, format: *mut *mut c_void) -> HRESULT;
        fn GetDeviceFormat(&self, device: PCWSTR, default: i32, format: *mut *mut c_void) -> HRESULT;
        fn ResetDeviceFormat(&self, device: PCWSTR) -> HRESULT;
        fn SetDeviceFormat(&self, device: PCWSTR, endpoint: *mut c_void, mix: *mut c_void) -> HRESULT;
        fn GetProcessingPeriod(&self, device: PCWSTR, default: i32, period: *mut i64, min: *mut i64) -> HRESULT;
        fn SetProcessingPeriod(&self, device: PCWSTR, period: *mut i64) -> HRESULT;
        fn GetShareMode(&self, device: PCWSTR, mode: *mut c_void) -> HRESULT;
        fn SetShareMode(&self, device: PCWSTR, mode: *mut c_void) -> HRESULT;
        fn GetPropertyValue(&self, device: PCWSTR, fx: i32, key: *const c_void, value: *mut c_void) -> HRESULT;
        fn SetPropertyValue(&self, device: PCWSTR, fx: i32, key: *const c_void, value: *mut c_void) -> HRESULT;
        fn SetDefaultEndpoint(&self, device: PCWSTR, role: ERole) -> HRESULT;
        fn SetEndpointVisibility(&self, device: PCWSTR, visible: i32) -> HRESULT;
    }

    fn init_com() {
        unsafe {
            let _ = CoInitializeEx(None, COINIT_MULTITHREADED);
        }
    }

    fn data_flow(direction: Direction) -> EDataFlow {
        match direction {
            Direction::Render => eRender,
            Direction::Capture => eCapture,
        }
    }

    fn role(role: Role) -> ERole {
        match role {
            Role::Console => eConsole,
            Role::Multimedia => eMultimedia,
            Role::Communications => eCommunications,
        }
    }

    pub fn list(
        direction: Direction,
        include_unplugged: bool,
    ) -> Result<Vec<AudioEndpoint>, CapabilityError> {
        init_com();
        let mask = if include_unplugged {
            DEVICE_STATE(DEVICE_STATE_ACTIVE.0 | DEVICE_STATE_UNPLUGGED.0)
        } else {
            DEVICE_STATE_ACTIVE
        };

        unsafe {
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                    .map_err(|e| CapabilityError::win32("CoCreateInstance(MMDeviceEnumerator)", e))?;
            let collection = enumerator
                .EnumAudioEndpoints(data_flow(direction), mask)
                .map_err(|e| CapabilityError::win32("EnumAudioEndpoints", e))?;
            let count = collection
                .GetCount()
                .map_err(|e| CapabilityError::win32("IMMDeviceCollection::GetCount", e))?;

            let mut endpoints = Vec::with_capacity(count as usize);
            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let Ok(raw_id) = device.GetId() else {
                    continue;
                };
                let id = raw_id.to_string().unwrap_or_default();
                CoTaskMemFree(Some(raw_id.0 as *const c_void));

                let active = device
                    .GetState()
                    .map(|s| s == DEVICE_STATE_ACTIVE)
                    .unwrap_or(false);
                let name = device
                    .OpenPropertyStore(STGM_READ)
                    .and_then(|store| store.GetValue(&PKEY_Device_FriendlyName))
                    .map(|value| value.to_string())
                    .unwrap_or_else(|_| "(unknown)".to_string());

                endpoints.push(AudioEndpoint {
                    id,
                    name,
                    direction,
                    active,
                });
            }
            Ok(endpoints)
        }
    }

    pub fn set_default(endpoint_id: &str, r: Role) -> Result<(), CapabilityError> {
        init_com();
        let wide: Vec<u16> = endpoint_id.encode_utf16().chain(std::iter::once(0)).collect();
        unsafe {
            let policy: IPolicyConfig = CoCreateInstance(&CLSID_POLICY_CONFIG_CLIENT, None, CLSCTX_ALL)
                .map_err(|e| {
                    if e.code() == REGDB_E_CLASSNOTREG {
                        CapabilityError::Unavailable(
                            "audio policy COM class CPolicyConfigClient is not registered".to_string(),
                        )
                    } else {
                        CapabilityError::win32("CoCreateInstance(CPolicyConfigClient)", e)
                    }
                })?;
            policy
                .SetDefaultEndpoint(PCWSTR::from_raw(wide.as_ptr()), role(r))
                .ok()
                .map_err(|e| CapabilityError::win32("IPolicyConfig::SetDefaultEndpoint", e))
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// The machine's audio endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeAudio;

impl AudioEndpoints for NativeAudio {
    fn list(
        &self,
        direction: Direction,
        include_unplugged: bool,
    ) -> Result<Vec<AudioEndpoint>, CapabilityError> {
        #[cfg(windows)]
        {
            imp::list(direction, include_unplugged)
        }
        #[cfg(not(windows))]
        {
            let _ = (direction, include_unplugged);
            Err(CapabilityError::Unsupported("Audio endpoint enumeration"))
        }
    }

    fn set_default(&self, endpoint_id: &str, role: Role) -> Result<(), CapabilityError> {
        #[cfg(windows)]
        {
            imp::set_default(endpoint_id, role)
        }
        #[cfg(not(windows))]
        {
            let _ = (endpoint_id, role);
            Err(CapabilityError::Unsupported("Default audio endpoint switching"))
        }
    }
}
