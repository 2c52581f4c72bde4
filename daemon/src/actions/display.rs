/// Primary display resolution bounce.
///
/// Some docks only wake external monitors after a mode change. The reset switches the
/// primary display to a temporary resolution, waits, and restores the mode that was
/// active before. The temporary mode is applied as a "fullscreen" (non-persisted)
/// change so a crash mid-reset leaves the registry untouched.
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::delay::sleep_or_cancel;
use crate::error::CapabilityError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    pub frequency: u32,
}

impl DisplayMode {
    pub fn with_resolution(self, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..self
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)?;
        if self.frequency > 0 {
            write!(f, "@{}Hz", self.frequency)?;
        }
        Ok(())
    }
}

/// Primary display mode access.
pub trait DisplayModes: Send + Sync {
    fn current(&self) -> Result<DisplayMode, CapabilityError>;

    /// Applies `mode`. `persist` is false for temporary changes.
    fn set(&self, mode: DisplayMode, persist: bool) -> Result<(), CapabilityError>;
}

#[derive(Debug, Error)]
pub enum ResetError {
    #[error("could not read the current display mode: {0}")]
    Query(#[source] CapabilityError),
    #[error("could not apply temporary mode {mode}: {source}")]
    Apply {
        mode: DisplayMode,
        #[source]
        source: CapabilityError,
    },
    /// The display may be left in the temporary mode.
    #[error("could not restore original mode {mode}: {source}")]
    Restore {
        mode: DisplayMode,
        #[source]
        source: CapabilityError,
    },
}

/// Switches to `width`x`height`, waits `restore_delay`, then restores the original mode.
///
/// Cancellation during the wait restores immediately.
pub async fn reset_resolution(
    display: &dyn DisplayModes,
    width: u32,
    height: u32,
    restore_delay: Duration,
    cancel: &CancellationToken,
) -> Result<(), ResetError> {
    let original = display.current().map_err(ResetError::Query)?;
    let temporary = original.with_resolution(width, height);

    info!(%original, %temporary, "Resetting display resolution");
    display
        .set(temporary, false)
        .map_err(|source| ResetError::Apply {
            mode: temporary,
            source,
        })?;

    if !sleep_or_cancel(restore_delay, cancel).await {
        warn!("Shutdown during display reset; restoring original mode now");
    }

    display
        .set(original, true)
        .map_err(|source| ResetError::Restore {
            mode: original,
            source,
        })?;
    info!(%original, "Display resolution restored");
    Ok(())
}

/// `EnumDisplaySettingsW` signals failure without setting a last-error code.
#[cfg_attr(not(windows), allow(dead_code))]
fn no_current_mode() -> CapabilityError {
    CapabilityError::Unavailable("current mode of the primary display (EnumDisplaySettingsW)".to_string())
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use windows::core::PCWSTR;
    use windows::Win32::Graphics::Gdi::{
        ChangeDisplaySettingsW, EnumDisplaySettingsW, CDS_FULLSCREEN, CDS_TYPE, DEVMODEW,
        DISP_CHANGE_SUCCESSFUL, DM_BITSPERPEL, DM_DISPLAYFREQUENCY, DM_PELSHEIGHT, DM_PELSWIDTH,
        ENUM_CURRENT_SETTINGS,
    };

    use super::DisplayMode;
    use crate::error::CapabilityError;

    fn empty_devmode() -> DEVMODEW {
        DEVMODEW {
            dmSize: std::mem::size_of::<DEVMODEW>() as u16,
            ..Default::default()
        }
    }

    pub fn current() -> Result<DisplayMode, CapabilityError> {
        let mut devmode = empty_devmode();
        let ok = unsafe { EnumDisplaySettingsW(PCWSTR::null(), ENUM_CURRENT_SETTINGS, &mut devmode) };
        if !ok.as_bool() {
            return Err(super::no_current_mode());
        }
        Ok(DisplayMode {
            width: devmode.dmPelsWidth,
            height: devmode.dmPelsHeight,
            bits_per_pixel: devmode.dmBitsPerPel,
            frequency: devmode.dmDisplayFrequency,
        })
    }

    pub fn set(mode: DisplayMode, persist: bool) -> Result<(), CapabilityError> {
        let mut devmode = empty_devmode();
        devmode.dmPelsWidth = mode.width;
        devmode.dmPelsHeight = mode.height;
        devmode.dmFields = DM_PELSWIDTH | DM_PELSHEIGHT;
        if mode.bits_per_pixel > 0 {
            devmode.dmBitsPerPel = mode.bits_per_pixel;
            devmode.dmFields |= DM_BITSPERPEL;
        }
        if mode.frequency > 0 {
            devmode.dmDisplayFrequency = mode.frequency;
            devmode.dmFields |= DM_DISPLAYFREQUENCY;
        }

        let flags = if persist { CDS_TYPE(0) } else { CDS_FULLSCREEN };
        let result = unsafe { ChangeDisplaySettingsW(Some(&devmode), flags) };
        if result != DISP_CHANGE_SUCCESSFUL {
            return Err(CapabilityError::Win32 {
                call: "ChangeDisplaySettingsW",
                code: result.0 as u32,
            });
        }
        Ok(())
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct NativeDisplay;

impl DisplayModes for NativeDisplay {
    fn current(&self) -> Result<DisplayMode, CapabilityError> {
        #[cfg(windows)]
        {
            imp::current()
        }
        #[cfg(not(windows))]
        {
            Err(CapabilityError::Unsupported("Display mode changes"))
        }
    }

    fn set(&self, mode: DisplayMode, persist: bool) -> Result<(), CapabilityError> {
        #[cfg(windows)]
        {
            imp::set(mode, persist)
        }
        #[cfg(not(windows))]
        {
            let _ = (mode, persist);
            Err(CapabilityError::Unsupported("Display mode changes"))
        }
    }
}
