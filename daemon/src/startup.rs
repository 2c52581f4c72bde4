/// Login-time start via the `HKCU\...\Run` registry key.
///
/// `install` registers `"<exe>" run` so Windows starts the monitor in the user's
/// session at every login; `uninstall` removes the value again.
use std::path::Path;

use anyhow::Result;
#[cfg(windows)]
use tracing::info;

pub const RUN_VALUE_NAME: &str = "DockMonitor";

/// The command line stored in the Run key.
pub fn run_command(exe: &Path) -> String {
    format!("\"{}\" run", exe.display())
}

// ── Windows implementation ─────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use anyhow::{bail, Result};
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_SUCCESS};
    use windows::Win32::System::Registry::{
        RegCloseKey, RegCreateKeyExW, RegDeleteValueW, RegOpenKeyExW, RegSetValueExW, HKEY,
        HKEY_CURRENT_USER, KEY_SET_VALUE, REG_OPTION_NON_VOLATILE, REG_SZ,
    };

    use super::RUN_VALUE_NAME;

    const RUN_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Run";

    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    /// Idempotent: overwrites an existing value.
    pub fn register(command: &str) -> Result<()> {
        let key_w = to_wide(RUN_KEY);
        let val_w = to_wide(RUN_VALUE_NAME);
        let data_w = to_wide(command);
        let data_bytes: &[u8] = unsafe {
            std::slice::from_raw_parts(data_w.as_ptr() as *const u8, data_w.len() * 2)
        };

        let mut hkey = HKEY::default();
        let err = unsafe {
            RegCreateKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR::from_raw(key_w.as_ptr()),
                0,
                PCWSTR::null(),
                REG_OPTION_NON_VOLATILE,
                KEY_SET_VALUE,
                None,
                &mut hkey,
                None,
            )
        };
        if err != ERROR_SUCCESS {
            bail!("RegCreateKeyExW failed: {:?}", err);
        }

        let err = unsafe {
            RegSetValueExW(hkey, PCWSTR::from_raw(val_w.as_ptr()), 0, REG_SZ, Some(data_bytes))
        };
        unsafe {
            let _ = RegCloseKey(hkey);
        }

        if err != ERROR_SUCCESS {
            bail!("RegSetValueExW failed: {:?}", err);
        }
        Ok(())
    }

    /// Returns false if there was nothing to remove.
    pub fn unregister() -> Result<bool> {
        let key_w = to_wide(RUN_KEY);
        let val_w = to_wide(RUN_VALUE_NAME);

        let mut hkey = HKEY::default();
        let err = unsafe {
            RegOpenKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR::from_raw(key_w.as_ptr()),
                0,
                KEY_SET_VALUE,
                &mut hkey,
            )
        };
        if err != ERROR_SUCCESS {
            return Ok(false);
        }

        let err = unsafe { RegDeleteValueW(hkey, PCWSTR::from_raw(val_w.as_ptr())) };
        unsafe {
            let _ = RegCloseKey(hkey);
        }

        if err == ERROR_FILE_NOT_FOUND {
            return Ok(false);
        }
        if err != ERROR_SUCCESS {
            bail!("RegDeleteValueW failed: {:?}", err);
        }
        Ok(true)
    }
}

// ── Public API ─────────────────────────────────────────────────────────────────

/// Registers the running binary to start the monitor at user login.
pub fn install() -> Result<()> {
    #[cfg(windows)]
    {
        use anyhow::Context;
        let exe = std::env::current_exe().context("Failed to locate the dock-monitor executable")?;
        let command = run_command(&exe);
        imp::register(&command)?;
        info!(command = %command, "Registered for start at login");
        Ok(())
    }
    #[cfg(not(windows))]
    {
        Err(crate::error::CapabilityError::Unsupported("Login start registration").into())
    }
}

/// Removes the login registration. Succeeds if it was never installed.
pub fn uninstall() -> Result<()> {
    #[cfg(windows)]
    {
        if imp::unregister()? {
            info!("Removed start-at-login registration");
        } else {
            info!("Start-at-login registration was not present");
        }
        Ok(())
    }
    #[cfg(not(windows))]
    {
        Err(crate::error::CapabilityError::Unsupported("Login start registration").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn run_command_quotes_path_and_appends_subcommand() {
        let exe = PathBuf::from(r"C:\Program Files\Dock Monitor\dock-monitor.exe");
        assert_eq!(
            run_command(&exe),
            r#""C:\Program Files\Dock Monitor\dock-monitor.exe" run"#
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn install_errors_off_windows() {
        assert!(install().unwrap_err().to_string().contains("Windows"));
    }
}
