use thiserror::Error;

/// Failure of a single OS-facing capability (device restart, Bluetooth, audio, display).
///
/// These are reported per target and never abort the action pipeline.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The capability has no implementation on this platform.
    #[error("{0} is only supported on Windows")]
    Unsupported(&'static str),

    /// A required OS component is missing entirely (e.g. a COM class is not registered).
    #[error("required component unavailable: {0}")]
    Unavailable(String),

    /// A Bluetooth MAC address could not be parsed.
    #[error("invalid Bluetooth MAC address: '{0}'")]
    InvalidAddress(String),

    /// The requested target (device, endpoint, paired peer) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A Win32 call reported failure.
    #[error("{call} failed (error {code:#010x})")]
    Win32 { call: &'static str, code: u32 },

    /// Several independent sub-steps failed; each message is kept.
    #[error("{} step(s) failed: {}", .0.len(), .0.join("; "))]
    Partial(Vec<String>),
}

#[cfg(windows)]
impl CapabilityError {
    /// Wraps a `windows::core::Error` from `call`.
    pub fn win32(call: &'static str, err: windows::core::Error) -> Self {
        CapabilityError::Win32 {
            call,
            code: err.code().0 as u32,
        }
    }
}
