/// Dock detection from a device snapshot.
use crate::config::DockDevice;
use crate::inventory::Snapshot;

const VENDOR_MARKER: &str = "VID_";
const PRODUCT_MARKER: &str = "PID_";
const INTERFACE_MARKER: &str = "&MI_";

/// True if any configured token occurs (case-insensitively) inside any present device id.
///
/// An empty signature is never docked. Blank tokens are ignored.
pub fn is_docked(devices: &[DockDevice], snapshot: &Snapshot) -> bool {
    if devices.is_empty() {
        return false;
    }

    devices
        .iter()
        .map(|d| d.token.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_uppercase)
        .any(|token| snapshot.canonical_ids().any(|id| id.contains(&token)))
}

/// Extracts the `VID_xxxx&PID_yyyy` token from a device instance id.
///
/// The product marker must follow the vendor marker inside the same `\`-separated
/// segment, and multi-interface suffixes (`&MI_nn`) are cut off so every interface
/// of a composite device yields the same token. The result is upper-cased.
///
/// ```text
/// USB\VID_17EF&PID_3082&MI_00\7&2B0F9A5B&0&0000  →  VID_17EF&PID_3082
/// USB\PID_3082\XYZ                                →  None
/// ```
pub fn extract_hardware_token(instance_id: &str) -> Option<String> {
    // ASCII upper-casing keeps byte offsets aligned with the input.
    let upper = instance_id.to_ascii_uppercase();

    let vendor = upper.find(VENDOR_MARKER)?;
    let rest = &upper[vendor..];
    rest.find(PRODUCT_MARKER)?;

    let segment = match rest.find('\\') {
        Some(end) => &rest[..end],
        None => rest,
    };
    if !segment.contains('&') || !segment.contains(PRODUCT_MARKER) {
        return None;
    }

    let token = match segment.find(INTERFACE_MARKER) {
        Some(mi) => &segment[..mi],
        None => segment,
    };
    Some(token.to_string())
}
