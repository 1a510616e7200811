//! Core data types for the Lifeline node.

use serde::{Deserialize, Serialize};

/// Width of the device identifier on the wire: 7 significant ASCII bytes
/// plus a terminating NUL.
pub const DEVICE_ID_LEN: usize = 8;

/// Fixed-width device identifier carried in every alert packet.
///
/// Stored exactly as transmitted: ASCII, NUL-terminated, at most 7
/// significant bytes. Identifiers longer than 7 bytes are truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId {
    bytes: [u8; DEVICE_ID_LEN],
}

impl DeviceId {
    /// Build an identifier from a string, truncating to 7 bytes.
    pub fn new(id: &str) -> Self {
        let mut bytes = [0u8; DEVICE_ID_LEN];
        for (i, b) in id.bytes().take(DEVICE_ID_LEN - 1).enumerate() {
            bytes[i] = b;
        }
        Self { bytes }
    }

    /// Generate a random identifier in the `HRM_NNN` style.
    pub fn generate() -> Self {
        use rand::Rng;
        let n: u16 = rand::thread_rng().gen_range(100..1000);
        Self::new(&format!("HRM_{}", n))
    }

    /// Reconstruct an identifier from raw wire bytes.
    pub fn from_wire(bytes: [u8; DEVICE_ID_LEN]) -> Self {
        let mut out = [0u8; DEVICE_ID_LEN];
        // Re-terminate: everything after the first NUL is ignored.
        for (i, &b) in bytes.iter().take(DEVICE_ID_LEN - 1).enumerate() {
            if b == 0 {
                break;
            }
            out[i] = b;
        }
        Self { bytes: out }
    }

    pub fn as_bytes(&self) -> &[u8; DEVICE_ID_LEN] {
        &self.bytes
    }

    /// The significant portion of the identifier, for display.
    pub fn as_str(&self) -> &str {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(DEVICE_ID_LEN);
        std::str::from_utf8(&self.bytes[..end]).unwrap_or("?")
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DeviceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Severity of an emergency alert. Any unrecognized wire value maps to
/// `Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
    Low,
    Medium,
    High,
}

impl AlertLevel {
    /// Decode a raw wire value; out-of-domain values are "unspecified" and
    /// fall back to `Medium`.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => AlertLevel::Low,
            3 => AlertLevel::High,
            _ => AlertLevel::Medium,
        }
    }

    pub fn as_raw(&self) -> i32 {
        match self {
            AlertLevel::Low => 1,
            AlertLevel::Medium => 2,
            AlertLevel::High => 3,
        }
    }
}

/// The alert record exchanged between peer devices.
///
/// One instance represents "our" outgoing alert: overwritten on each trigger,
/// read-only while broadcasting. Wire layout is defined in [`crate::radio`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlertPacket {
    pub latitude: f32,
    pub longitude: f32,
    pub heart_rate: i32,
    /// Monotonic tick count at trigger time, in milliseconds.
    pub timestamp: u32,
    pub device_id: DeviceId,
    /// Raw alert level; decode with [`AlertLevel::from_raw`].
    pub alert_level: i32,
}

impl AlertPacket {
    /// An empty outgoing packet for a device that has not alerted yet.
    pub fn empty(device_id: DeviceId) -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            heart_rate: 0,
            timestamp: 0,
            device_id,
            alert_level: 0,
        }
    }
}

/// A validated position fix in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoordinateFix {
    pub latitude: f64,
    pub longitude: f64,
    pub valid: bool,
}

impl CoordinateFix {
    /// The fix-validity invariant: in-range and not the (0,0) "no fix"
    /// sentinel.
    pub fn in_bounds(lat: f64, lon: f64) -> bool {
        (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon)
            && !(lat == 0.0 && lon == 0.0)
    }
}

impl Default for CoordinateFix {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            valid: false,
        }
    }
}
