//! Radio link: wire format and half-duplex transceiver seam.
//!
//! The alert packet is a fixed-width little-endian record; both ends of the
//! link must agree on field order, width, and byte order, so the layout is
//! pinned here rather than derived from an in-memory struct. The transceiver
//! trait mirrors a half-duplex module: an explicit mode switch separates
//! transmit from listen, and a transmit turn is stop-listening, write,
//! start-listening.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::types::{AlertPacket, DeviceId, DEVICE_ID_LEN};

/// Wire length of one alert packet.
///
/// Layout (little-endian):
/// ```text
/// offset  0  latitude    f32
/// offset  4  longitude   f32
/// offset  8  heart_rate  i32
/// offset 12  timestamp   u32
/// offset 16  device_id   [u8; 8]  ASCII, NUL-terminated
/// offset 24  alert_level i32
/// ```
pub const PACKET_LEN: usize = 28;

/// The fixed 40-bit pipe address pair. Each node transmits on the pipe the
/// other node reads, so the link supports exactly two devices.
pub const PIPE_ADDRESSES: [u64; 2] = [0xF0F0_F0F0_E1, 0xF0F0_F0F0_D2];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RadioError {
    #[error("truncated packet: {0} bytes")]
    Truncated(usize),
}

/// Transmit failure modes reported by a transceiver.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxError {
    #[error("channel busy")]
    Busy,
    #[error("transmit failed")]
    Failed,
}

/// Half-duplex transceiver abstraction.
///
/// Implementations carry a single mode flag: after `stop_listening` the
/// device may transmit, after `start_listening` it may receive. Sending
/// while in listen mode must fail with [`TxError::Busy`].
pub trait Transceiver {
    /// Switch to receive mode.
    fn start_listening(&mut self);
    /// Switch to transmit mode.
    fn stop_listening(&mut self);
    /// Transmit one packet. Only valid in transmit mode.
    fn send(&mut self, payload: &[u8; PACKET_LEN]) -> Result<(), TxError>;
    /// True if a received packet is waiting.
    fn packet_available(&mut self) -> bool;
    /// Take one received packet, if any.
    fn receive(&mut self) -> Option<[u8; PACKET_LEN]>;
}

/// Encode a packet into its wire form.
pub fn encode(packet: &AlertPacket) -> [u8; PACKET_LEN] {
    let mut buf = [0u8; PACKET_LEN];
    buf[0..4].copy_from_slice(&packet.latitude.to_le_bytes());
    buf[4..8].copy_from_slice(&packet.longitude.to_le_bytes());
    buf[8..12].copy_from_slice(&packet.heart_rate.to_le_bytes());
    buf[12..16].copy_from_slice(&packet.timestamp.to_le_bytes());
    buf[16..24].copy_from_slice(packet.device_id.as_bytes());
    buf[24..28].copy_from_slice(&packet.alert_level.to_le_bytes());
    buf
}

/// Decode a wire record back into a packet.
pub fn decode(bytes: &[u8]) -> Result<AlertPacket, RadioError> {
    if bytes.len() < PACKET_LEN {
        return Err(RadioError::Truncated(bytes.len()));
    }
    let mut id = [0u8; DEVICE_ID_LEN];
    id.copy_from_slice(&bytes[16..24]);

    // Slice bounds are checked above; the try_intos cannot fail.
    Ok(AlertPacket {
        latitude: f32::from_le_bytes(bytes[0..4].try_into().unwrap_or([0; 4])),
        longitude: f32::from_le_bytes(bytes[4..8].try_into().unwrap_or([0; 4])),
        heart_rate: i32::from_le_bytes(bytes[8..12].try_into().unwrap_or([0; 4])),
        timestamp: u32::from_le_bytes(bytes[12..16].try_into().unwrap_or([0; 4])),
        device_id: DeviceId::from_wire(id),
        alert_level: i32::from_le_bytes(bytes[24..28].try_into().unwrap_or([0; 4])),
    })
}

/// Shared queue pair backing two linked in-memory transceivers.
#[derive(Debug, Default)]
struct Airwaves {
    // Indexed by endpoint: queue 0 holds packets addressed to endpoint 0.
    inboxes: [VecDeque<[u8; PACKET_LEN]>; 2],
}

/// In-memory transceiver for tests and simulation. Two endpoints share a
/// pair of bounded queues; each endpoint's transmissions land in the other's
/// inbox.
#[derive(Debug)]
pub struct LinkedTransceiver {
    air: Arc<Mutex<Airwaves>>,
    endpoint: usize,
    listening: bool,
    /// When set, every transmit reports [`TxError::Failed`].
    pub fail_sends: bool,
}

const INBOX_CAP: usize = 16;

impl LinkedTransceiver {
    /// Create two linked endpoints, both initially in listen mode.
    pub fn pair() -> (Self, Self) {
        let air = Arc::new(Mutex::new(Airwaves::default()));
        let a = Self {
            air: air.clone(),
            endpoint: 0,
            listening: true,
            fail_sends: false,
        };
        let b = Self {
            air,
            endpoint: 1,
            listening: true,
            fail_sends: false,
        };
        (a, b)
    }
}

impl Transceiver for LinkedTransceiver {
    fn start_listening(&mut self) {
        self.listening = true;
    }

    fn stop_listening(&mut self) {
        self.listening = false;
    }

    fn send(&mut self, payload: &[u8; PACKET_LEN]) -> Result<(), TxError> {
        if self.listening {
            return Err(TxError::Busy);
        }
        if self.fail_sends {
            return Err(TxError::Failed);
        }
        let mut air = self.air.lock().map_err(|_| TxError::Failed)?;
        let inbox = &mut air.inboxes[1 - self.endpoint];
        if inbox.len() >= INBOX_CAP {
            // No acknowledgement at this layer; an overrun is silent loss.
            inbox.pop_front();
        }
        inbox.push_back(*payload);
        Ok(())
    }

    fn packet_available(&mut self) -> bool {
        self.air
            .lock()
            .map(|air| !air.inboxes[self.endpoint].is_empty())
            .unwrap_or(false)
    }

    fn receive(&mut self) -> Option<[u8; PACKET_LEN]> {
        self.air.lock().ok()?.inboxes[self.endpoint].pop_front()
    }
}
