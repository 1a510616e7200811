//! Lifeline Node Library
//!
//! A wearable heart-rate monitor node: samples a pulse sensor, decodes GPS
//! position sentences, and coordinates emergency alerts with a peer device
//! over a short-range half-duplex radio link.
//!
//! ## Modules
//!
//! - `types` - Core data structures (DeviceId, AlertPacket, CoordinateFix)
//! - `heart` - Heart-rate signal processing and beat detection
//! - `gps` - Incremental NMEA sentence decoding with staleness tracking
//! - `alert` - Emergency alert state machine and radio coordination
//! - `radio` - Wire codec and half-duplex transceiver abstraction
//! - `device` - Per-tick orchestration of the subsystems

pub mod alert;
pub mod device;
pub mod gps;
pub mod heart;
pub mod radio;
pub mod types;

pub use alert::{AlertCoordinator, AlertState, SendStatus};
pub use device::{Device, DeviceConfig};
pub use gps::{FixStatus, PositionDecoder};
pub use heart::{BeatStatus, HeartRateMonitor};
pub use radio::{LinkedTransceiver, Transceiver};
pub use types::{AlertLevel, AlertPacket, CoordinateFix, DeviceId};
