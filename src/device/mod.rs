//! Device orchestration.
//!
//! Glues the subsystems together under one cooperative tick: forwards sensor
//! and GPS bytes, evaluates the abnormal-heart-rate condition against the
//! configured band, and drives the alert coordinator. Severity is graded by
//! how far the rate sits outside the band.

use serde::Serialize;
use tracing::info;

use crate::alert::{AlertCoordinator, AlertState};
use crate::gps::{FixStatus, PositionDecoder, SentenceStatus};
use crate::heart::{BeatStatus, HeartRateMonitor};
use crate::radio::Transceiver;
use crate::types::{AlertLevel, AlertPacket, CoordinateFix, DeviceId};

/// Default uncalibrated detection threshold, matched to a mid-rail analog
/// reading.
const DEFAULT_THRESHOLD: i32 = 530;

/// Monitoring band and severity grading.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// BPM below this is abnormal.
    pub min_bpm: u16,
    /// BPM above this is abnormal.
    pub max_bpm: u16,
    /// Deviation (BPM outside the band) at or past which severity is High.
    pub high_deviation: u16,
    /// Deviation at or past which severity is Medium.
    pub medium_deviation: u16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            min_bpm: 60,
            max_bpm: 100,
            high_deviation: 30,
            medium_deviation: 15,
        }
    }
}

/// Serializable status snapshot for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub device_id: DeviceId,
    pub bpm: u16,
    pub valid_reading: bool,
    pub calibrated: bool,
    pub fix: FixStatus,
    pub latitude: f64,
    pub longitude: f64,
    pub alert_active: bool,
    pub alert_level: Option<AlertLevel>,
}

/// One monitoring node: sensor pipeline, position decoding, and alerting
/// under a single cooperative control flow.
pub struct Device<T: Transceiver> {
    config: DeviceConfig,
    pub heart: HeartRateMonitor,
    pub gps: PositionDecoder,
    pub alert: AlertCoordinator<T>,
}

impl<T: Transceiver> Device<T> {
    pub fn new(config: DeviceConfig, radio: T, device_id: DeviceId) -> Self {
        info!("device {} starting", device_id);
        Self {
            config,
            heart: HeartRateMonitor::new(DEFAULT_THRESHOLD),
            gps: PositionDecoder::new(),
            alert: AlertCoordinator::new(radio, device_id),
        }
    }

    /// Forward one raw sensor sample.
    pub fn on_sensor_sample(&mut self, raw: i32, now_ms: u64) -> BeatStatus {
        self.heart.sample(raw, now_ms)
    }

    /// Forward one byte from the GPS stream.
    pub fn on_gps_byte(&mut self, byte: u8, now_ms: u64) -> Option<SentenceStatus> {
        self.gps.feed(byte, now_ms)
    }

    /// One cooperative step: staleness check, alert outputs and radio turn,
    /// then the abnormal-rate policy. Returns a received peer alert, if any.
    pub fn tick(&mut self, now_ms: u64) -> Option<AlertPacket> {
        self.gps.tick(now_ms);
        let peer = self.alert.tick(now_ms);

        if self.heart.is_valid_reading() {
            let bpm = self.heart.bpm();
            if let Some(level) = self.grade(bpm) {
                let fix = self.gps.location();
                self.alert.trigger(
                    bpm as i32,
                    fix.latitude as f32,
                    fix.longitude as f32,
                    level,
                    now_ms,
                );
            } else if self.alert.is_active() {
                self.alert.stop();
            }
        }

        peer
    }

    /// Severity for an abnormal rate, or `None` while in band.
    fn grade(&self, bpm: u16) -> Option<AlertLevel> {
        let deviation = if bpm < self.config.min_bpm {
            self.config.min_bpm - bpm
        } else if bpm > self.config.max_bpm {
            bpm - self.config.max_bpm
        } else {
            return None;
        };

        Some(if deviation >= self.config.high_deviation {
            AlertLevel::High
        } else if deviation >= self.config.medium_deviation {
            AlertLevel::Medium
        } else {
            AlertLevel::Low
        })
    }

    pub fn location(&self) -> CoordinateFix {
        self.gps.location()
    }

    pub fn status(&self, now_ms: u64) -> DeviceStatus {
        let fix = self.gps.location();
        DeviceStatus {
            device_id: self.alert.device_id(),
            bpm: self.heart.bpm(),
            valid_reading: self.heart.is_valid_reading(),
            calibrated: self.heart.is_calibrated(),
            fix: self.gps.fix_status(now_ms),
            latitude: fix.latitude,
            longitude: fix.longitude,
            alert_active: self.alert.is_active(),
            alert_level: match self.alert.state() {
                AlertState::Active(level) => Some(level),
                AlertState::Inactive => None,
            },
        }
    }
}
