//! Emergency alert coordination.
//!
//! Owns the alert state machine, the buzzer/indicator pattern generator, and
//! the radio turn-taking: periodic rebroadcast of our own alert, receipt of
//! peer alerts, and self-echo filtering. Everything is driven by `tick` with
//! a caller-supplied monotonic time; the peer-notification flash is a ticked
//! sub-state, so nothing here ever blocks the device loop.

use tracing::{debug, info, warn};

use crate::radio::{self, Transceiver, TxError};
use crate::types::{AlertLevel, AlertPacket, DeviceId};

/// Rebroadcast the active alert this often.
const REBROADCAST_MS: u64 = 10_000;

/// Peer-notification flash: indicator edge spacing and edge count
/// (six on/off cycles).
const FLASH_STEP_MS: u64 = 100;
const FLASH_EDGES: u8 = 12;

/// Alert state. The coordinator is the only writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Inactive,
    Active(AlertLevel),
}

/// Outcome of one radio transmit turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    ChannelBusy,
    SendFailed,
}

/// Buzzer/indicator intervals for an alert level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AlertPattern {
    buzzer_ms: u64,
    indicator_ms: u64,
}

impl AlertPattern {
    fn for_level(level: AlertLevel) -> Self {
        match level {
            AlertLevel::Low => Self {
                buzzer_ms: 2000,
                indicator_ms: 1000,
            },
            AlertLevel::Medium => Self {
                buzzer_ms: 1000,
                indicator_ms: 500,
            },
            AlertLevel::High => Self {
                buzzer_ms: 300,
                indicator_ms: 200,
            },
        }
    }
}

/// Non-blocking peer-notification flash.
#[derive(Debug, Clone, Copy)]
struct Flash {
    edges_left: u8,
    last_edge_ms: u64,
}

/// Emergency coordinator over a half-duplex transceiver.
pub struct AlertCoordinator<T: Transceiver> {
    radio: T,
    device_id: DeviceId,
    state: AlertState,
    pattern: AlertPattern,
    outgoing: AlertPacket,
    buzzer_on: bool,
    indicator_on: bool,
    last_buzzer_ms: u64,
    last_indicator_ms: u64,
    last_broadcast_ms: u64,
    flash: Option<Flash>,
}

impl<T: Transceiver> AlertCoordinator<T> {
    /// Create a coordinator; the transceiver is put into listen mode.
    pub fn new(mut radio: T, device_id: DeviceId) -> Self {
        radio.start_listening();
        Self {
            radio,
            device_id,
            state: AlertState::Inactive,
            pattern: AlertPattern::for_level(AlertLevel::Medium),
            outgoing: AlertPacket::empty(device_id),
            buzzer_on: false,
            indicator_on: false,
            last_buzzer_ms: 0,
            last_indicator_ms: 0,
            last_broadcast_ms: 0,
            flash: None,
        }
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != AlertState::Inactive
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn buzzer_on(&self) -> bool {
        self.buzzer_on
    }

    pub fn indicator_on(&self) -> bool {
        self.indicator_on
    }

    /// Raise an alert. First trigger wins: while active this is a no-op, and
    /// changing severity requires an explicit `stop` first.
    pub fn trigger(
        &mut self,
        heart_rate: i32,
        lat: f32,
        lon: f32,
        level: AlertLevel,
        now_ms: u64,
    ) -> Option<SendStatus> {
        if self.is_active() {
            return None;
        }

        warn!(
            "alert: triggered level={:?} hr={} at {:.6},{:.6}",
            level, heart_rate, lat, lon
        );
        self.state = AlertState::Active(level);
        self.pattern = AlertPattern::for_level(level);
        self.outgoing = AlertPacket {
            latitude: lat,
            longitude: lon,
            heart_rate,
            timestamp: now_ms as u32,
            device_id: self.device_id,
            alert_level: level.as_raw(),
        };
        self.last_buzzer_ms = now_ms;
        self.last_indicator_ms = now_ms;
        self.last_broadcast_ms = now_ms;
        Some(self.send_packet())
    }

    /// Drop back to Inactive and force both outputs off.
    pub fn stop(&mut self) {
        if self.is_active() {
            info!("alert: stopped");
        }
        self.state = AlertState::Inactive;
        self.buzzer_on = false;
        self.indicator_on = false;
    }

    /// One cooperative step: pattern outputs, periodic rebroadcast, the
    /// peer-notification flash, and a receive poll. Returns a freshly
    /// received peer alert, if any.
    pub fn tick(&mut self, now_ms: u64) -> Option<AlertPacket> {
        if self.is_active() {
            if now_ms.saturating_sub(self.last_buzzer_ms) >= self.pattern.buzzer_ms {
                self.buzzer_on = !self.buzzer_on;
                self.last_buzzer_ms = now_ms;
            }
            if now_ms.saturating_sub(self.last_indicator_ms) >= self.pattern.indicator_ms {
                self.indicator_on = !self.indicator_on;
                self.last_indicator_ms = now_ms;
            }
            if now_ms.saturating_sub(self.last_broadcast_ms) > REBROADCAST_MS {
                self.send_packet();
                self.last_broadcast_ms = now_ms;
            }
        }

        self.tick_flash(now_ms);
        self.poll_incoming(now_ms)
    }

    /// One half-duplex transmit turn: transmit mode, write, back to listen.
    /// Failures are reported but never retried or escalated.
    pub fn send_packet(&mut self) -> SendStatus {
        let wire = radio::encode(&self.outgoing);

        self.radio.stop_listening();
        let result = self.radio.send(&wire);
        self.radio.start_listening();

        match result {
            Ok(()) => {
                debug!("alert: packet broadcast");
                SendStatus::Sent
            }
            Err(TxError::Busy) => {
                warn!("alert: channel busy, packet dropped");
                SendStatus::ChannelBusy
            }
            Err(TxError::Failed) => {
                warn!("alert: transmit failed");
                SendStatus::SendFailed
            }
        }
    }

    /// Poll for one incoming packet. Our own broadcasts echo back with our
    /// device id and are discarded; anything else is a genuine peer alert,
    /// which starts the visual notification and is returned unmodified.
    /// A peer alert never changes the local alert state.
    pub fn poll_incoming(&mut self, now_ms: u64) -> Option<AlertPacket> {
        if !self.radio.packet_available() {
            return None;
        }
        let wire = self.radio.receive()?;
        let packet = match radio::decode(&wire) {
            Ok(p) => p,
            Err(e) => {
                warn!("alert: undecodable packet dropped: {}", e);
                return None;
            }
        };

        if packet.device_id == self.device_id {
            debug!("alert: self-echo discarded");
            return None;
        }

        warn!(
            "alert: peer emergency from {} level={:?} hr={} at {:.6},{:.6}",
            packet.device_id,
            AlertLevel::from_raw(packet.alert_level),
            packet.heart_rate,
            packet.latitude,
            packet.longitude,
        );
        self.start_flash(now_ms);
        Some(packet)
    }

    /// True while the peer-notification flash is running.
    pub fn is_flashing(&self) -> bool {
        self.flash.is_some()
    }

    fn start_flash(&mut self, now_ms: u64) {
        // First edge fires on the next tick step.
        self.flash = Some(Flash {
            edges_left: FLASH_EDGES,
            last_edge_ms: now_ms,
        });
    }

    fn tick_flash(&mut self, now_ms: u64) {
        let Some(mut flash) = self.flash.take() else {
            return;
        };
        if now_ms.saturating_sub(flash.last_edge_ms) >= FLASH_STEP_MS {
            self.indicator_on = !self.indicator_on;
            flash.last_edge_ms = now_ms;
            flash.edges_left -= 1;
        }
        if flash.edges_left > 0 {
            self.flash = Some(flash);
        } else {
            // The pattern has an even edge count, so it ends dark.
            self.indicator_on = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{encode, LinkedTransceiver};

    fn coordinator_pair() -> (
        AlertCoordinator<LinkedTransceiver>,
        AlertCoordinator<LinkedTransceiver>,
    ) {
        let (a, b) = LinkedTransceiver::pair();
        (
            AlertCoordinator::new(a, DeviceId::new("HRM_AAA")),
            AlertCoordinator::new(b, DeviceId::new("HRM_BBB")),
        )
    }

    #[test]
    fn test_trigger_transitions_and_sends() {
        let (mut a, mut b) = coordinator_pair();

        let status = a.trigger(130, 41.0, 29.0, AlertLevel::High, 1000);
        assert_eq!(status, Some(SendStatus::Sent));
        assert_eq!(a.state(), AlertState::Active(AlertLevel::High));

        let received = b.tick(1050).expect("peer should receive the alert");
        assert_eq!(received.device_id, DeviceId::new("HRM_AAA"));
        assert_eq!(received.heart_rate, 130);
        assert_eq!(received.alert_level, 3);
        // A peer alert notifies, it does not escalate.
        assert_eq!(b.state(), AlertState::Inactive);
        assert!(b.is_flashing());
    }

    #[test]
    fn test_trigger_is_first_wins() {
        let (mut a, _b) = coordinator_pair();
        a.trigger(130, 41.0, 29.0, AlertLevel::Low, 0);
        assert_eq!(a.trigger(180, 41.0, 29.0, AlertLevel::High, 100), None);
        // Level and packet are unchanged until an explicit stop.
        assert_eq!(a.state(), AlertState::Active(AlertLevel::Low));
        assert_eq!(a.outgoing.heart_rate, 130);

        a.stop();
        a.trigger(180, 41.0, 29.0, AlertLevel::High, 200);
        assert_eq!(a.state(), AlertState::Active(AlertLevel::High));
    }

    #[test]
    fn test_pattern_table() {
        for (level, buzzer, indicator) in [
            (AlertLevel::Low, 2000, 1000),
            (AlertLevel::Medium, 1000, 500),
            (AlertLevel::High, 300, 200),
        ] {
            let p = AlertPattern::for_level(level);
            assert_eq!((p.buzzer_ms, p.indicator_ms), (buzzer, indicator));
        }
        // Unspecified wire levels collapse to the medium pattern.
        let p = AlertPattern::for_level(AlertLevel::from_raw(7));
        assert_eq!((p.buzzer_ms, p.indicator_ms), (1000, 500));
    }

    #[test]
    fn test_outputs_toggle_independently() {
        let (mut a, _b) = coordinator_pair();
        a.trigger(130, 41.0, 29.0, AlertLevel::Medium, 0);
        assert!(!a.buzzer_on());
        assert!(!a.indicator_on());

        // Indicator period (500ms) elapses first.
        a.tick(500);
        assert!(!a.buzzer_on());
        assert!(a.indicator_on());

        // Buzzer period (1000ms) elapses; indicator toggles again.
        a.tick(1000);
        assert!(a.buzzer_on());
        assert!(!a.indicator_on());
    }

    #[test]
    fn test_stop_forces_outputs_off() {
        let (mut a, _b) = coordinator_pair();
        a.trigger(130, 41.0, 29.0, AlertLevel::High, 0);
        a.tick(300);
        a.tick(600);
        assert!(a.buzzer_on() || a.indicator_on());

        a.stop();
        assert_eq!(a.state(), AlertState::Inactive);
        assert!(!a.buzzer_on());
        assert!(!a.indicator_on());
    }

    #[test]
    fn test_rebroadcast_every_ten_seconds() {
        let (mut a, mut b) = coordinator_pair();
        a.trigger(130, 41.0, 29.0, AlertLevel::Medium, 0);
        assert!(b.tick(10).is_some()); // initial broadcast

        // Within the window: no rebroadcast.
        a.tick(9_000);
        assert!(b.tick(9_010).is_none());

        // Past the window: one rebroadcast.
        a.tick(10_500);
        assert!(b.tick(10_510).is_some());
    }

    #[test]
    fn test_self_echo_discarded() {
        let (a, mut far_end) = LinkedTransceiver::pair();
        let id = DeviceId::new("HRM_AAA");
        let mut coord = AlertCoordinator::new(a, id);
        far_end.stop_listening();

        // A packet wearing our own id is an echo of our broadcast.
        let own = AlertPacket {
            latitude: 1.0,
            longitude: 2.0,
            heart_rate: 99,
            timestamp: 5,
            device_id: id,
            alert_level: 2,
        };
        far_end.send(&encode(&own)).unwrap();
        assert_eq!(coord.poll_incoming(0), None);
        assert!(!coord.is_flashing());

        // The same record under a different id comes through unmodified.
        let peer = AlertPacket {
            device_id: DeviceId::new("HRM_ZZZ"),
            ..own
        };
        far_end.send(&encode(&peer)).unwrap();
        assert_eq!(coord.poll_incoming(0), Some(peer));
        assert!(coord.is_flashing());
    }

    #[test]
    fn test_flash_runs_twelve_edges_and_ends_dark() {
        let (mut a, mut b) = coordinator_pair();
        a.trigger(130, 41.0, 29.0, AlertLevel::Medium, 0);
        assert!(b.tick(10).is_some());
        assert!(b.is_flashing());

        let mut edges = 0;
        let mut last = b.indicator_on();
        for step in 1..40 {
            b.tick(10 + step * 100);
            if b.indicator_on() != last {
                edges += 1;
                last = b.indicator_on();
            }
            if !b.is_flashing() {
                break;
            }
        }
        assert!(!b.is_flashing());
        // Even edge count: the pattern ends with the indicator dark.
        assert_eq!(edges % 2, 0);
        assert!(!b.indicator_on());
    }

    #[test]
    fn test_failed_send_is_reported_not_escalated() {
        let (a, _b) = LinkedTransceiver::pair();
        let mut coord = AlertCoordinator::new(a, DeviceId::new("HRM_AAA"));
        coord.radio.fail_sends = true;

        let status = coord.trigger(130, 41.0, 29.0, AlertLevel::Medium, 0);
        assert_eq!(status, Some(SendStatus::SendFailed));
        // The alert stays active regardless of the radio outcome.
        assert!(coord.is_active());
    }

}
