//! Lifeline Node
//!
//! Wearable heart-rate monitor with GPS fix tracking and peer emergency
//! alerting over a point-to-point radio link.
//!
//! Usage:
//!   lifeline-node [OPTIONS]
//!
//! Options:
//!   --device-id <ID>   Device identifier, up to 7 ASCII chars (default: random HRM_NNN)
//!   --min-bpm <N>      Lower bound of the normal band (default: 60)
//!   --max-bpm <N>      Upper bound of the normal band (default: 100)
//!   --tick-ms <MS>     Cooperative tick period (default: 50)
//!   --simulate         Run two linked simulated devices end to end

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use lifeline_node::radio::PIPE_ADDRESSES;
use lifeline_node::{Device, DeviceConfig, DeviceId, LinkedTransceiver};

#[derive(Debug)]
struct Config {
    device_id: Option<String>,
    min_bpm: u16,
    max_bpm: u16,
    tick_ms: u64,
    simulate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: None,
            min_bpm: 60,
            max_bpm: 100,
            tick_ms: 50,
            simulate: false,
        }
    }
}

fn parse_args() -> Config {
    let mut config = Config::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--device-id" => {
                config.device_id = args.get(i + 1).cloned();
                i += 1;
            }
            "--min-bpm" => {
                config.min_bpm = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(60);
                i += 1;
            }
            "--max-bpm" => {
                config.max_bpm = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(100);
                i += 1;
            }
            "--tick-ms" => {
                config.tick_ms = args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(50);
                i += 1;
            }
            "--simulate" => {
                config.simulate = true;
            }
            _ => {}
        }
        i += 1;
    }

    config
}

/// Synthetic pulse-sensor waveform: jittered baseline with a spike-and-dip
/// pulse at the configured beat interval.
struct PulseSim {
    baseline: i32,
    beat_interval_ms: u64,
    next_beat_ms: u64,
    dip_until_ms: u64,
}

impl PulseSim {
    fn new(beat_interval_ms: u64) -> Self {
        Self {
            baseline: 500,
            beat_interval_ms,
            next_beat_ms: beat_interval_ms,
            dip_until_ms: 0,
        }
    }

    fn set_rate(&mut self, bpm: u64) {
        self.beat_interval_ms = 60_000 / bpm;
    }

    fn sample(&mut self, now_ms: u64) -> i32 {
        let mut rng = rand::thread_rng();
        if now_ms >= self.next_beat_ms {
            self.next_beat_ms = now_ms + self.beat_interval_ms;
            self.dip_until_ms = now_ms + 120;
            return self.baseline + 100 + rng.gen_range(0..10);
        }
        if now_ms < self.dip_until_ms {
            // Recovery dip below the running average re-arms the detector.
            return self.baseline - 60 + rng.gen_range(-5..5);
        }
        self.baseline + rng.gen_range(-5..5)
    }
}

/// A GGA sentence for the simulated position, one per second.
fn gga_sentence(lat_dm: &str, lat_h: char, lon_dm: &str, lon_h: char) -> String {
    format!(
        "$GPGGA,123519,{},{},{},{},1,08,0.9,100.0,M,46.9,M,,*47\r\n",
        lat_dm, lat_h, lon_dm, lon_h
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .init();

    let config = parse_args();

    info!("=== LIFELINE NODE ===");
    info!("  Normal band: {}-{} BPM", config.min_bpm, config.max_bpm);
    info!("  Tick period: {}ms", config.tick_ms);
    info!(
        "  Radio pipes: {:#012x} / {:#012x}",
        PIPE_ADDRESSES[0], PIPE_ADDRESSES[1]
    );

    let device_config = DeviceConfig {
        min_bpm: config.min_bpm,
        max_bpm: config.max_bpm,
        ..Default::default()
    };

    let local_id = match &config.device_id {
        Some(id) => DeviceId::new(id),
        None => DeviceId::generate(),
    };
    info!("  Device ID: {}", local_id);

    if config.simulate {
        run_simulation(device_config, local_id, config.tick_ms).await;
    } else {
        run_single(device_config, local_id, config.tick_ms).await;
    }

    Ok(())
}

/// Single device with a synthetic sensor and no peer on the far end of the
/// link, the standalone hardware configuration.
async fn run_single(config: DeviceConfig, id: DeviceId, tick_ms: u64) {
    let (radio, _far_end) = LinkedTransceiver::pair();
    let mut device = Device::new(config, radio, id);
    let mut pulse = PulseSim::new(800); // 75 BPM

    let start = Instant::now();
    let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
    let mut last_gga_ms = 0;
    let mut last_status_ms = 0;

    device.heart.start_calibration(5000, 0);
    info!("calibrating, keep still...");

    loop {
        interval.tick().await;
        let now_ms = start.elapsed().as_millis() as u64;

        let raw = pulse.sample(now_ms);
        device.on_sensor_sample(raw, now_ms);

        if now_ms - last_gga_ms >= 1000 {
            for &b in gga_sentence("4103.49", 'N', "02858.70", 'E').as_bytes() {
                device.on_gps_byte(b, now_ms);
            }
            last_gga_ms = now_ms;
        }

        device.tick(now_ms);

        if now_ms - last_status_ms >= 5000 {
            emit_status(&device, now_ms);
            last_status_ms = now_ms;
        }
    }
}

/// Two linked devices: device A develops tachycardia, broadcasts, and B
/// shows the peer notification; A then recovers and the alert clears.
async fn run_simulation(config: DeviceConfig, id_a: DeviceId, tick_ms: u64) {
    info!("starting two-device simulation");

    let (radio_a, radio_b) = LinkedTransceiver::pair();
    let mut dev_a = Device::new(config.clone(), radio_a, id_a);
    let mut dev_b = Device::new(config, radio_b, DeviceId::generate());

    let mut pulse_a = PulseSim::new(800); // 75 BPM
    let mut pulse_b = PulseSim::new(850);

    let start = Instant::now();
    let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
    let mut last_gga_ms = 0;
    let mut last_status_ms = 0;
    let mut episode_started = false;
    let mut episode_ended = false;

    dev_a.heart.start_calibration(5000, 0);
    dev_b.heart.start_calibration(5000, 0);

    loop {
        interval.tick().await;
        let now_ms = start.elapsed().as_millis() as u64;

        // Scripted tachycardia episode on device A.
        if !episode_started && now_ms >= 20_000 {
            info!("simulation: device A entering tachycardia (140 BPM)");
            pulse_a.set_rate(140);
            episode_started = true;
        }
        if !episode_ended && now_ms >= 45_000 {
            info!("simulation: device A recovering (75 BPM)");
            pulse_a.set_rate(75);
            episode_ended = true;
        }

        dev_a.on_sensor_sample(pulse_a.sample(now_ms), now_ms);
        dev_b.on_sensor_sample(pulse_b.sample(now_ms), now_ms);

        if now_ms - last_gga_ms >= 1000 {
            for &b in gga_sentence("4103.49", 'N', "02858.70", 'E').as_bytes() {
                dev_a.on_gps_byte(b, now_ms);
            }
            for &b in gga_sentence("4104.02", 'N', "02859.31", 'E').as_bytes() {
                dev_b.on_gps_byte(b, now_ms);
            }
            last_gga_ms = now_ms;
        }

        dev_a.tick(now_ms);
        if let Some(peer) = dev_b.tick(now_ms) {
            info!(
                "device B notified: peer {} reports {} BPM",
                peer.device_id, peer.heart_rate
            );
        }

        if now_ms - last_status_ms >= 5000 {
            emit_status(&dev_a, now_ms);
            emit_status(&dev_b, now_ms);
            last_status_ms = now_ms;
        }
    }
}

fn emit_status(device: &Device<LinkedTransceiver>, now_ms: u64) {
    let status = device.status(now_ms);
    match serde_json::to_string(&status) {
        Ok(json) => info!("status {}", json),
        Err(e) => info!("status unavailable: {}", e),
    }
}
