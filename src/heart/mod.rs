//! Heart-rate signal processing.
//!
//! Turns a periodically sampled analog amplitude into beat events and a BPM
//! estimate. Detection is a hysteresis comparator over a dynamic threshold
//! with a 300 ms refractory guard; the threshold is learned during a
//! calibration window. All timing comes from the caller's monotonic clock,
//! so the monitor itself never blocks.

use tracing::{debug, info};

/// Samples kept in the running-average window.
const BUFFER_LEN: usize = 10;

/// Margin added to the calibration mean to form the detection threshold.
const CALIBRATION_MARGIN: i32 = 30;

/// A candidate peak must clear the running average by this much.
const PEAK_MARGIN: i32 = 20;

/// Minimum spacing between two accepted beats, in milliseconds.
const REFRACTORY_MS: u64 = 300;

/// Beat-to-beat intervals outside this range (exclusive) are noise.
const MIN_INTERVAL_MS: u64 = 300;
const MAX_INTERVAL_MS: u64 = 2000;

/// Physiological BPM range for a valid reading.
const MIN_VALID_BPM: u16 = 40;
const MAX_VALID_BPM: u16 = 180;

/// Outcome of feeding one sample to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeatStatus {
    /// No candidate peak fired on this sample.
    Quiet,
    /// A peak fired before the monitor was calibrated; dropped.
    NotCalibrated,
    /// A peak fired but the beat-to-beat interval was implausible; dropped.
    OutOfRange,
    /// A beat was accepted and the BPM estimate updated.
    Accepted { bpm: u16 },
}

/// In-progress calibration window.
#[derive(Debug, Clone, Copy)]
struct Calibration {
    deadline_ms: u64,
    sum: i64,
    count: u32,
}

/// Heart-rate monitor state. Owned and mutated by exactly one caller.
#[derive(Debug)]
pub struct HeartRateMonitor {
    buffer: [i32; BUFFER_LEN],
    buffer_index: usize,
    avg_signal: i32,
    threshold: i32,
    calibrated: bool,
    calibration: Option<Calibration>,
    in_beat: bool,
    last_peak_ms: u64,
    last_beat_ms: Option<u64>,
    beat_count: u32,
    bpm: u16,
}

impl HeartRateMonitor {
    /// Create a monitor with an initial (uncalibrated) threshold.
    pub fn new(initial_threshold: i32) -> Self {
        Self {
            buffer: [0; BUFFER_LEN],
            buffer_index: 0,
            avg_signal: 0,
            threshold: initial_threshold,
            calibrated: false,
            calibration: None,
            in_beat: false,
            last_peak_ms: 0,
            last_beat_ms: None,
            beat_count: 0,
            bpm: 0,
        }
    }

    /// Begin a calibration window. While it runs, samples feed the window
    /// mean instead of beat detection; the window is finalized by the first
    /// sample at or past the deadline.
    pub fn start_calibration(&mut self, duration_ms: u64, now_ms: u64) {
        info!("heart: calibrating for {}ms", duration_ms);
        self.calibration = Some(Calibration {
            deadline_ms: now_ms.saturating_add(duration_ms),
            sum: 0,
            count: 0,
        });
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_some()
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Push one raw sample taken at `now_ms`.
    pub fn sample(&mut self, raw: i32, now_ms: u64) -> BeatStatus {
        if let Some(mut cal) = self.calibration.take() {
            if now_ms < cal.deadline_ms {
                cal.sum += raw as i64;
                cal.count += 1;
                self.calibration = Some(cal);
                return BeatStatus::Quiet;
            }
            self.finish_calibration(&cal);
        }

        self.push_sample(raw);
        self.detect_beat(raw, now_ms)
    }

    /// Current BPM estimate. Stale until the next accepted beat.
    pub fn bpm(&self) -> u16 {
        self.bpm
    }

    /// Accepted beats since the last reset.
    pub fn beat_count(&self) -> u32 {
        self.beat_count
    }

    /// True iff calibrated and the estimate is physiologically plausible.
    pub fn is_valid_reading(&self) -> bool {
        self.calibrated && (MIN_VALID_BPM..=MAX_VALID_BPM).contains(&self.bpm)
    }

    /// Clear the rate estimate and sample history. Calibration (flag and
    /// learned threshold) is retained.
    pub fn reset(&mut self) {
        self.bpm = 0;
        self.beat_count = 0;
        self.last_beat_ms = None;
        self.last_peak_ms = 0;
        self.in_beat = false;
        self.buffer = [0; BUFFER_LEN];
        self.buffer_index = 0;
        self.avg_signal = 0;
    }

    fn finish_calibration(&mut self, cal: &Calibration) {
        if cal.count == 0 {
            // Empty window: keep the previous threshold, stay uncalibrated.
            debug!("heart: calibration window saw no samples");
            return;
        }
        let mean = (cal.sum / cal.count as i64) as i32;
        self.avg_signal = mean;
        self.threshold = mean + CALIBRATION_MARGIN;
        self.calibrated = true;
        info!(
            "heart: calibration done, mean={} threshold={}",
            mean, self.threshold
        );
    }

    fn push_sample(&mut self, raw: i32) {
        self.buffer[self.buffer_index] = raw;
        self.buffer_index = (self.buffer_index + 1) % BUFFER_LEN;
        // Full recompute each sample; the window is tiny.
        let sum: i64 = self.buffer.iter().map(|&s| s as i64).sum();
        self.avg_signal = (sum / BUFFER_LEN as i64) as i32;
    }

    fn detect_beat(&mut self, raw: i32, now_ms: u64) -> BeatStatus {
        if raw > self.threshold && raw > self.avg_signal + PEAK_MARGIN {
            if !self.in_beat && now_ms.saturating_sub(self.last_peak_ms) > REFRACTORY_MS {
                self.in_beat = true;
                self.last_peak_ms = now_ms;
                return self.accept_peak(now_ms);
            }
        } else if raw < self.avg_signal {
            // Falling edge re-arms detection.
            self.in_beat = false;
        }
        BeatStatus::Quiet
    }

    fn accept_peak(&mut self, now_ms: u64) -> BeatStatus {
        let previous = self.last_beat_ms.replace(now_ms);

        if !self.calibrated {
            return BeatStatus::NotCalibrated;
        }
        let Some(prev_ms) = previous else {
            // First beat after calibration: no interval to rate yet.
            return BeatStatus::Quiet;
        };

        let interval = now_ms - prev_ms;
        if interval <= MIN_INTERVAL_MS || interval >= MAX_INTERVAL_MS {
            debug!("heart: dropped beat with {}ms interval", interval);
            return BeatStatus::OutOfRange;
        }

        self.bpm = (60_000 / interval) as u16;
        self.beat_count += 1;
        BeatStatus::Accepted { bpm: self.bpm }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive a calibration window with a flat signal at `level`, then prime
    /// the sample buffer so the running average settles at the baseline.
    fn calibrate_flat(hrm: &mut HeartRateMonitor, level: i32, start_ms: u64) -> u64 {
        hrm.start_calibration(1000, start_ms);
        let mut now = start_ms;
        for _ in 0..100 {
            now += 10;
            hrm.sample(level, now);
        }
        assert!(hrm.is_calibrated(), "calibration should have finalized");
        for _ in 0..10 {
            now += 10;
            hrm.sample(level, now);
        }
        now
    }

    /// Emit one spike-and-recover pulse at `at_ms` and return its status.
    fn pulse(hrm: &mut HeartRateMonitor, baseline: i32, at_ms: u64) -> BeatStatus {
        let status = hrm.sample(baseline + 100, at_ms);
        // Falling edge below the running average re-arms the detector.
        hrm.sample(baseline - 60, at_ms + 10);
        hrm.sample(baseline - 60, at_ms + 20);
        status
    }

    #[test]
    fn test_calibration_sets_threshold_from_mean() {
        let mut hrm = HeartRateMonitor::new(530);
        calibrate_flat(&mut hrm, 500, 0);
        assert_eq!(hrm.threshold, 530);
        assert!(hrm.is_calibrated());
        assert!(!hrm.is_calibrating());
    }

    #[test]
    fn test_empty_calibration_window_keeps_state() {
        let mut hrm = HeartRateMonitor::new(530);
        hrm.start_calibration(100, 0);
        // First sample already past the deadline: window saw nothing.
        hrm.sample(500, 200);
        assert!(!hrm.is_calibrated());
        assert_eq!(hrm.threshold, 530);
    }

    #[test]
    fn test_steady_pulses_yield_bpm() {
        let mut hrm = HeartRateMonitor::new(530);
        let mut now = calibrate_flat(&mut hrm, 500, 0);

        // 800ms beat spacing = 75 BPM.
        let mut statuses = Vec::new();
        for _ in 0..4 {
            now += 800;
            statuses.push(pulse(&mut hrm, 500, now));
        }
        assert_eq!(statuses[0], BeatStatus::Quiet); // first beat, no interval
        assert_eq!(statuses[1], BeatStatus::Accepted { bpm: 75 });
        assert_eq!(hrm.bpm(), 75);
        assert_eq!(hrm.beat_count(), 3);
        assert!(hrm.is_valid_reading());
    }

    #[test]
    fn test_refractory_blocks_close_peaks() {
        let mut hrm = HeartRateMonitor::new(530);
        let now = calibrate_flat(&mut hrm, 500, 0);

        pulse(&mut hrm, 500, now + 800);
        pulse(&mut hrm, 500, now + 1600);
        let count = hrm.beat_count();

        // A re-armed peak only 100ms later is inside the refractory window.
        let status = pulse(&mut hrm, 500, now + 1700);
        assert_eq!(status, BeatStatus::Quiet);
        assert_eq!(hrm.beat_count(), count);
    }

    #[test]
    fn test_out_of_range_interval_leaves_bpm_unchanged() {
        let mut hrm = HeartRateMonitor::new(530);
        let now = calibrate_flat(&mut hrm, 500, 0);

        pulse(&mut hrm, 500, now + 1000);
        pulse(&mut hrm, 500, now + 2000); // 60 BPM baseline
        assert_eq!(hrm.bpm(), 60);

        // 3000ms gap is too slow: status reported, estimate untouched.
        let status = pulse(&mut hrm, 500, now + 5000);
        assert_eq!(status, BeatStatus::OutOfRange);
        assert_eq!(hrm.bpm(), 60);
    }

    #[test]
    fn test_uncalibrated_peaks_report_not_calibrated() {
        let mut hrm = HeartRateMonitor::new(530);
        // Settle the average near zero, then spike over the threshold.
        for i in 0..10 {
            hrm.sample(0, i * 10);
        }
        let status = hrm.sample(600, 1000);
        assert_eq!(status, BeatStatus::NotCalibrated);
        assert_eq!(hrm.bpm(), 0);
        assert!(!hrm.is_valid_reading());
    }

    #[test]
    fn test_in_beat_flag_requires_falling_edge() {
        let mut hrm = HeartRateMonitor::new(530);
        let now = calibrate_flat(&mut hrm, 500, 0);

        // Spike and hold: the first peak is accepted (no interval yet), but
        // without a falling edge the detector stays armed-off.
        assert_eq!(hrm.sample(600, now + 800), BeatStatus::Quiet);
        let status = hrm.sample(600, now + 1600);
        assert_eq!(status, BeatStatus::Quiet);
        assert_eq!(hrm.beat_count(), 0);
    }

    #[test]
    fn test_reset_preserves_calibration() {
        let mut hrm = HeartRateMonitor::new(530);
        let now = calibrate_flat(&mut hrm, 500, 0);
        pulse(&mut hrm, 500, now + 800);
        pulse(&mut hrm, 500, now + 1600);
        assert!(hrm.bpm() > 0);

        hrm.reset();
        assert_eq!(hrm.bpm(), 0);
        assert_eq!(hrm.beat_count(), 0);
        assert!(hrm.is_calibrated());
        assert_eq!(hrm.threshold, 530);
    }
}
