//! Incremental NMEA position decoding.
//!
//! Consumes a GPS byte stream one byte at a time, assembles newline-terminated
//! sentences, and extracts validated fixes from GGA sentences. Only the two
//! GGA talker prefixes are recognized; every other sentence type is ignored.
//! A fix that is not refreshed within the staleness window is invalidated.

use tracing::{debug, trace};

use crate::types::CoordinateFix;

/// A fix older than this is no longer trusted.
const STALE_FIX_MS: u64 = 10_000;

/// Sentences longer than this are garbage; the buffer is capped and the
/// line rejected at its terminator.
const MAX_SENTENCE_LEN: usize = 120;

/// Result of a completed sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentenceStatus {
    /// A recognized sentence produced a new valid fix.
    Updated,
    /// A recognized sentence reported fix quality 0 (no satellite solution).
    NoFix,
    /// A recognized sentence was structurally unusable or out of range.
    ParseError,
    /// An unrecognized sentence type; not an error.
    Ignored,
}

/// Freshness of the current fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FixStatus {
    /// A fix exists and is within the staleness window.
    Valid,
    /// A fix was received once but has gone stale.
    Stale,
    /// No fix has ever been received.
    NoFix,
}

/// Streaming NMEA decoder with staleness tracking.
#[derive(Debug)]
pub struct PositionDecoder {
    line: String,
    overflowed: bool,
    fix: CoordinateFix,
    /// Time of the last committed fix. `None` until the first sentence
    /// parses, so a freshly started device is never reported stale.
    fix_at_ms: Option<u64>,
}

impl PositionDecoder {
    pub fn new() -> Self {
        Self {
            line: String::new(),
            overflowed: false,
            fix: CoordinateFix::default(),
            fix_at_ms: None,
        }
    }

    /// Feed one byte from the GPS stream. Returns a status only when a line
    /// terminator completes a sentence; carriage returns are dropped.
    pub fn feed(&mut self, byte: u8, now_ms: u64) -> Option<SentenceStatus> {
        match byte {
            b'\n' => {
                let status = if self.overflowed {
                    SentenceStatus::ParseError
                } else {
                    self.parse_sentence(now_ms)
                };
                self.line.clear();
                self.overflowed = false;
                Some(status)
            }
            b'\r' => None,
            _ => {
                if self.line.len() >= MAX_SENTENCE_LEN {
                    self.overflowed = true;
                } else {
                    self.line.push(byte as char);
                }
                None
            }
        }
    }

    /// Staleness check, run independently of parse events.
    pub fn tick(&mut self, now_ms: u64) {
        if let Some(at) = self.fix_at_ms {
            if self.fix.valid && now_ms.saturating_sub(at) > STALE_FIX_MS {
                debug!("gps: fix went stale");
                self.fix.valid = false;
            }
        }
    }

    /// Snapshot of the current fix.
    pub fn location(&self) -> CoordinateFix {
        self.fix
    }

    pub fn fix_status(&self, now_ms: u64) -> FixStatus {
        match self.fix_at_ms {
            None => FixStatus::NoFix,
            Some(at) if now_ms.saturating_sub(at) > STALE_FIX_MS => FixStatus::Stale,
            Some(_) if !self.fix.valid => FixStatus::Stale,
            Some(_) => FixStatus::Valid,
        }
    }

    fn parse_sentence(&mut self, now_ms: u64) -> SentenceStatus {
        let line = self.line.as_str();
        if !line.starts_with("$GPGGA") && !line.starts_with("$GNGGA") {
            trace!("gps: ignoring sentence {:?}", line.split(',').next());
            return SentenceStatus::Ignored;
        }

        // $GPGGA,time,lat,N/S,lon,E/W,quality,sats,hdop,alt,...
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 7 {
            return SentenceStatus::ParseError;
        }

        let quality: u32 = fields[6].parse().unwrap_or(0);
        if quality == 0 {
            return SentenceStatus::NoFix;
        }

        let (Some(lat), Some(lon)) = (
            degrees_minutes_to_decimal(fields[2]),
            degrees_minutes_to_decimal(fields[4]),
        ) else {
            return SentenceStatus::ParseError;
        };

        let lat = if fields[3] == "S" { -lat } else { lat };
        let lon = if fields[5] == "W" { -lon } else { lon };

        if !CoordinateFix::in_bounds(lat, lon) {
            return SentenceStatus::ParseError;
        }

        self.fix = CoordinateFix {
            latitude: lat,
            longitude: lon,
            valid: true,
        };
        self.fix_at_ms = Some(now_ms);
        debug!("gps: fix updated to {:.6}, {:.6}", lat, lon);
        SentenceStatus::Updated
    }
}

impl Default for PositionDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert an NMEA DDMM.MMMM coordinate to decimal degrees. The two digits
/// before the decimal point are minutes; everything earlier is degrees.
fn degrees_minutes_to_decimal(coordinate: &str) -> Option<f64> {
    let dot = coordinate.find('.')?;
    if dot < 2 {
        return None;
    }
    let degrees: f64 = coordinate[..dot - 2].parse().ok()?;
    let minutes: f64 = coordinate[dot - 2..].parse().ok()?;
    Some(degrees + minutes / 60.0)
}
