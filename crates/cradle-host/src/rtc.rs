use std::time::{SystemTime, UNIX_EPOCH};

/// Emulated frame rate, as a fraction: 33513982 / 560190 (~59.83 fps).
pub const FRAME_RATE_NUMERATOR: u64 = 33_513_982;
pub const FRAME_RATE_DENOMINATOR: u64 = 560_190;

/// Supplies the per-frame real-time-clock value.
///
/// In deterministic mode time is derived only from the emulated frame count, so a replay sees the
/// same clock on every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcClock {
    deterministic: bool,
    initial_time: i64,
    frames: u64,
}

impl RtcClock {
    pub fn new(deterministic: bool, initial_time: i64) -> Self {
        Self {
            deterministic,
            initial_time,
            frames: 0,
        }
    }

    pub fn is_deterministic(&self) -> bool {
        self.deterministic
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Clock value for the upcoming frame, in seconds since the unix epoch.
    pub fn now(&self) -> i64 {
        if self.deterministic {
            self.initial_time.saturating_add(self.emulated_seconds())
        } else {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .ok()
                .and_then(|d| i64::try_from(d.as_secs()).ok())
                .unwrap_or(self.initial_time)
        }
    }

    pub fn advance(&mut self) {
        self.frames = self.frames.wrapping_add(1);
    }

    pub fn restore(&mut self, frames: u64) {
        self.frames = frames;
    }

    fn emulated_seconds(&self) -> i64 {
        let secs = u128::from(self.frames) * u128::from(FRAME_RATE_DENOMINATOR)
            / u128::from(FRAME_RATE_NUMERATOR);
        i64::try_from(secs).unwrap_or(i64::MAX)
    }
}
