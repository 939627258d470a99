//! Acquisition-rate bookkeeping: current and time-averaged event rates
//! for the pulse pairs and every spectrum, recomputed on a fixed
//! wall-clock window.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Window length over which the current rates are computed.
pub const RATE_WINDOW: Duration = Duration::from_secs(4);

/// Current and running-average rate of one counter \[Hz\].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateStats {
    pub current_hz: f64,
    pub avg_hz: f64,
}

#[derive(Debug, Clone, Default)]
struct Meter {
    window: u64,
    summed: f64,
    intervals: u64,
    stats: RateStats,
}

impl Meter {
    fn add(&mut self, n: u64) {
        self.window += n;
    }

    fn roll(&mut self, secs: f64) {
        self.stats.current_hz = self.window as f64 / secs;
        self.summed += self.stats.current_hz;
        self.intervals += 1;
        self.stats.avg_hz = self.summed / self.intervals as f64;
        self.window = 0;
    }

    fn reset(&mut self) {
        *self = Meter::default();
    }
}

/// Rates of everything the engine counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateReport {
    pub pairs: RateStats,
    pub ab: RateStats,
    pub ba: RateStats,
    pub prompt: RateStats,
    pub merged: RateStats,
}

/// Monotonic-clock rate tracker driven by the producer loop.
#[derive(Debug, Clone)]
pub struct RateTracker {
    window_start: Instant,
    pairs: Meter,
    ab: Meter,
    ba: Meter,
    prompt: Meter,
    merged: Meter,
}

impl RateTracker {
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            pairs: Meter::default(),
            ab: Meter::default(),
            ba: Meter::default(),
            prompt: Meter::default(),
            merged: Meter::default(),
        }
    }

    pub fn count_pairs(&mut self, n: u64) {
        self.pairs.add(n);
    }

    pub fn count_spectra(&mut self, ab: u64, ba: u64, prompt: u64, merged: u64) {
        self.ab.add(ab);
        self.ba.add(ba);
        self.prompt.add(prompt);
        self.merged.add(merged);
    }

    /// Roll the window when it elapsed; returns `true` when new rates
    /// were published.
    pub fn maybe_roll(&mut self) -> bool {
        let elapsed = self.window_start.elapsed();
        if elapsed < RATE_WINDOW {
            return false;
        }
        let secs = elapsed.as_secs_f64();
        self.pairs.roll(secs);
        self.ab.roll(secs);
        self.ba.roll(secs);
        self.prompt.roll(secs);
        self.merged.roll(secs);
        self.window_start = Instant::now();
        true
    }

    pub fn report(&self) -> RateReport {
        RateReport {
            pairs: self.pairs.stats,
            ab: self.ab.stats,
            ba: self.ba.stats,
            prompt: self.prompt.stats,
            merged: self.merged.stats,
        }
    }

    /// Restart the averaging, e.g. at run start.
    pub fn reset(&mut self) {
        self.pairs.reset();
        self.ab.reset();
        self.ba.reset();
        self.prompt.reset();
        self.merged.reset();
        self.window_start = Instant::now();
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new()
    }
}
