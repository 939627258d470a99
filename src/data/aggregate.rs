//! Run-lifetime aggregators: spectra, scatter buffers and incremental
//! statistics.
//!
//! Everything in here is written only by the serial merge step; the UI
//! reads copies through the engine's snapshot accessors.

use serde::{Deserialize, Serialize};

use crate::data::settings::Settings;
use crate::pipeline::pair::PairOutput;
use crate::pipeline::RejectReason;
use crate::{AREA_SCATTER_CAP, TRACE_CELLS};

/// A binned spectrum of non-negative counts with total and display
/// maximum bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram {
    counts: Vec<u32>,
    total: u64,
    max_y: u32,
}

impl Histogram {
    pub fn new(bins: usize) -> Self {
        Self {
            counts: vec![0; bins],
            total: 0,
            max_y: 0,
        }
    }

    /// Increment `bin`; out-of-range indices are dropped silently (the
    /// pipeline only emits validated bins, this is the last line of
    /// defense for geometry changes mid-run).
    pub fn increment(&mut self, bin: usize) {
        if let Some(c) = self.counts.get_mut(bin) {
            *c += 1;
            self.total += 1;
            if *c > self.max_y {
                self.max_y = *c;
            }
        }
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn max_y(&self) -> u32 {
        self.max_y
    }

    pub fn reset(&mut self) {
        self.counts.fill(0);
        self.total = 0;
        self.max_y = 0;
    }
}

/// Circular buffer of recent `(phs_bin, area·binning)` scatter points.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AreaScatter {
    points: Vec<(u32, f64)>,
    cursor: usize,
}

impl AreaScatter {
    pub fn push(&mut self, phs_bin: u32, area_scaled: f64) {
        if self.points.len() < AREA_SCATTER_CAP {
            self.points.push((phs_bin, area_scaled));
        } else {
            self.points[self.cursor] = (phs_bin, area_scaled);
        }
        self.cursor = (self.cursor + 1) % AREA_SCATTER_CAP;
    }

    pub fn points(&self) -> &[(u32, f64)] {
        &self.points
    }

    pub fn reset(&mut self) {
        self.points.clear();
        self.cursor = 0;
    }
}

/// Per-PHS-bin incremental `(mean, stddev)` of accepted pulse areas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaStats {
    mean: Vec<f64>,
    stddev: Vec<f64>,
    n: Vec<u32>,
    accepted: u64,
}

impl AreaStats {
    pub fn new() -> Self {
        Self {
            mean: vec![0.0; TRACE_CELLS],
            stddev: vec![0.0; TRACE_CELLS],
            n: vec![0; TRACE_CELLS],
            accepted: 0,
        }
    }

    /// Fold one accepted `(phs_bin, area)` sample into the running
    /// mean and standard deviation of its bin.
    pub fn record(&mut self, phs_bin: usize, area: f64) {
        if phs_bin >= self.n.len() {
            return;
        }
        let n0 = self.n[phs_bin];
        let n1 = n0 + 1;
        let mean = self.mean[phs_bin];
        let stddev = self.stddev[phs_bin];

        self.stddev[phs_bin] = if n1 >= 2 {
            let var = (f64::from(n1 - 2) / f64::from(n1 - 1)) * stddev * stddev
                + (area - mean) * (area - mean) / f64::from(n1);
            var.sqrt()
        } else {
            0.0
        };
        self.mean[phs_bin] = (area + f64::from(n0) * mean) / f64::from(n1);
        self.n[phs_bin] = n1;
        self.accepted += 1;
    }

    pub fn bin(&self, phs_bin: usize) -> Option<(f64, f64, u32)> {
        if phs_bin < self.n.len() {
            Some((self.mean[phs_bin], self.stddev[phs_bin], self.n[phs_bin]))
        } else {
            None
        }
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn reset(&mut self) {
        self.mean.fill(0.0);
        self.stddev.fill(0.0);
        self.n.fill(0);
        self.accepted = 0;
    }
}

impl Default for AreaStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters of per-pair rejections, by reason.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RejectCounters {
    counts: [u64; RejectReason::VARIANTS],
    total: u64,
}

impl RejectCounters {
    pub fn record(&mut self, reason: RejectReason) {
        self.counts[reason as usize] += 1;
        self.total += 1;
    }

    pub fn count(&self, reason: RejectReason) -> u64 {
        self.counts[reason as usize]
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn reset(&mut self) {
        self.counts = [0; RejectReason::VARIANTS];
        self.total = 0;
    }
}

/// All run-lifetime aggregation state.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregates {
    pub phs_a: Histogram,
    pub phs_b: Histogram,
    pub ab: Histogram,
    pub ba: Histogram,
    pub prompt: Histogram,
    pub merged: Histogram,
    pub rise_a: Histogram,
    pub rise_b: Histogram,
    pub area_scatter_a: AreaScatter,
    pub area_scatter_b: AreaScatter,
    pub area_stats_a: AreaStats,
    pub area_stats_b: AreaStats,
    /// Normalized, time-shifted traces of the most recent accepted
    /// lifetime event.
    pub persistence_a: Vec<(f64, f64)>,
    pub persistence_b: Vec<(f64, f64)>,
    pub rejects: RejectCounters,
    /// Pairs that survived acquisition (fed into the pipeline).
    pub pairs_processed: u64,
}

impl Aggregates {
    pub fn new(cfg: &Settings) -> Self {
        Self {
            phs_a: Histogram::new(TRACE_CELLS),
            phs_b: Histogram::new(TRACE_CELLS),
            ab: Histogram::new(cfg.spectrum_ab.channel_count),
            ba: Histogram::new(cfg.spectrum_ba.channel_count),
            prompt: Histogram::new(cfg.spectrum_prompt.channel_count),
            merged: Histogram::new(cfg.spectrum_merged.channel_count),
            rise_a: Histogram::new(cfg.rise_a.binning),
            rise_b: Histogram::new(cfg.rise_b.binning),
            area_scatter_a: AreaScatter::default(),
            area_scatter_b: AreaScatter::default(),
            area_stats_a: AreaStats::new(),
            area_stats_b: AreaStats::new(),
            persistence_a: Vec::new(),
            persistence_b: Vec::new(),
            rejects: RejectCounters::default(),
            pairs_processed: 0,
        }
    }

    /// Fold one per-pair result into the live aggregates. Runs serially
    /// on the producer thread.
    pub fn merge(&mut self, out: &PairOutput) {
        self.pairs_processed += 1;

        if let Some(bin) = out.phs_a {
            self.phs_a.increment(bin);
        }
        if let Some(bin) = out.phs_b {
            self.phs_b.increment(bin);
        }
        if let Some(bin) = out.ab {
            self.ab.increment(bin);
        }
        if let Some(bin) = out.ba {
            self.ba.increment(bin);
        }
        if let Some(bin) = out.prompt {
            self.prompt.increment(bin);
        }
        if let Some(bin) = out.merged {
            self.merged.increment(bin);
        }
        if let Some(bin) = out.rise_bin_a {
            self.rise_a.increment(bin);
        }
        if let Some(bin) = out.rise_bin_b {
            self.rise_b.increment(bin);
        }

        if let Some((phs, scaled)) = out.area_point_a {
            self.area_scatter_a.push(phs, scaled);
        }
        if let Some((phs, scaled)) = out.area_point_b {
            self.area_scatter_b.push(phs, scaled);
        }
        if let Some((phs, area)) = out.area_accepted_a {
            self.area_stats_a.record(phs, area);
        }
        if let Some((phs, area)) = out.area_accepted_b {
            self.area_stats_b.record(phs, area);
        }

        if let Some(trace) = &out.persistence_a {
            self.persistence_a.clone_from(trace);
        }
        if let Some(trace) = &out.persistence_b {
            self.persistence_b.clone_from(trace);
        }

        if let Some(reason) = out.reject {
            self.rejects.record(reason);
        }
    }

    /// Clear every spectrum and statistic. Rate counters live in the
    /// scheduler and are reset independently.
    pub fn reset(&mut self) {
        self.phs_a.reset();
        self.phs_b.reset();
        self.ab.reset();
        self.ba.reset();
        self.prompt.reset();
        self.merged.reset();
        self.rise_a.reset();
        self.rise_b.reset();
        self.area_scatter_a.reset();
        self.area_scatter_b.reset();
        self.area_stats_a.reset();
        self.area_stats_b.reset();
        self.persistence_a.clear();
        self.persistence_b.clear();
        self.rejects.reset();
        self.pairs_processed = 0;
    }
}
