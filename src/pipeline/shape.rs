//! Pulse-shape envelope: the learned `(mean, stddev)` band and the
//! recorder that builds it from accepted pulses.

use serde::{Deserialize, Serialize};

use crate::math::interpolate::{Interpolant, InterpolationKind};
use crate::{SHAPE_GRID_POINTS, SHAPE_LEFT_NS, SHAPE_REGION_NS, SHAPE_RIGHT_NS};

/// The fixed envelope evaluation grid over `[-200, +200)` ns.
pub fn envelope_grid() -> Vec<f64> {
    let incr = SHAPE_REGION_NS / SHAPE_GRID_POINTS as f64;
    (0..SHAPE_GRID_POINTS)
        .map(|i| SHAPE_LEFT_NS + i as f64 * incr)
        .collect()
}

/// Flat envelope traces as handed to workers and persisted by the host:
/// `(x, y)` arrays for the mean and standard-deviation traces on the
/// fixed grid. Kept as `f32` pairs for cheap copies into chunk
/// snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeEnvelopeData {
    pub mean_x: Vec<f32>,
    pub mean_y: Vec<f32>,
    pub stddev_x: Vec<f32>,
    pub stddev_y: Vec<f32>,
}

/// Worker-local envelope: cubic splines rebuilt from the flat traces,
/// evaluated by the shape filter.
#[derive(Debug, Clone)]
pub struct ShapeEnvelope {
    mean: Interpolant,
    stddev: Interpolant,
}

impl ShapeEnvelope {
    pub fn build(data: &ShapeEnvelopeData) -> Option<Self> {
        let mx: Vec<f64> = data.mean_x.iter().map(|&v| f64::from(v)).collect();
        let my: Vec<f64> = data.mean_y.iter().map(|&v| f64::from(v)).collect();
        let sx: Vec<f64> = data.stddev_x.iter().map(|&v| f64::from(v)).collect();
        let sy: Vec<f64> = data.stddev_y.iter().map(|&v| f64::from(v)).collect();
        let mean = Interpolant::build(InterpolationKind::CubicNatural, &mx, &my).ok()?;
        let stddev = Interpolant::build(InterpolationKind::CubicNatural, &sx, &sy).ok()?;
        Some(Self { mean, stddev })
    }

    /// Whether a normalized sample `(t, y)` lies inside
    /// `mean(t) − lower_frac·stddev(t) ..= mean(t) + upper_frac·stddev(t)`.
    pub fn is_inside(&self, t: f64, y: f64, lower_frac: f64, upper_frac: f64) -> bool {
        let mean = self.mean.eval(t);
        let dev = self.stddev.eval(t);
        let upper = mean + upper_frac * dev;
        let lower = mean - lower_frac * dev;
        y <= upper && y >= lower
    }
}

/// One accepted pulse captured for envelope learning: time-shifted to
/// its extremum, clipped to the envelope region, amplitude-normalized.
/// Points are in ascending time order; the spline is built by the
/// worker so the merge step only stores it.
#[derive(Debug, Clone)]
pub struct ShapeRecord {
    pub points: Vec<(f64, f64)>,
    pub spline: Interpolant,
}

impl ShapeRecord {
    /// Capture a record from a trace. `t_extr` and `y_extr` are the
    /// refined extremum time and amplitude. Returns `None` when fewer
    /// than four samples fall into the envelope region.
    pub fn capture(t: &[f32], v: &[f32], t_extr: f64, y_extr: f64) -> Option<Self> {
        let mut points = Vec::new();
        for j in 0..t.len() {
            let tr = f64::from(t[j]) - t_extr;
            if (SHAPE_LEFT_NS..=SHAPE_RIGHT_NS).contains(&tr) {
                points.push((tr, f64::from(v[j]) / y_extr));
            }
        }
        if points.len() < 4 {
            return None;
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        points.dedup_by(|a, b| a.0 == b.0);
        let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.1).collect();
        let spline = Interpolant::build(InterpolationKind::CubicNatural, &xs, &ys).ok()?;
        Some(Self { points, spline })
    }
}

/// Recording state machine for one channel. Absorbs accepted pulses of
/// the configured branch until the target count is reached, then the
/// envelope can be computed.
#[derive(Debug, Clone, Default)]
pub struct ShapeRecorder {
    target: usize,
    splines: Vec<Interpolant>,
    /// Normalized sample pool for display, in alternating traversal
    /// order to balance the sweep density.
    scatter: Vec<(f64, f64)>,
    recording: bool,
}

impl ShapeRecorder {
    /// Begin recording `target` accepted pulses. Any previous pool is
    /// discarded.
    pub fn start(&mut self, target: usize) {
        self.target = target.max(1);
        self.splines.clear();
        self.scatter.clear();
        self.recording = true;
    }

    pub fn stop(&mut self) {
        self.recording = false;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Recording progress in percent.
    pub fn progress(&self) -> u32 {
        if self.target == 0 {
            return 0;
        }
        (100.0 * self.splines.len() as f64 / self.target as f64).min(100.0) as u32
    }

    pub fn collected(&self) -> usize {
        self.splines.len()
    }

    /// Fold one worker-captured record into the pool. Called from the
    /// serial merge step. Returns `true` when this record completed the
    /// recording.
    pub fn absorb(&mut self, record: &ShapeRecord) -> bool {
        if !self.recording {
            return false;
        }
        // alternate traversal direction on successive pulses
        if self.splines.len() % 2 == 0 {
            self.scatter.extend(record.points.iter().copied());
        } else {
            self.scatter.extend(record.points.iter().rev().copied());
        }
        self.splines.push(record.spline.clone());

        if self.splines.len() >= self.target {
            self.recording = false;
            return true;
        }
        false
    }

    pub fn scatter(&self) -> &[(f64, f64)] {
        &self.scatter
    }

    /// Evaluate the pooled splines on the fixed grid and produce the
    /// `(mean, stddev)` envelope traces. `None` until at least one
    /// pulse was recorded.
    pub fn build_envelope(&self) -> Option<ShapeEnvelopeData> {
        if self.splines.is_empty() {
            return None;
        }
        let grid = envelope_grid();
        let n = self.splines.len() as f64;

        let mut mean = vec![0.0f64; SHAPE_GRID_POINTS];
        for s in &self.splines {
            for (m, &t) in mean.iter_mut().zip(&grid) {
                *m += s.eval(t);
            }
        }
        for m in mean.iter_mut() {
            *m /= n;
        }

        let mut var = vec![0.0f64; SHAPE_GRID_POINTS];
        for s in &self.splines {
            for (i, &t) in grid.iter().enumerate() {
                let d = s.eval(t) - mean[i];
                var[i] += d * d;
            }
        }

        let xs: Vec<f32> = grid.iter().map(|&t| t as f32).collect();
        Some(ShapeEnvelopeData {
            mean_x: xs.clone(),
            mean_y: mean.iter().map(|&m| m as f32).collect(),
            stddev_x: xs,
            stddev_y: var.iter().map(|&v| (v / n).sqrt() as f32).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian_record(sigma: f64, amp: f64) -> ShapeRecord {
        let n = 400;
        let mut t = vec![0.0f32; n];
        let mut v = vec![0.0f32; n];
        for i in 0..n {
            let ti = -40.0 + i as f64 * 0.2;
            t[i] = ti as f32;
            v[i] = (amp * (-ti * ti / (2.0 * sigma * sigma)).exp()) as f32;
        }
        ShapeRecord::capture(&t, &v, 0.0, amp).unwrap()
    }

    #[test]
    fn test_capture_normalizes_peak_to_one() {
        let rec = gaussian_record(2.0, -310.0);
        let peak = rec
            .points
            .iter()
            .map(|p| p.1)
            .fold(f64::NEG_INFINITY, f64::max);
        assert!((peak - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_identical_pulses_give_zero_stddev() {
        let mut rec = ShapeRecorder::default();
        rec.start(8);
        for _ in 0..8 {
            rec.absorb(&gaussian_record(1.5, 280.0));
        }
        assert!(!rec.is_recording());
        let env = rec.build_envelope().unwrap();
        // inside the sampled region the envelope width must vanish
        for (i, &x) in env.stddev_x.iter().enumerate() {
            if (-30.0..=30.0).contains(&x) {
                assert!(
                    env.stddev_y[i].abs() < 1e-4,
                    "stddev {} at t={}",
                    env.stddev_y[i],
                    x
                );
            }
        }
    }

    #[test]
    fn test_recorder_stops_at_target() {
        let mut rec = ShapeRecorder::default();
        rec.start(3);
        assert!(rec.is_recording());
        assert!(!rec.absorb(&gaussian_record(1.0, 100.0)));
        assert!(!rec.absorb(&gaussian_record(1.0, 100.0)));
        assert!(rec.absorb(&gaussian_record(1.0, 100.0)));
        assert!(!rec.is_recording());
        assert_eq!(rec.collected(), 3);
        assert_eq!(rec.progress(), 100);
        // further records are ignored
        assert!(!rec.absorb(&gaussian_record(1.0, 100.0)));
        assert_eq!(rec.collected(), 3);
    }

    /// Gaussian pulse with a small deterministic ripple so the learned
    /// band has finite width.
    fn jittered_record(k: u64, sigma: f64, amp: f64) -> ShapeRecord {
        let n = 400;
        let mut t = vec![0.0f32; n];
        let mut v = vec![0.0f32; n];
        let mut state = k.wrapping_mul(6364136223846793005).wrapping_add(1);
        for i in 0..n {
            let ti = -40.0 + i as f64 * 0.2;
            t[i] = ti as f32;
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let noise = ((state >> 33) as f64 / (1u64 << 31) as f64 - 0.5) * 0.6;
            v[i] = (amp * (-ti * ti / (2.0 * sigma * sigma)).exp() + noise) as f32;
        }
        ShapeRecord::capture(&t, &v, 0.0, amp).unwrap()
    }

    #[test]
    fn test_envelope_roundtrip_bounds_test() {
        let mut rec = ShapeRecorder::default();
        rec.start(8);
        for k in 0..8 {
            rec.absorb(&jittered_record(k, 2.0, 120.0));
        }
        let data = rec.build_envelope().unwrap();
        let env = ShapeEnvelope::build(&data).unwrap();

        // probe at the grid node closest to the pulse peak: the mean
        // trace itself lies inside the band, a collapsed pulse outside
        let i = SHAPE_GRID_POINTS / 2;
        let t = f64::from(data.mean_x[i]);
        let mean = f64::from(data.mean_y[i]);
        assert!((mean - 1.0).abs() < 0.05, "peak mean {mean}");
        assert!(env.is_inside(t, mean, 3.0, 3.0));
        assert!(!env.is_inside(t, mean - 0.8, 3.0, 3.0));
    }
}
