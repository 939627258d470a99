//! Sampled trace containers.

use crate::TRACE_CELLS;

/// One digitized sweep of a single channel: non-uniform cell times in
/// nanoseconds and cell voltages in millivolts, as delivered by the
/// sampling chip.
#[derive(Debug, Clone)]
pub struct Trace {
    pub t: Box<[f32; TRACE_CELLS]>,
    pub v: Box<[f32; TRACE_CELLS]>,
}

impl Default for Trace {
    fn default() -> Self {
        Self {
            t: Box::new([0.0; TRACE_CELLS]),
            v: Box::new([0.0; TRACE_CELLS]),
        }
    }
}

impl Trace {
    /// Fill the time axis with uniform cell spacing, `sweep_ns` over the
    /// full trace. Real hardware delivers calibrated non-uniform times;
    /// generators and tests use this.
    pub fn fill_uniform_time(&mut self, sweep_ns: f32) {
        let dt = sweep_ns / TRACE_CELLS as f32;
        for (i, t) in self.t.iter_mut().enumerate() {
            *t = i as f32 * dt;
        }
    }
}

/// A trigger-aligned pair of traces, one per detector channel.
#[derive(Debug, Clone, Default)]
pub struct RawPair {
    pub a: Trace,
    pub b: Trace,
}
