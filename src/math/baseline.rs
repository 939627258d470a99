//! Baseline (DC offset) estimation and jitter correction.

use crate::FULL_SCALE_MV;

/// Outcome of a baseline correction attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BaselineOutcome {
    /// Baseline estimated and subtracted from every sample.
    Corrected(f64),
    /// The estimate deviated from the reference by more than the
    /// configured fraction of full scale and rejection is enabled; the
    /// trace is left untouched.
    Rejected(f64),
}

/// Estimate the baseline as the mean over `region_width` cells starting
/// at `start_cell` and subtract it, unless the limit test rejects.
///
/// The limit test compares `|mean − reference|` against
/// `limit_percent` of the ±500 mV full scale.
pub fn correct(
    v: &mut [f32],
    start_cell: usize,
    region_width: usize,
    reference_mv: f64,
    limit_percent: f64,
    reject_on_limit: bool,
) -> BaselineOutcome {
    let start = start_cell.min(v.len());
    let end = (start + region_width).min(v.len());
    let width = end - start;
    if width == 0 {
        return BaselineOutcome::Corrected(0.0);
    }

    let mut mean = 0.0f64;
    for &s in &v[start..end] {
        mean += f64::from(s);
    }
    mean /= width as f64;

    let exceeded = (mean - reference_mv).abs() / FULL_SCALE_MV > limit_percent * 0.01;
    if reject_on_limit && exceeded {
        return BaselineOutcome::Rejected(mean);
    }

    for s in v.iter_mut() {
        *s -= mean as f32;
    }
    BaselineOutcome::Corrected(mean)
}
