//! Pulse feature filters: area acceptance band, rise-time window and
//! the pulse-shape envelope test.

use crate::data::settings::{AreaFilterChannel, RiseTimeChannel, ShapeFilterChannel};
use crate::pipeline::shape::ShapeEnvelope;
use crate::TRACE_CELLS;

/// Normalize a raw trapezoidal pulse area so the acceptance band lines
/// are dimensionless: the per-channel gain times the ROI-width scale
/// `5120·(cellWidth/1024)`.
pub fn normalize_area(area_raw: f64, norm: f64, cell_width: usize) -> f64 {
    area_raw / (norm * 5120.0 * (cell_width as f64 / TRACE_CELLS as f64))
}

/// Whether `(phs_bin, area·binning)` lies between the lower and upper
/// band lines of the channel.
pub fn area_band_accepts(cfg: &AreaFilterChannel, phs_bin: i64, area: f64) -> bool {
    let x = phs_bin as f64;
    let scaled = area * f64::from(cfg.binning);
    let lower = cfg.slope_lower * x + cfg.intercept_lower;
    let upper = cfg.slope_upper * x + cfg.intercept_upper;
    scaled >= lower && scaled <= upper
}

/// Rise-time spectrum bin for `(t90 − t10)`, `None` outside the
/// spectrum range.
pub fn rise_time_bin(cfg: &RiseTimeChannel, t_10: f64, t_90: f64) -> Option<usize> {
    let bin = (cfg.binning as f64 * (t_90 - t_10) / cfg.scale_ns) as i64;
    if bin >= 0 && (bin as usize) < cfg.binning {
        Some(bin as usize)
    } else {
        None
    }
}

/// Rise-time acceptance window, inclusive.
pub fn rise_window_accepts(cfg: &RiseTimeChannel, bin: usize) -> bool {
    bin >= cfg.left_window && bin <= cfg.right_window
}

/// Apply the pulse-shape envelope test to a whole trace: every sample
/// whose extremum-relative time falls into the configured ROI must lie
/// inside the band. A single violation rejects the channel.
pub fn shape_accepts(
    env: &ShapeEnvelope,
    cfg: &ShapeFilterChannel,
    t: &[f32],
    v: &[f32],
    t_extr: f64,
    y_extr: f64,
) -> bool {
    let inv = 1.0 / y_extr;
    for j in 0..t.len() {
        let tr = f64::from(t[j]) - t_extr;
        if tr < -cfg.left_ns || tr > cfg.right_ns {
            continue;
        }
        let y = f64::from(v[j]) * inv;
        if !env.is_inside(tr, y, cfg.lower_frac, cfg.upper_frac) {
            return false;
        }
    }
    true
}
