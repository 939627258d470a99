//! Constant-fraction discriminator: extremum location, level
//! bracketing on the matching edge, and interpolated crossing
//! refinement.

use crate::math::interpolate::Interpolant;
use crate::pipeline::RejectReason;
use crate::FULL_SCALE_MV;

/// Slope threshold selecting the rising (positive polarity) or falling
/// (negative polarity) edge.
const SLOPE_EPS: f64 = 1e-6;

/// Minimum cell distance between the extremum and the ROI start; a
/// closer extremum has too little pre-pulse context.
const MIN_PRE_PULSE_CELLS: usize = 15;

/// Relative float equality as used throughout the level tests.
/// Comparing against an exact zero degenerates to exact equality.
fn fuzzy_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-5 * a.abs().min(b.abs())
}

/// Result of one reverse sweep over the region of interest.
#[derive(Debug, Clone)]
pub struct ChannelScan {
    pub y_min: f64,
    pub y_max: f64,
    pub cell_min: Option<usize>,
    pub cell_max: Option<usize>,
    /// Un-normalized trapezoidal pulse area over the ROI.
    pub area_raw: f64,
    /// CF levels derived from the raw extremum.
    pub level_main: f64,
    pub level_10: f64,
    pub level_90: f64,
    pub bracket_main: Option<(usize, usize)>,
    /// Bracket candidates seen for the main level on the selected edge.
    pub bracket_count: usize,
    pub bracket_10: Option<(usize, usize)>,
    pub bracket_90: Option<(usize, usize)>,
    slope_nonfinite: bool,
}

impl ChannelScan {
    /// Cell index of the polarity-matching extremum.
    pub fn extremum_cell(&self, positive: bool) -> Option<usize> {
        if positive {
            self.cell_max
        } else {
            self.cell_min
        }
    }

    /// Amplitude of the polarity-matching extremum.
    pub fn extremum(&self, positive: bool) -> f64 {
        if positive {
            self.y_max
        } else {
            self.y_min
        }
    }
}

/// Sweep the ROI from the last cell backwards, tracking both extrema,
/// the pulse area and the CF level brackets on the selected edge.
///
/// The reverse direction means the rising-edge brackets are located
/// once the extremum, and therefore its CF levels, are final; ties
/// between equal extremum samples resolve to the earliest cell.
pub fn scan_channel(
    t: &[f32],
    v: &[f32],
    start_cell: usize,
    stop_cell: usize,
    positive: bool,
    cfd_fraction: f64,
    accumulate_area: bool,
) -> ChannelScan {
    let mut scan = ChannelScan {
        y_min: FULL_SCALE_MV,
        y_max: -FULL_SCALE_MV,
        cell_min: None,
        cell_max: None,
        area_raw: 0.0,
        level_main: 0.0,
        level_10: 0.0,
        level_90: 0.0,
        bracket_main: None,
        bracket_count: 0,
        bracket_10: None,
        bracket_90: None,
        slope_nonfinite: false,
    };

    for a in (start_cell..stop_cell).rev() {
        let va = f64::from(v[a]);

        if va >= scan.y_max {
            scan.y_max = va;
            scan.cell_max = Some(a);
            if positive {
                scan.level_main = cfd_fraction * scan.y_max;
                scan.level_10 = 0.10 * scan.y_max;
                scan.level_90 = 0.90 * scan.y_max;
                scan.bracket_count = 0;
            }
        }
        if va <= scan.y_min {
            scan.y_min = va;
            scan.cell_min = Some(a);
            if !positive {
                scan.level_main = cfd_fraction * scan.y_min;
                scan.level_10 = 0.10 * scan.y_min;
                scan.level_90 = 0.90 * scan.y_min;
                scan.bracket_count = 0;
            }
        }

        if a < start_cell + 1 {
            continue;
        }
        let prev = a - 1;
        let vp = f64::from(v[prev]);
        let dt = f64::from(t[a]) - f64::from(t[prev]);

        if accumulate_area {
            scan.area_raw += ((vp + 0.5 * (va - vp)) * dt).abs();
        }

        let slope = (va - vp) / dt;
        if !slope.is_finite() {
            scan.slope_nonfinite = true;
        }
        let on_edge = if positive {
            slope > SLOPE_EPS
        } else {
            slope < -SLOPE_EPS
        };
        if !on_edge {
            continue;
        }

        let straddles = |level: f64| {
            if positive {
                va > level && vp < level
            } else {
                va < level && vp > level
            }
        };

        if straddles(scan.level_main) {
            scan.bracket_main = Some((prev, a));
            scan.bracket_count += 1;
        } else if fuzzy_eq(va, scan.level_main) {
            scan.bracket_main = Some((a, a));
            scan.bracket_count += 1;
        } else if fuzzy_eq(vp, scan.level_main) {
            scan.bracket_main = Some((prev, prev));
            scan.bracket_count += 1;
        }

        if straddles(scan.level_10) {
            scan.bracket_10 = Some((prev, a));
        } else if fuzzy_eq(va, scan.level_10) {
            scan.bracket_10 = Some((a, a));
        } else if fuzzy_eq(vp, scan.level_10) {
            scan.bracket_10 = Some((prev, prev));
        }

        if straddles(scan.level_90) {
            scan.bracket_90 = Some((prev, a));
        } else if fuzzy_eq(va, scan.level_90) {
            scan.bracket_90 = Some((a, a));
        } else if fuzzy_eq(vp, scan.level_90) {
            scan.bracket_90 = Some((prev, prev));
        }
    }

    scan
}

/// Light-weight validity checks on the raw scan before any
/// interpolation work is spent on the pair.
pub fn validate_scan(
    scan: &ChannelScan,
    v: &[f32],
    start_cell: usize,
    stop_cell: usize,
    positive: bool,
) -> Result<(), RejectReason> {
    let (cell_min, cell_max) = match (scan.cell_min, scan.cell_max) {
        (Some(lo), Some(hi)) => (lo, hi),
        _ => return Err(RejectReason::ExtremumUnresolvable),
    };
    if fuzzy_eq(scan.y_min, scan.y_max) || (scan.y_min as i32) == (scan.y_max as i32) {
        return Err(RejectReason::ExtremumUnresolvable);
    }
    if scan.slope_nonfinite {
        return Err(RejectReason::ExtremumUnresolvable);
    }

    if positive {
        if scan.y_min.abs() > scan.y_max.abs() {
            return Err(RejectReason::PolarityMismatch);
        }
    } else if scan.y_min.abs() < scan.y_max.abs() {
        return Err(RejectReason::PolarityMismatch);
    }

    let cell_extr = if positive { cell_max } else { cell_min };
    if cell_extr.saturating_sub(start_cell) <= MIN_PRE_PULSE_CELLS {
        return Err(RejectReason::ExtremumUnresolvable);
    }

    let y_extr = scan.extremum(positive);
    if fuzzy_eq(f64::from(v[stop_cell - 1]), y_extr) || fuzzy_eq(f64::from(v[start_cell]), y_extr)
    {
        return Err(RejectReason::ExtremumUnresolvable);
    }

    if scan.bracket_count != 1 || scan.bracket_main.is_none() {
        return Err(RejectReason::CfdBracketAmbiguous);
    }
    Ok(())
}

/// Validity of a CF level against the (refined) extremum.
pub fn validate_level(level: f64, y_extr: f64, positive: bool) -> Result<(), RejectReason> {
    let bad = if positive {
        level > FULL_SCALE_MV || level < 0.0
    } else {
        level < -FULL_SCALE_MV || level > 0.0
    };
    if bad || level == 0.0 || (level as i32) == (y_extr as i32) {
        return Err(RejectReason::CfdLevelInvalid);
    }
    Ok(())
}

/// Re-evaluate the interpolant between the two cells adjacent to the
/// raw extremum and return the refined `(time, amplitude)`. The
/// refined amplitude never shrinks below the raw sample. `None` when
/// the adjacency leaves the trace.
pub fn refine_extremum(
    interp: &Interpolant,
    t: &[f32],
    cell_extr: usize,
    y_extr_raw: f64,
    positive: bool,
    intra: usize,
) -> Option<(f64, f64)> {
    if cell_extr == 0 || cell_extr + 1 >= t.len() {
        return None;
    }
    let t0 = f64::from(t[cell_extr - 1]);
    let t1 = f64::from(t[cell_extr + 1]);
    let incr = (t1 - t0) / intra as f64;

    let mut t_extr = f64::from(t[cell_extr]);
    let mut y_extr = y_extr_raw;
    for i in 0..=intra {
        let tt = t0 + i as f64 * incr;
        let val = interp.eval(tt);
        if positive {
            if val > y_extr {
                y_extr = val;
                t_extr = tt;
            }
        } else if val < y_extr {
            y_extr = val;
            t_extr = tt;
        }
    }
    Some((t_extr, y_extr))
}

/// Locate the CF crossing inside a bracket by sub-sampling the
/// interpolant on `intra` subdivisions and solving the straddling
/// subinterval linearly.
pub fn interpolated_crossing(
    interp: &Interpolant,
    t: &[f32],
    bracket: (usize, usize),
    level: f64,
    intra: usize,
) -> Option<f64> {
    let (lo, hi) = bracket;
    if lo == hi {
        return Some(f64::from(t[lo]));
    }
    let t_lo = f64::from(t[lo]);
    let incr = (f64::from(t[hi]) - t_lo) / intra as f64;

    for i in 0..intra {
        let t1 = t_lo + i as f64 * incr;
        let t2 = t_lo + (i + 1) as f64 * incr;
        let y1 = interp.eval(t1);
        let y2 = interp.eval(t2);

        if (level < y1 && level > y2) || (level > y1 && level < y2) {
            let slope = (y2 - y1) / (t2 - t1);
            let intercept = y1 - slope * t1;
            return Some((level - intercept) / slope);
        } else if fuzzy_eq(level, y1) {
            return Some(t1);
        } else if fuzzy_eq(level, y2) {
            return Some(t2);
        }
    }
    None
}

/// Direct slope-intercept solve between the bracket samples, used by
/// the linear interpolation kind.
pub fn linear_crossing(t: &[f32], v: &[f32], bracket: (usize, usize), level: f64) -> Option<f64> {
    let (lo, hi) = bracket;
    if lo == hi {
        return Some(f64::from(t[lo]));
    }
    let (t1, t2) = (f64::from(t[lo]), f64::from(t[hi]));
    let (y1, y2) = (f64::from(v[lo]), f64::from(v[hi]));

    if (level < y1 && level > y2) || (level > y1 && level < y2) {
        let slope = (y2 - y1) / (t2 - t1);
        let intercept = y1 - slope * t1;
        Some((level - intercept) / slope)
    } else if fuzzy_eq(level, y1) {
        Some(t1)
    } else if fuzzy_eq(level, y2) {
        Some(t2)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::interpolate::{Interpolant, InterpolationKind};

    const N: usize = 1024;
    const DT: f32 = 0.1953;

    fn time_axis() -> Vec<f32> {
        (0..N).map(|i| i as f32 * DT).collect()
    }

    fn gaussian_pulse(center_cell: usize, amp: f32, sigma_ns: f32) -> Vec<f32> {
        let t0 = center_cell as f32 * DT;
        (0..N)
            .map(|i| {
                let d = i as f32 * DT - t0;
                amp * (-d * d / (2.0 * sigma_ns * sigma_ns)).exp()
            })
            .collect()
    }

    #[test]
    fn test_scan_locates_negative_extremum() {
        let t = time_axis();
        let v = gaussian_pulse(400, -300.0, 2.0);
        let scan = scan_channel(&t, &v, 0, N, false, 0.25, false);
        assert_eq!(scan.cell_min, Some(400));
        assert!((scan.y_min + 300.0).abs() < 1e-3);
        assert_eq!(scan.bracket_count, 1);
        assert!(validate_scan(&scan, &v, 0, N, false).is_ok());
        let (lo, hi) = scan.bracket_main.unwrap();
        assert!(hi < 400 && lo + 1 == hi);
    }

    #[test]
    fn test_polarity_mismatch_rejected() {
        let t = time_axis();
        let v = gaussian_pulse(400, -300.0, 2.0);
        let scan = scan_channel(&t, &v, 0, N, true, 0.25, false);
        assert_eq!(
            validate_scan(&scan, &v, 0, N, true),
            Err(RejectReason::PolarityMismatch)
        );
    }

    #[test]
    fn test_extremum_near_roi_start_rejected() {
        let t = time_axis();
        let v = gaussian_pulse(10, -300.0, 1.0);
        let scan = scan_channel(&t, &v, 0, N, false, 0.25, false);
        assert_eq!(
            validate_scan(&scan, &v, 0, N, false),
            Err(RejectReason::ExtremumUnresolvable)
        );
    }

    #[test]
    fn test_double_pulse_is_ambiguous() {
        let t = time_axis();
        // pile-up: a smaller pulse ahead of the dominant one crosses
        // the final CF level a second time
        let mut v = gaussian_pulse(300, -290.0, 2.0);
        let second = gaussian_pulse(600, -300.0, 2.0);
        for (a, b) in v.iter_mut().zip(&second) {
            *a += b;
        }
        let scan = scan_channel(&t, &v, 0, N, false, 0.25, false);
        assert_eq!(
            validate_scan(&scan, &v, 0, N, false),
            Err(RejectReason::CfdBracketAmbiguous)
        );
    }

    #[test]
    fn test_flat_trace_rejected() {
        let t = time_axis();
        let v = vec![0.0f32; N];
        let scan = scan_channel(&t, &v, 0, N, false, 0.25, false);
        assert!(validate_scan(&scan, &v, 0, N, false).is_err());
    }

    #[test]
    fn test_crossing_matches_analytic_level() {
        let t = time_axis();
        let v = gaussian_pulse(400, -300.0, 2.0);
        let scan = scan_channel(&t, &v, 0, N, false, 0.25, false);
        let xs: Vec<f64> = t.iter().map(|&x| f64::from(x)).collect();
        let ys: Vec<f64> = v.iter().map(|&y| f64::from(y)).collect();
        let interp = Interpolant::build(InterpolationKind::CubicNatural, &xs, &ys).unwrap();

        let t_cfd =
            interpolated_crossing(&interp, &t, scan.bracket_main.unwrap(), scan.level_main, 10)
                .unwrap();
        // analytic 25 % crossing of a Gaussian on the rising edge:
        // t0 - sigma*sqrt(2 ln 4)
        let expected = 400.0 * f64::from(DT) - 2.0 * (2.0 * 4.0f64.ln()).sqrt();
        assert!(
            (t_cfd - expected).abs() < 0.05,
            "t_cfd={t_cfd} expected={expected}"
        );
    }

    #[test]
    fn test_refinement_never_shrinks_amplitude() {
        let t = time_axis();
        // place the true peak between two cells
        let t0 = 400.45 * DT;
        let v: Vec<f32> = (0..N)
            .map(|i| {
                let d = i as f32 * DT - t0;
                -300.0 * (-d * d / (2.0 * 4.0)).exp()
            })
            .collect();
        let scan = scan_channel(&t, &v, 0, N, false, 0.25, false);
        let cell = scan.cell_min.unwrap();
        let xs: Vec<f64> = t.iter().map(|&x| f64::from(x)).collect();
        let ys: Vec<f64> = v.iter().map(|&y| f64::from(y)).collect();
        let interp = Interpolant::build(InterpolationKind::CubicNatural, &xs, &ys).unwrap();

        let (t_extr, y_extr) =
            refine_extremum(&interp, &t, cell, scan.y_min, false, 10).unwrap();
        assert!(y_extr <= scan.y_min);
        assert!((t_extr - f64::from(t0)).abs() < f64::from(DT));
    }

    #[test]
    fn test_crossing_stable_under_tenfold_resampling() {
        let t = time_axis();
        let v = gaussian_pulse(400, -300.0, 2.0);
        let scan = scan_channel(&t, &v, 0, N, false, 0.25, false);
        let xs: Vec<f64> = t.iter().map(|&x| f64::from(x)).collect();
        let ys: Vec<f64> = v.iter().map(|&y| f64::from(y)).collect();
        let interp = Interpolant::build(InterpolationKind::CubicNatural, &xs, &ys).unwrap();
        let t_ref =
            interpolated_crossing(&interp, &t, scan.bracket_main.unwrap(), scan.level_main, 10)
                .unwrap();

        // re-sample the interpolated trace at 10x density and extract
        // again with plain linear bracketing
        let dense_n = N * 10;
        let dense_dt = f64::from(DT) / 10.0;
        let dense_t: Vec<f32> = (0..dense_n).map(|i| (i as f64 * dense_dt) as f32).collect();
        let dense_v: Vec<f32> = dense_t
            .iter()
            .map(|&ti| interp.eval(f64::from(ti)) as f32)
            .collect();
        let dense_scan = scan_channel(&dense_t, &dense_v, 0, dense_n, false, 0.25, false);
        assert_eq!(dense_scan.bracket_count, 1);
        let t_dense = linear_crossing(
            &dense_t,
            &dense_v,
            dense_scan.bracket_main.unwrap(),
            dense_scan.level_main,
        )
        .unwrap();

        // within a picosecond
        assert!(
            (t_ref - t_dense).abs() < 1e-3,
            "t_ref={t_ref} t_dense={t_dense}"
        );
    }

    #[test]
    fn test_linear_crossing_solves_directly() {
        let t = [0.0f32, 1.0, 2.0];
        let v = [0.0f32, -100.0, -200.0];
        let ts = linear_crossing(&t, &v, (0, 1), -50.0).unwrap();
        assert!((ts - 0.5).abs() < 1e-6);
        assert!(linear_crossing(&t, &v, (0, 1), -150.0).is_none());
    }
}
