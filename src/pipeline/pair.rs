//! The per-pulse-pair pipeline: a pure function from a trace pair and
//! a settings snapshot to the pair's spectrum contributions.

use std::sync::Arc;

use crate::data::settings::{ChunkSettings, RecordScheme};
use crate::data::trace::RawPair;
use crate::math::baseline::{self, BaselineOutcome};
use crate::math::interpolate::{Interpolant, InterpolationKind};
use crate::math::median::median_filter;
use crate::pipeline::cfd::{
    self, interpolated_crossing, linear_crossing, refine_extremum, scan_channel,
};
use crate::pipeline::filters::{
    area_band_accepts, normalize_area, rise_time_bin, rise_window_accepts, shape_accepts,
};
use crate::pipeline::shape::{ShapeEnvelope, ShapeRecord};
use crate::pipeline::spectra::{classify, delta_allowed, lifetime_bin, Branch};
use crate::pipeline::RejectReason;
use crate::TRACE_CELLS;

/// Everything a worker needs for one chunk: the immutable settings
/// snapshot plus the envelope splines rebuilt once per chunk.
#[derive(Debug, Clone)]
pub struct ChunkContext {
    pub snapshot: Arc<ChunkSettings>,
    pub envelope_a: Option<ShapeEnvelope>,
    pub envelope_b: Option<ShapeEnvelope>,
}

impl ChunkContext {
    pub fn new(snapshot: Arc<ChunkSettings>) -> Self {
        let envelope_a = if snapshot.cfg.shape_a.enabled {
            snapshot.envelope_a.as_deref().and_then(ShapeEnvelope::build)
        } else {
            None
        };
        let envelope_b = if snapshot.cfg.shape_b.enabled {
            snapshot.envelope_b.as_deref().and_then(ShapeEnvelope::build)
        } else {
            None
        };
        Self {
            snapshot,
            envelope_a,
            envelope_b,
        }
    }
}

/// Per-pair result: bin indices and side products accumulated up to the
/// stage the pair reached. A rejection keeps everything recorded before
/// it (the PHS, for one, is a diagnostic spectrum of all resolvable
/// pulses).
#[derive(Debug, Clone, Default)]
pub struct PairOutput {
    pub phs_a: Option<usize>,
    pub phs_b: Option<usize>,

    pub ab: Option<usize>,
    pub ba: Option<usize>,
    pub prompt: Option<usize>,
    pub merged: Option<usize>,

    pub rise_bin_a: Option<usize>,
    pub rise_bin_b: Option<usize>,

    /// `(phs_bin, area·binning)` scatter points.
    pub area_point_a: Option<(u32, f64)>,
    pub area_point_b: Option<(u32, f64)>,
    /// `(phs_bin, area)` samples accepted by the band, feeding the
    /// incremental statistics.
    pub area_accepted_a: Option<(usize, f64)>,
    pub area_accepted_b: Option<(usize, f64)>,

    pub shape_a: Option<ShapeRecord>,
    pub shape_b: Option<ShapeRecord>,

    /// Normalized, CFD-shifted traces of an accepted lifetime event.
    pub persistence_a: Option<Vec<(f64, f64)>>,
    pub persistence_b: Option<Vec<(f64, f64)>>,

    /// Pre-filter voltage copies for the pulse-stream collaborator,
    /// present when an intrinsic filter touched the trace.
    pub raw_a: Option<Vec<f32>>,
    pub raw_b: Option<Vec<f32>>,

    pub reject: Option<RejectReason>,
}

impl PairOutput {
    fn rejected(mut self, reason: RejectReason) -> Self {
        self.reject = Some(reason);
        self
    }

    /// Whether any lifetime spectrum received this pair.
    pub fn has_lifetime(&self) -> bool {
        self.ab.is_some() || self.ba.is_some() || self.prompt.is_some()
    }
}

/// Run the full cascade on one pair. The traces are mutated in place by
/// the intrinsic filters; the caller hands in its deep copy.
pub fn process_pair(pair: &mut RawPair, ctx: &ChunkContext) -> PairOutput {
    let cfg = &ctx.snapshot.cfg;
    let mut out = PairOutput::default();

    // keep the unfiltered pulse for downstream streaming
    let intrinsic_a = cfg.median_a.enabled || cfg.baseline_a.enabled;
    let intrinsic_b = cfg.median_b.enabled || cfg.baseline_b.enabled;
    if intrinsic_a {
        out.raw_a = Some(pair.a.v.to_vec());
    }
    if intrinsic_b {
        out.raw_b = Some(pair.b.v.to_vec());
    }

    if cfg.median_a.enabled && !median_filter(&mut pair.a.v[..], cfg.median_a.window) {
        return out.rejected(RejectReason::MedianWindowInvalid);
    }
    if cfg.median_b.enabled && !median_filter(&mut pair.b.v[..], cfg.median_b.window) {
        return out.rejected(RejectReason::MedianWindowInvalid);
    }

    if cfg.baseline_a.enabled {
        let bl = &cfg.baseline_a;
        if let BaselineOutcome::Rejected(_) = baseline::correct(
            &mut pair.a.v[..],
            bl.start_cell,
            bl.region,
            bl.reference_mv,
            bl.limit_percent,
            bl.reject_on_limit,
        ) {
            return out.rejected(RejectReason::BaselineOutOfLimit);
        }
    }
    if cfg.baseline_b.enabled {
        let bl = &cfg.baseline_b;
        if let BaselineOutcome::Rejected(_) = baseline::correct(
            &mut pair.b.v[..],
            bl.start_cell,
            bl.region,
            bl.reference_mv,
            bl.limit_percent,
            bl.reject_on_limit,
        ) {
            return out.rejected(RejectReason::BaselineOutOfLimit);
        }
    }

    let positive = cfg.positive_signal;
    let area_wanted = cfg.area_plot_enabled || cfg.area_filter_enabled;
    let (start, stop) = (cfg.start_cell, cfg.stop_cell.min(TRACE_CELLS));

    let scan_a = scan_channel(
        &pair.a.t[..],
        &pair.a.v[..],
        start,
        stop,
        positive,
        cfg.cfd_a,
        area_wanted,
    );
    if let Err(r) = cfd::validate_scan(&scan_a, &pair.a.v[..], start, stop, positive) {
        return out.rejected(r);
    }
    let scan_b = scan_channel(
        &pair.b.t[..],
        &pair.b.v[..],
        start,
        stop,
        positive,
        cfg.cfd_b,
        area_wanted,
    );
    if let Err(r) = cfd::validate_scan(&scan_b, &pair.b.v[..], start, stop, positive) {
        return out.rejected(r);
    }

    // interpolants over the ROI; the linear kind solves on the samples
    let linear = cfg.interpolation == InterpolationKind::Linear;
    let (interp_a, interp_b) = if linear {
        (None, None)
    } else {
        match (
            build_roi_interpolant(cfg.interpolation, &pair.a.t[start..stop], &pair.a.v[start..stop]),
            build_roi_interpolant(cfg.interpolation, &pair.b.t[start..stop], &pair.b.v[start..stop]),
        ) {
            (Some(a), Some(b)) => (Some(a), Some(b)),
            _ => return out.rejected(RejectReason::ExtremumUnresolvable),
        }
    };

    // refine the extrema, then bin the pulse heights
    let cell_a = scan_a.extremum_cell(positive).expect("validated scan");
    let cell_b = scan_b.extremum_cell(positive).expect("validated scan");
    let mut t_extr_a = f64::from(pair.a.t[cell_a]);
    let mut y_extr_a = scan_a.extremum(positive);
    let mut t_extr_b = f64::from(pair.b.t[cell_b]);
    let mut y_extr_b = scan_b.extremum(positive);

    if let Some(interp) = &interp_a {
        match refine_extremum(interp, &pair.a.t[..], cell_a, y_extr_a, positive, cfg.intra_render_points) {
            Some((t, y)) => {
                t_extr_a = t;
                y_extr_a = y;
            }
            None => return out.rejected(RejectReason::ExtremumUnresolvable),
        }
    }
    if let Some(interp) = &interp_b {
        match refine_extremum(interp, &pair.b.t[..], cell_b, y_extr_b, positive, cfg.intra_render_points) {
            Some((t, y)) => {
                t_extr_b = t;
                y_extr_b = y;
            }
            None => return out.rejected(RejectReason::ExtremumUnresolvable),
        }
    }

    let phs_raw_a = phs_bin(y_extr_a);
    let phs_raw_b = phs_bin(y_extr_b);
    if (0..TRACE_CELLS as i64).contains(&phs_raw_a) {
        out.phs_a = Some(phs_raw_a as usize);
    }
    if (0..TRACE_CELLS as i64).contains(&phs_raw_b) {
        out.phs_b = Some(phs_raw_b as usize);
    }

    if let Err(r) = cfd::validate_level(scan_a.level_main, y_extr_a, positive) {
        return out.rejected(r);
    }
    if let Err(r) = cfd::validate_level(scan_b.level_main, y_extr_b, positive) {
        return out.rejected(r);
    }

    let bracket_a = scan_a.bracket_main.expect("validated scan");
    let bracket_b = scan_b.bracket_main.expect("validated scan");
    let t_cfd_a = match crossing(
        interp_a.as_ref(),
        &pair.a.t[..],
        &pair.a.v[..],
        bracket_a,
        scan_a.level_main,
        cfg.intra_render_points,
    ) {
        Some(ts) => ts,
        None => return out.rejected(RejectReason::CfdLevelInvalid),
    };
    let t_cfd_b = match crossing(
        interp_b.as_ref(),
        &pair.b.t[..],
        &pair.b.v[..],
        bracket_b,
        scan_b.level_main,
        cfg.intra_render_points,
    ) {
        Some(ts) => ts,
        None => return out.rejected(RejectReason::CfdLevelInvalid),
    };

    let t10_a = scan_a.bracket_10.and_then(|b| {
        crossing(interp_a.as_ref(), &pair.a.t[..], &pair.a.v[..], b, scan_a.level_10, cfg.intra_render_points)
    });
    let t90_a = scan_a.bracket_90.and_then(|b| {
        crossing(interp_a.as_ref(), &pair.a.t[..], &pair.a.v[..], b, scan_a.level_90, cfg.intra_render_points)
    });
    let t10_b = scan_b.bracket_10.and_then(|b| {
        crossing(interp_b.as_ref(), &pair.b.t[..], &pair.b.v[..], b, scan_b.level_10, cfg.intra_render_points)
    });
    let t90_b = scan_b.bracket_90.and_then(|b| {
        crossing(interp_b.as_ref(), &pair.b.t[..], &pair.b.v[..], b, scan_b.level_90, cfg.intra_render_points)
    });

    // area features
    let cell_width = stop.saturating_sub(start);
    let area_a = normalize_area(scan_a.area_raw, cfg.area_a.norm, cell_width);
    let area_b = normalize_area(scan_b.area_raw, cfg.area_b.norm, cell_width);

    if cfg.area_plot_enabled && !cfg.burst_mode {
        let scaled_a = area_a * f64::from(cfg.area_a.binning);
        let scaled_b = area_b * f64::from(cfg.area_b.binning);
        let phs_ok = (0..TRACE_CELLS as i64).contains(&phs_raw_a)
            && (0..TRACE_CELLS as i64).contains(&phs_raw_b);
        if phs_ok && scaled_a >= 0.0 && scaled_b >= 0.0 {
            out.area_point_a = Some((phs_raw_a as u32, scaled_a));
            out.area_point_b = Some((phs_raw_b as u32, scaled_b));
        }
    }

    if cfg.area_filter_enabled {
        let inside_a = area_band_accepts(&cfg.area_a, phs_raw_a, area_a);
        let inside_b = area_band_accepts(&cfg.area_b, phs_raw_b, area_b);
        if inside_a {
            if let Some(bin) = out.phs_a {
                out.area_accepted_a = Some((bin, area_a));
            }
        }
        if inside_b {
            if let Some(bin) = out.phs_b {
                out.area_accepted_b = Some((bin, area_b));
            }
        }
        if !inside_a || !inside_b {
            return out.rejected(RejectReason::AreaFilterReject);
        }
    }

    // rise-time spectrum and window
    let start_or_stop_a = cfg.phs_start_a.contains_i64(phs_raw_a) || cfg.phs_stop_a.contains_i64(phs_raw_a);
    let start_or_stop_b = cfg.phs_start_b.contains_i64(phs_raw_b) || cfg.phs_stop_b.contains_i64(phs_raw_b);

    let rise_a = match (t10_a, t90_a) {
        (Some(lo), Some(hi)) => rise_time_bin(&cfg.rise_a, lo, hi),
        _ => None,
    };
    let rise_b = match (t10_b, t90_b) {
        (Some(lo), Some(hi)) => rise_time_bin(&cfg.rise_b, lo, hi),
        _ => None,
    };
    if start_or_stop_a {
        out.rise_bin_a = rise_a;
    }
    if start_or_stop_b {
        out.rise_bin_b = rise_b;
    }

    if cfg.rise_time_filter_enabled {
        let ok_a = rise_a.is_some_and(|b| rise_window_accepts(&cfg.rise_a, b));
        let ok_b = rise_b.is_some_and(|b| rise_window_accepts(&cfg.rise_b, b));
        if !ok_a || !ok_b {
            return out.rejected(RejectReason::RiseTimeFilterReject);
        }
    }

    // pulse-shape envelope
    if let Some(env) = &ctx.envelope_a {
        if !shape_accepts(env, &cfg.shape_a, &pair.a.t[..], &pair.a.v[..], t_extr_a, y_extr_a) {
            return out.rejected(RejectReason::ShapeFilterReject);
        }
    }
    if let Some(env) = &ctx.envelope_b {
        if !shape_accepts(env, &cfg.shape_b, &pair.b.t[..], &pair.b.v[..], t_extr_b, y_extr_b) {
            return out.rejected(RejectReason::ShapeFilterReject);
        }
    }

    // lifetime classification; a pair counts as accepted only when its
    // lifetime difference passed the negative-lifetime policy, not
    // merely when its bin landed on the spectrum
    let branch = classify(phs_raw_a, phs_raw_b, cfg);
    let allow_neg = cfg.allow_negative_lifetimes;
    let mut lifetime_accepted = false;
    let mut scheme_matched = false;

    match branch {
        Branch::Ab => {
            let delta = t_cfd_b - t_cfd_a;
            if let Some(bin) = lifetime_bin(delta, &cfg.spectrum_ab) {
                if delta_allowed(delta, allow_neg) {
                    out.ab = Some(bin);
                    lifetime_accepted = true;
                    scheme_matched = cfg.record_scheme == RecordScheme::LifetimeAb;

                    let merged_delta = delta + cfg.ats_ns;
                    if let Some(merged) = lifetime_bin(merged_delta, &cfg.spectrum_merged) {
                        out.merged = Some(merged);
                    }
                }
            }
        }
        Branch::Ba => {
            let delta = t_cfd_a - t_cfd_b;
            if let Some(bin) = lifetime_bin(delta, &cfg.spectrum_ba) {
                if delta_allowed(delta, allow_neg) {
                    out.ba = Some(bin);
                    lifetime_accepted = true;
                    scheme_matched = cfg.record_scheme == RecordScheme::LifetimeBa;

                    let merged_delta = delta - cfg.ats_ns;
                    if let Some(merged) = lifetime_bin(merged_delta, &cfg.spectrum_merged) {
                        out.merged = Some(merged);
                    }
                }
            }
        }
        Branch::Prompt => {
            let delta = t_cfd_a - t_cfd_b;
            if let Some(bin) = lifetime_bin(delta, &cfg.spectrum_prompt) {
                out.prompt = Some(bin);
                lifetime_accepted = true;
                scheme_matched = cfg.record_scheme == RecordScheme::Prompt;
            }
        }
        Branch::None => {}
    }

    // envelope-learning capture for the accepted scheme branch
    if lifetime_accepted && scheme_matched {
        if ctx.snapshot.recording_a {
            out.shape_a = ShapeRecord::capture(&pair.a.t[..], &pair.a.v[..], t_extr_a, y_extr_a);
        }
        if ctx.snapshot.recording_b {
            out.shape_b = ShapeRecord::capture(&pair.b.t[..], &pair.b.v[..], t_extr_b, y_extr_b);
        }
    }

    // persistence traces for the display, one per accepted lifetime
    // event
    if cfg.persistence.enabled && !cfg.burst_mode && lifetime_accepted {
        let ref_a = if cfg.persistence.partner_ref_a {
            t_cfd_b
        } else {
            t_cfd_a
        };
        let ref_b = if cfg.persistence.partner_ref_b {
            t_cfd_a
        } else {
            t_cfd_b
        };
        out.persistence_a = Some(shifted_normalized(
            &pair.a.t[start..stop],
            &pair.a.v[start..stop],
            ref_a,
            y_extr_a,
        ));
        out.persistence_b = Some(shifted_normalized(
            &pair.b.t[start..stop],
            &pair.b.v[start..stop],
            ref_b,
            y_extr_b,
        ));
    }

    out
}

/// PHS bin of a pulse amplitude: the amplitude fraction of the ±500 mV
/// full scale mapped onto the trace-cell count.
fn phs_bin(y_extr: f64) -> i64 {
    let fract = y_extr.abs() * 0.002;
    (fract * TRACE_CELLS as f64) as i64 - 1
}

fn build_roi_interpolant(kind: InterpolationKind, t: &[f32], v: &[f32]) -> Option<Interpolant> {
    let xs: Vec<f64> = t.iter().map(|&x| f64::from(x)).collect();
    let ys: Vec<f64> = v.iter().map(|&y| f64::from(y)).collect();
    Interpolant::build(kind, &xs, &ys).ok()
}

fn crossing(
    interp: Option<&Interpolant>,
    t: &[f32],
    v: &[f32],
    bracket: (usize, usize),
    level: f64,
    intra: usize,
) -> Option<f64> {
    match interp {
        Some(i) => interpolated_crossing(i, t, bracket, level, intra),
        None => linear_crossing(t, v, bracket, level),
    }
}

fn shifted_normalized(t: &[f32], v: &[f32], t_ref: f64, y_extr: f64) -> Vec<(f64, f64)> {
    let inv = 1.0 / y_extr;
    t.iter()
        .zip(v)
        .map(|(&ti, &vi)| (f64::from(ti) - t_ref, f64::from(vi) * inv))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::settings::Settings;
    use crate::data::trace::Trace;

    const DT: f64 = 200.0 / 1024.0;

    fn gaussian_trace(center_cell: f64, amp: f64, sigma_ns: f64) -> Trace {
        let mut tr = Trace::default();
        tr.fill_uniform_time(200.0);
        let t0 = center_cell * DT;
        for i in 0..TRACE_CELLS {
            let d = i as f64 * DT - t0;
            tr.v[i] = (amp * (-d * d / (2.0 * sigma_ns * sigma_ns)).exp()) as f32;
        }
        tr
    }

    fn gaussian_pair(cell_a: f64, cell_b: f64, amp: f64, sigma_ns: f64) -> RawPair {
        RawPair {
            a: gaussian_trace(cell_a, amp, sigma_ns),
            b: gaussian_trace(cell_b, amp, sigma_ns),
        }
    }

    fn context(cfg: Settings) -> ChunkContext {
        ChunkContext::new(ChunkSettings::capture(&cfg, None, None, false, false))
    }

    #[test]
    fn test_accepted_pair_lands_in_ab() {
        let ctx = context(Settings::default());
        let mut pair = gaussian_pair(300.0, 340.0, -300.0, 2.0);
        let out = process_pair(&mut pair, &ctx);

        assert_eq!(out.reject, None);
        assert!(out.ab.is_some());
        assert!(out.merged.is_some());
        assert!(out.ba.is_none());
        assert!(out.prompt.is_none());
        // delta = 40 cells = 7.8125 ns; ((7.8125+5)/30)*4096 - 1
        let expected = (((40.0 * DT + 5.0) / 30.0) * 4096.0_f64).round() as usize - 1;
        assert_eq!(out.ab, Some(expected));
        // PHS: 300/500 * 1024 - 1
        assert_eq!(out.phs_a, Some(613));
        assert_eq!(out.phs_b, Some(613));
    }

    #[test]
    fn test_reversed_pair_lands_in_ba() {
        // A carries the stop window, B the start window
        let mut cfg = Settings::default();
        cfg.phs_start_a = crate::data::settings::PhsWindow { min: 1025, max: 1025 };
        cfg.phs_stop_a = crate::data::settings::PhsWindow { min: 0, max: 1024 };
        cfg.phs_start_b = crate::data::settings::PhsWindow { min: 0, max: 1024 };
        cfg.phs_stop_b = crate::data::settings::PhsWindow { min: 1025, max: 1025 };
        let ctx = context(cfg);
        let mut pair = gaussian_pair(340.0, 300.0, -300.0, 2.0);
        let out = process_pair(&mut pair, &ctx);
        assert_eq!(out.reject, None);
        assert!(out.ba.is_some());
        assert!(out.ab.is_none());
    }

    #[test]
    fn test_polarity_mismatch_yields_no_output() {
        let mut cfg = Settings::default();
        cfg.positive_signal = true;
        let ctx = context(cfg);
        let mut pair = gaussian_pair(300.0, 340.0, -300.0, 2.0);
        let out = process_pair(&mut pair, &ctx);
        assert_eq!(out.reject, Some(RejectReason::PolarityMismatch));
        assert!(out.phs_a.is_none());
        assert!(!out.has_lifetime());
    }

    #[test]
    fn test_baseline_reject_drops_pair() {
        let mut cfg = Settings::default();
        cfg.baseline_a.enabled = true;
        cfg.baseline_a.limit_percent = 2.0;
        cfg.baseline_a.reject_on_limit = true;
        cfg.baseline_a.region = 64;
        let ctx = context(cfg);

        let mut pair = gaussian_pair(300.0, 340.0, -300.0, 2.0);
        for s in pair.a.v.iter_mut() {
            *s += 30.0;
        }
        let out = process_pair(&mut pair, &ctx);
        assert_eq!(out.reject, Some(RejectReason::BaselineOutOfLimit));
        assert!(!out.has_lifetime());
    }

    #[test]
    fn test_baseline_correction_keeps_timing() {
        let mut cfg = Settings::default();
        cfg.baseline_a.enabled = true;
        cfg.baseline_b.enabled = true;
        cfg.baseline_a.region = 64;
        cfg.baseline_b.region = 64;
        let ctx = context(cfg.clone());

        let mut shifted = gaussian_pair(300.0, 340.0, -300.0, 2.0);
        for s in shifted.a.v.iter_mut() {
            *s += 3.0;
        }
        for s in shifted.b.v.iter_mut() {
            *s += 3.0;
        }
        let out_shifted = process_pair(&mut shifted, &ctx);

        let ctx_plain = context(Settings::default());
        let mut plain = gaussian_pair(300.0, 340.0, -300.0, 2.0);
        let out_plain = process_pair(&mut plain, &ctx_plain);

        assert_eq!(out_shifted.reject, None);
        assert_eq!(out_shifted.ab, out_plain.ab);
    }

    #[test]
    fn test_area_filter_rejects_outside_band() {
        let mut cfg = Settings::default();
        cfg.area_filter_enabled = true;
        // an empty band under everything
        cfg.area_a.slope_upper = 0.0;
        cfg.area_a.intercept_upper = -1.0;
        cfg.area_a.slope_lower = 0.0;
        cfg.area_a.intercept_lower = -2.0;
        let ctx = context(cfg);

        let mut pair = gaussian_pair(300.0, 340.0, -300.0, 2.0);
        let out = process_pair(&mut pair, &ctx);
        assert_eq!(out.reject, Some(RejectReason::AreaFilterReject));
        // the PHS entries survive the rejection
        assert!(out.phs_a.is_some());
        assert!(!out.has_lifetime());
    }

    #[test]
    fn test_rise_time_filter_window() {
        let mut cfg = Settings::default();
        cfg.rise_time_filter_enabled = true;
        cfg.rise_a.left_window = 0;
        cfg.rise_a.right_window = 999;
        cfg.rise_b.left_window = 0;
        cfg.rise_b.right_window = 0; // impossible for a real pulse
        let ctx = context(cfg);

        let mut pair = gaussian_pair(300.0, 340.0, -300.0, 2.0);
        let out = process_pair(&mut pair, &ctx);
        assert_eq!(out.reject, Some(RejectReason::RiseTimeFilterReject));
        // the rise-time spectrum entry was still produced
        assert!(out.rise_bin_b.is_some());
    }

    #[test]
    fn test_median_pass_preserves_acceptance() {
        let mut cfg = Settings::default();
        cfg.median_a.enabled = true;
        cfg.median_a.window = 3;
        cfg.median_b.enabled = true;
        cfg.median_b.window = 3;
        let ctx = context(cfg);

        let mut pair = gaussian_pair(300.0, 340.0, -300.0, 3.0);
        // a one-cell spike the median must remove
        pair.a.v[600] = -450.0;
        let out = process_pair(&mut pair, &ctx);
        assert_eq!(out.reject, None);
        assert!(out.ab.is_some());
        assert!(out.raw_a.is_some(), "raw pulse kept for streaming");
    }

    #[test]
    fn test_persistence_produced_for_accepted_pair() {
        let mut cfg = Settings::default();
        cfg.persistence.enabled = true;
        let ctx = context(cfg);
        let mut pair = gaussian_pair(300.0, 340.0, -300.0, 2.0);
        let out = process_pair(&mut pair, &ctx);
        let pa = out.persistence_a.expect("persistence trace");
        assert_eq!(pa.len(), TRACE_CELLS);
        // normalized peak near 1, shifted close to t=0 at the CFD edge
        let peak = pa.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
        assert!((peak - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_burst_mode_skips_visual_products() {
        let mut cfg = Settings::default();
        cfg.burst_mode = true;
        cfg.persistence.enabled = true;
        let ctx = context(cfg);
        let mut pair = gaussian_pair(300.0, 340.0, -300.0, 2.0);
        let out = process_pair(&mut pair, &ctx);
        assert_eq!(out.reject, None);
        assert!(out.ab.is_some());
        assert!(out.area_point_a.is_none());
        assert!(out.persistence_a.is_none());
    }

    #[test]
    fn test_negative_delta_needs_policy() {
        let mut cfg = Settings::default();
        // force AB classification with B earlier than A; the offset must
        // keep the negative difference on the spectrum
        cfg.spectrum_ab.offset_ns = 10.0;
        cfg.persistence.enabled = true;
        cfg.phs_start_a = crate::data::settings::PhsWindow { min: 0, max: 1024 };
        cfg.phs_stop_a = crate::data::settings::PhsWindow { min: 1025, max: 1025 };
        cfg.phs_start_b = crate::data::settings::PhsWindow { min: 1025, max: 1025 };
        cfg.phs_stop_b = crate::data::settings::PhsWindow { min: 0, max: 1024 };

        // recorder armed so a capture would happen if the pair counted
        let ctx = ChunkContext::new(ChunkSettings::capture(&cfg, None, None, true, false));
        let mut pair = gaussian_pair(340.0, 300.0, -300.0, 2.0);
        let out = process_pair(&mut pair, &ctx);
        assert!(out.ab.is_none(), "negative lifetime dropped by default");
        assert!(out.merged.is_none());
        assert!(out.shape_a.is_none(), "rejected delta must not be learned");
        assert!(out.persistence_a.is_none(), "rejected delta is not an accepted event");

        cfg.allow_negative_lifetimes = true;
        let ctx = ChunkContext::new(ChunkSettings::capture(&cfg, None, None, true, false));
        let mut pair = gaussian_pair(340.0, 300.0, -300.0, 2.0);
        let out = process_pair(&mut pair, &ctx);
        assert!(out.ab.is_some());
        assert!(out.shape_a.is_some());
        assert!(out.persistence_a.is_some());
    }

    #[test]
    fn test_linear_kind_still_resolves_timing() {
        let mut cfg = Settings::default();
        cfg.interpolation = InterpolationKind::Linear;
        let ctx = context(cfg);
        let mut pair = gaussian_pair(300.0, 340.0, -300.0, 2.0);
        let out = process_pair(&mut pair, &ctx);
        assert_eq!(out.reject, None);
        assert!(out.ab.is_some());
    }
}
