//! Lifetime classification and spectrum binning.

use crate::data::settings::{Settings, SpectrumGeometry};

/// Which spectrum a coincident pair feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// A is start, B is stop.
    Ab,
    /// B is start, A is stop.
    Ba,
    /// Both detectors inside the stop window.
    Prompt,
    /// No spectrum membership.
    None,
}

/// Classify a pair by the PHS windows of both channels. The bins are
/// the raw (pre-range-check) PHS indices so that an out-of-spectrum
/// pulse height can never satisfy a window.
pub fn classify(phs_a: i64, phs_b: i64, cfg: &Settings) -> Branch {
    let in_window = |bin: i64, min: usize, max: usize| bin >= min as i64 && bin <= max as i64;

    let start_a = in_window(phs_a, cfg.phs_start_a.min, cfg.phs_start_a.max);
    let stop_a = in_window(phs_a, cfg.phs_stop_a.min, cfg.phs_stop_a.max);
    let start_b = in_window(phs_b, cfg.phs_start_b.min, cfg.phs_start_b.max);
    let stop_b = in_window(phs_b, cfg.phs_stop_b.min, cfg.phs_stop_b.max);

    if start_a && stop_b && !cfg.force_prompt {
        Branch::Ab
    } else if start_b && stop_a && !cfg.force_prompt {
        Branch::Ba
    } else if stop_a && stop_b {
        Branch::Prompt
    } else {
        Branch::None
    }
}

/// Map a lifetime difference onto a spectrum bin:
/// `round(((Δ + offset)/scaler)·N) − 1`, `None` outside `[0, N)`.
pub fn lifetime_bin(delta_ns: f64, geo: &SpectrumGeometry) -> Option<usize> {
    let n = geo.channel_count as f64;
    let bin = (((delta_ns + geo.offset_ns) / geo.scaler_ns) * n).round() as i64 - 1;
    if bin >= 0 && (bin as usize) < geo.channel_count {
        Some(bin as usize)
    } else {
        None
    }
}

/// Whether a lifetime difference may be recorded under the negative-
/// lifetime policy.
pub fn delta_allowed(delta_ns: f64, allow_negative: bool) -> bool {
    delta_ns >= 0.0 || allow_negative
}
