//! Acquisition settings and the per-chunk immutable snapshot.
//!
//! The engine owns one mutable [`Settings`] value; the host application
//! edits it between runs. Settings persistence itself is a collaborator
//! concern, which is why everything here round-trips through serde.
//! Each dispatched chunk captures a [`ChunkSettings`] snapshot so
//! workers never read shared mutable state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::math::interpolate::InterpolationKind;
use crate::pipeline::shape::ShapeEnvelopeData;
use crate::TRACE_CELLS;

/// Detector channel selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelId {
    A,
    B,
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelId::A => write!(f, "A"),
            ChannelId::B => write!(f, "B"),
        }
    }
}

/// Which accepted branch feeds the pulse-shape recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordScheme {
    LifetimeAb,
    LifetimeBa,
    Prompt,
}

impl std::fmt::Display for RecordScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordScheme::LifetimeAb => write!(f, "A→B"),
            RecordScheme::LifetimeBa => write!(f, "B→A"),
            RecordScheme::Prompt => write!(f, "prompt"),
        }
    }
}

/// Median pre-filter configuration, per channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MedianSettings {
    pub enabled: bool,
    /// Odd window size in cells.
    pub window: usize,
}

impl Default for MedianSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            window: 3,
        }
    }
}

/// Baseline jitter correction, per channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BaselineSettings {
    pub enabled: bool,
    /// First cell of the estimation region.
    pub start_cell: usize,
    /// Number of cells in the estimation region.
    pub region: usize,
    /// Expected baseline level \[mV\].
    pub reference_mv: f64,
    /// Rejection limit as percentage of full scale.
    pub limit_percent: f64,
    /// Reject the pulse pair when the limit is exceeded.
    pub reject_on_limit: bool,
}

impl Default for BaselineSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            start_cell: 0,
            region: 128,
            reference_mv: 0.0,
            limit_percent: 5.0,
            reject_on_limit: false,
        }
    }
}

/// Pulse-area filter configuration, per channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AreaFilterChannel {
    /// Vertical binning factor of the scatter plot.
    pub binning: u32,
    /// Per-channel area normalization gain.
    pub norm: f64,
    pub slope_upper: f64,
    pub intercept_upper: f64,
    pub slope_lower: f64,
    pub intercept_lower: f64,
}

impl Default for AreaFilterChannel {
    fn default() -> Self {
        Self {
            binning: 500,
            norm: 5.0,
            slope_upper: 1.0,
            intercept_upper: 250.0,
            slope_lower: 1.0,
            intercept_lower: -250.0,
        }
    }
}

/// Rise-time (10 %–90 %) filter configuration, per channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiseTimeChannel {
    /// Full scale of the rise-time spectrum \[ns\].
    pub scale_ns: f64,
    /// Number of bins of the rise-time spectrum.
    pub binning: usize,
    /// Acceptance window, inclusive bin indices.
    pub left_window: usize,
    pub right_window: usize,
}

impl Default for RiseTimeChannel {
    fn default() -> Self {
        Self {
            scale_ns: 5.0,
            binning: 1000,
            left_window: 20,
            right_window: 980,
        }
    }
}

/// Pulse-shape envelope filter configuration, per channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShapeFilterChannel {
    pub enabled: bool,
    /// Region of interest left of the pulse extremum \[ns\], positive.
    pub left_ns: f64,
    /// Region of interest right of the pulse extremum \[ns\].
    pub right_ns: f64,
    /// Band width below the mean, in standard deviations.
    pub lower_frac: f64,
    /// Band width above the mean, in standard deviations.
    pub upper_frac: f64,
}

impl Default for ShapeFilterChannel {
    fn default() -> Self {
        Self {
            enabled: false,
            left_ns: 5.0,
            right_ns: 5.0,
            lower_frac: 3.0,
            upper_frac: 3.0,
        }
    }
}

/// Pulse-height window in PHS bins, inclusive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PhsWindow {
    pub min: usize,
    pub max: usize,
}

impl PhsWindow {
    pub fn contains(&self, bin: usize) -> bool {
        bin >= self.min && bin <= self.max
    }

    /// Window test on a raw (possibly out-of-spectrum) bin index.
    pub fn contains_i64(&self, bin: i64) -> bool {
        bin >= self.min as i64 && bin <= self.max as i64
    }
}

impl Default for PhsWindow {
    fn default() -> Self {
        Self {
            min: 0,
            max: TRACE_CELLS,
        }
    }
}

/// Geometry of one lifetime spectrum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpectrumGeometry {
    pub channel_count: usize,
    pub offset_ns: f64,
    pub scaler_ns: f64,
}

impl Default for SpectrumGeometry {
    fn default() -> Self {
        Self {
            channel_count: 4096,
            offset_ns: 5.0,
            scaler_ns: 30.0,
        }
    }
}

/// Persistence plot configuration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PersistenceSettings {
    pub enabled: bool,
    /// Shift channel A by the CFD timestamp of channel B instead of its
    /// own.
    pub partner_ref_a: bool,
    /// Shift channel B by the CFD timestamp of channel A instead of its
    /// own.
    pub partner_ref_b: bool,
}

/// The full acquisition configuration consumed by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Digitizer channel indices feeding detector A and B.
    pub channel_a: usize,
    pub channel_b: usize,

    /// Signal polarity of both detectors.
    pub positive_signal: bool,
    /// Constant-fraction levels.
    pub cfd_a: f64,
    pub cfd_b: f64,

    /// Region of interest, `[start_cell, stop_cell)`.
    pub start_cell: usize,
    pub stop_cell: usize,
    /// Sweep length of one trace \[ns\].
    pub sweep_ns: f64,

    pub interpolation: InterpolationKind,
    /// Subdivisions evaluated between two cells during refinement.
    pub intra_render_points: usize,

    /// Skip visualization-only products (scatter points, persistence).
    pub burst_mode: bool,
    /// Route every coincident pair into the prompt spectrum.
    pub force_prompt: bool,
    /// Accept negative lifetime differences.
    pub allow_negative_lifetimes: bool,
    /// Arrival-time spread applied when merging A→B and B→A \[ns\].
    pub ats_ns: f64,

    pub median_a: MedianSettings,
    pub median_b: MedianSettings,
    pub baseline_a: BaselineSettings,
    pub baseline_b: BaselineSettings,

    pub area_plot_enabled: bool,
    pub area_filter_enabled: bool,
    pub area_a: AreaFilterChannel,
    pub area_b: AreaFilterChannel,

    pub rise_time_filter_enabled: bool,
    pub rise_a: RiseTimeChannel,
    pub rise_b: RiseTimeChannel,

    pub shape_a: ShapeFilterChannel,
    pub shape_b: ShapeFilterChannel,
    pub record_scheme: RecordScheme,

    pub phs_start_a: PhsWindow,
    pub phs_stop_a: PhsWindow,
    pub phs_start_b: PhsWindow,
    pub phs_stop_b: PhsWindow,

    pub spectrum_ab: SpectrumGeometry,
    pub spectrum_ba: SpectrumGeometry,
    pub spectrum_prompt: SpectrumGeometry,
    pub spectrum_merged: SpectrumGeometry,

    pub persistence: PersistenceSettings,

    /// Run the pipeline inline on the producer thread.
    pub single_threaded: bool,
    /// Pulse pairs per dispatched chunk; tune to a small multiple of
    /// the worker count.
    pub chunk_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            channel_a: 0,
            channel_b: 1,
            positive_signal: false,
            cfd_a: 0.25,
            cfd_b: 0.25,
            start_cell: 0,
            stop_cell: TRACE_CELLS,
            sweep_ns: 200.0,
            interpolation: InterpolationKind::CubicNatural,
            intra_render_points: 10,
            burst_mode: false,
            force_prompt: false,
            allow_negative_lifetimes: false,
            ats_ns: 0.0,
            median_a: MedianSettings::default(),
            median_b: MedianSettings::default(),
            baseline_a: BaselineSettings::default(),
            baseline_b: BaselineSettings::default(),
            area_plot_enabled: true,
            area_filter_enabled: false,
            area_a: AreaFilterChannel::default(),
            area_b: AreaFilterChannel::default(),
            rise_time_filter_enabled: false,
            rise_a: RiseTimeChannel::default(),
            rise_b: RiseTimeChannel::default(),
            shape_a: ShapeFilterChannel::default(),
            shape_b: ShapeFilterChannel::default(),
            record_scheme: RecordScheme::LifetimeAb,
            phs_start_a: PhsWindow::default(),
            phs_stop_a: PhsWindow::default(),
            phs_start_b: PhsWindow::default(),
            phs_stop_b: PhsWindow::default(),
            spectrum_ab: SpectrumGeometry::default(),
            spectrum_ba: SpectrumGeometry::default(),
            spectrum_prompt: SpectrumGeometry::default(),
            spectrum_merged: SpectrumGeometry::default(),
            persistence: PersistenceSettings::default(),
            single_threaded: false,
            chunk_size: 128,
        }
    }
}

impl Settings {
    /// Number of cells inside the region of interest.
    pub fn cell_width(&self) -> usize {
        self.stop_cell.saturating_sub(self.start_cell)
    }

    pub fn median(&self, ch: ChannelId) -> &MedianSettings {
        match ch {
            ChannelId::A => &self.median_a,
            ChannelId::B => &self.median_b,
        }
    }

    pub fn baseline(&self, ch: ChannelId) -> &BaselineSettings {
        match ch {
            ChannelId::A => &self.baseline_a,
            ChannelId::B => &self.baseline_b,
        }
    }

    pub fn area(&self, ch: ChannelId) -> &AreaFilterChannel {
        match ch {
            ChannelId::A => &self.area_a,
            ChannelId::B => &self.area_b,
        }
    }

    pub fn rise(&self, ch: ChannelId) -> &RiseTimeChannel {
        match ch {
            ChannelId::A => &self.rise_a,
            ChannelId::B => &self.rise_b,
        }
    }

    pub fn shape(&self, ch: ChannelId) -> &ShapeFilterChannel {
        match ch {
            ChannelId::A => &self.shape_a,
            ChannelId::B => &self.shape_b,
        }
    }

    pub fn cfd(&self, ch: ChannelId) -> f64 {
        match ch {
            ChannelId::A => self.cfd_a,
            ChannelId::B => self.cfd_b,
        }
    }
}

/// Immutable per-chunk view: a full copy of the settings plus the
/// envelope traces of the shape filter, captured once per chunk so the
/// workers rebuild their splines without touching shared state.
#[derive(Debug, Clone)]
pub struct ChunkSettings {
    pub cfg: Settings,
    pub envelope_a: Option<Arc<ShapeEnvelopeData>>,
    pub envelope_b: Option<Arc<ShapeEnvelopeData>>,
    /// Recorder-active flags at capture time.
    pub recording_a: bool,
    pub recording_b: bool,
}

impl ChunkSettings {
    pub fn capture(
        cfg: &Settings,
        envelope_a: Option<Arc<ShapeEnvelopeData>>,
        envelope_b: Option<Arc<ShapeEnvelopeData>>,
        recording_a: bool,
        recording_b: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg: cfg.clone(),
            envelope_a,
            envelope_b,
            recording_a,
            recording_b,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_hardware_typical() {
        let s = Settings::default();
        assert_eq!(s.cfd_a, 0.25);
        assert_eq!(s.sweep_ns, 200.0);
        assert_eq!(s.spectrum_ab.channel_count, 4096);
        assert_eq!(s.spectrum_ab.scaler_ns, 30.0);
        assert_eq!(s.cell_width(), TRACE_CELLS);
    }

    #[test]
    fn test_settings_json_roundtrip() {
        let mut s = Settings::default();
        s.cfd_a = 0.5;
        s.interpolation = InterpolationKind::Akima;
        s.rise_time_filter_enabled = true;
        let json = serde_json::to_string(&s).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cfd_a, 0.5);
        assert_eq!(back.interpolation, InterpolationKind::Akima);
        assert!(back.rise_time_filter_enabled);
    }

    #[test]
    fn test_phs_window_bounds_inclusive() {
        let w = PhsWindow { min: 10, max: 20 };
        assert!(w.contains(10));
        assert!(w.contains(20));
        assert!(!w.contains(9));
        assert!(!w.contains(21));
    }
}
