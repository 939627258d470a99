//! The per-pulse-pair processing pipeline.

pub mod cfd;
pub mod filters;
pub mod pair;
pub mod shape;
pub mod spectra;

use serde::{Deserialize, Serialize};

/// Why a pulse pair was dropped. Rejections never abort the run; they
/// are counted in aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(usize)]
pub enum RejectReason {
    /// The source failed to deliver the pair.
    Acquisition = 0,
    /// Median pre-filter refused its window.
    MedianWindowInvalid,
    /// Baseline estimate beyond the configured limit.
    BaselineOutOfLimit,
    /// No usable extremum inside the region of interest.
    ExtremumUnresolvable,
    /// Extremum sign contradicts the declared signal polarity.
    PolarityMismatch,
    /// Zero or more than one bracket on the main CFD level.
    CfdBracketAmbiguous,
    /// CFD level zero, out of full scale, of the wrong sign, or the
    /// interpolated crossing could not be resolved.
    CfdLevelInvalid,
    AreaFilterReject,
    RiseTimeFilterReject,
    ShapeFilterReject,
}

impl RejectReason {
    /// Number of enum variants, for counter arrays.
    pub const VARIANTS: usize = 10;
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::Acquisition => "acquisition failure",
            RejectReason::MedianWindowInvalid => "median window invalid",
            RejectReason::BaselineOutOfLimit => "baseline out of limit",
            RejectReason::ExtremumUnresolvable => "extremum unresolvable",
            RejectReason::PolarityMismatch => "polarity mismatch",
            RejectReason::CfdBracketAmbiguous => "CFD bracket ambiguous",
            RejectReason::CfdLevelInvalid => "CFD level invalid",
            RejectReason::AreaFilterReject => "area filter",
            RejectReason::RiseTimeFilterReject => "rise-time filter",
            RejectReason::ShapeFilterReject => "shape filter",
        };
        write!(f, "{s}")
    }
}
