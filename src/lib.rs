//! Real-time pulse-pair processing engine for positron annihilation
//! lifetime spectroscopy (PALS).
//!
//! The engine consumes pairs of sampled voltage traces from two detector
//! channels, delivered by a fast waveform digitizer or a pulse
//! generator, and produces lifetime spectra, pulse-height spectra,
//! rise-time spectra, area-vs-height scatter data and persistence plots
//! at rates of tens of thousands of pulse pairs per second.
//!
//! The front-end (plotting, settings persistence, board driver, pulse
//! stream I/O) lives in external collaborators; this crate is the
//! processing core: timing extraction by constant-fraction
//! discrimination on interpolated traces, a multi-stage filter cascade,
//! adaptive pulse-shape envelope learning, and a chunked producer /
//! worker-pool dispatch model with a serial merge step.

pub mod data;
pub mod engine;
pub mod log;
pub mod math;
pub mod pipeline;

/// Samples per digitizer trace (one sweep of the sampling chip).
pub const TRACE_CELLS: usize = 1024;

/// Full scale of the digitizer input in millivolts.
pub const FULL_SCALE_MV: f64 = 500.0;

/// Number of grid points of the pulse-shape envelope splines.
pub const SHAPE_GRID_POINTS: usize = 4381;

/// Left edge of the pulse-shape envelope region, relative to the pulse
/// extremum \[ns\].
pub const SHAPE_LEFT_NS: f64 = -200.0;

/// Right edge of the pulse-shape envelope region \[ns\].
pub const SHAPE_RIGHT_NS: f64 = 200.0;

/// Width of the pulse-shape envelope region \[ns\].
pub const SHAPE_REGION_NS: f64 = 400.0;

/// Capacity of the area-vs-height scatter ring buffer per channel.
pub const AREA_SCATTER_CAP: usize = 5000;

pub use data::settings::{ChannelId, ChunkSettings, Settings};
pub use data::trace::{RawPair, Trace};
pub use engine::{Engine, EngineError};
pub use math::interpolate::{Interpolant, InterpolationKind};
pub use pipeline::RejectReason;
