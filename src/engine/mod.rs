//! The engine facade: one owned instance holding all acquisition
//! state, driving the producer loop and handing read-only snapshots to
//! the host application.

pub mod rates;
pub mod scheduler;
pub mod source;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::data::aggregate::Aggregates;
use crate::data::settings::{ChannelId, Settings};
use crate::log::runlog::RunLog;
use crate::pipeline::shape::{ShapeEnvelopeData, ShapeRecorder};
use crate::TRACE_CELLS;
use rates::{RateReport, RateTracker};
use source::PulseSource;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid acquisition geometry: {0}")]
    InvalidGeometry(String),
    #[error("pulse source unavailable: {0}")]
    SourceUnavailable(String),
}

/// Shape-filter state shared between the producer, the merge step and
/// the UI: the per-channel recorders and the learned envelopes.
#[derive(Debug, Default)]
pub struct ShapeFilterState {
    pub recorder_a: ShapeRecorder,
    pub recorder_b: ShapeRecorder,
    pub envelope_a: Option<Arc<ShapeEnvelopeData>>,
    pub envelope_b: Option<Arc<ShapeEnvelopeData>>,
    /// Bumped on every change so cached chunk contexts know to rebuild.
    pub version: u64,
}

impl ShapeFilterState {
    pub(crate) fn touch(&mut self) {
        self.version += 1;
    }
}

/// Shared handles between the engine, the producer loop and monitors.
#[derive(Clone)]
pub(crate) struct EngineShared {
    pub aggregates: Arc<Mutex<Aggregates>>,
    pub shape: Arc<Mutex<ShapeFilterState>>,
    pub rates: Arc<Mutex<RateTracker>>,
    pub run_log: Arc<Mutex<RunLog>>,
    pub running: Arc<AtomicBool>,
    pub paused: Arc<AtomicBool>,
}

/// Cloneable read/control handle for the host application. Snapshot
/// accessors hold their mutex only for the copy.
#[derive(Clone)]
pub struct EngineMonitor {
    shared: EngineShared,
}

impl EngineMonitor {
    /// Copy-on-read view of all aggregates.
    pub fn snapshot(&self) -> Aggregates {
        self.shared.aggregates.lock().expect("aggregates lock").clone()
    }

    pub fn rates(&self) -> RateReport {
        self.shared.rates.lock().expect("rates lock").report()
    }

    /// Request cooperative stop; the outstanding chunk is merged before
    /// the run loop returns.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Arm envelope recording for `target` accepted pulses on one
    /// channel.
    pub fn start_shape_recording(&self, ch: ChannelId, target: usize) {
        let mut shape = self.shared.shape.lock().expect("shape lock");
        match ch {
            ChannelId::A => shape.recorder_a.start(target),
            ChannelId::B => shape.recorder_b.start(target),
        }
        shape.touch();
        drop(shape);
        self.shared
            .run_log
            .lock()
            .expect("run log lock")
            .add_entry(
                "Envelope recording started",
                &format!("channel {ch}, {target} pulses"),
            );
    }

    pub fn stop_shape_recording(&self, ch: ChannelId) {
        let mut shape = self.shared.shape.lock().expect("shape lock");
        match ch {
            ChannelId::A => shape.recorder_a.stop(),
            ChannelId::B => shape.recorder_b.stop(),
        }
        shape.touch();
    }

    pub fn is_recording(&self, ch: ChannelId) -> bool {
        let shape = self.shared.shape.lock().expect("shape lock");
        match ch {
            ChannelId::A => shape.recorder_a.is_recording(),
            ChannelId::B => shape.recorder_b.is_recording(),
        }
    }

    /// Recording progress in percent.
    pub fn recording_progress(&self, ch: ChannelId) -> u32 {
        let shape = self.shared.shape.lock().expect("shape lock");
        match ch {
            ChannelId::A => shape.recorder_a.progress(),
            ChannelId::B => shape.recorder_b.progress(),
        }
    }

    /// The learned envelope traces, if any.
    pub fn envelope(&self, ch: ChannelId) -> Option<Arc<ShapeEnvelopeData>> {
        let shape = self.shared.shape.lock().expect("shape lock");
        match ch {
            ChannelId::A => shape.envelope_a.clone(),
            ChannelId::B => shape.envelope_b.clone(),
        }
    }
}

/// The processing engine. Owns settings, aggregates, the shape-filter
/// state and the session log; `run` blocks the calling thread as the
/// producer loop.
pub struct Engine {
    settings: Settings,
    shared: EngineShared,
}

impl Engine {
    pub fn new(settings: Settings) -> Result<Self, EngineError> {
        validate_settings(&settings)?;
        let shared = EngineShared {
            aggregates: Arc::new(Mutex::new(Aggregates::new(&settings))),
            shape: Arc::new(Mutex::new(ShapeFilterState::default())),
            rates: Arc::new(Mutex::new(RateTracker::new())),
            run_log: Arc::new(Mutex::new(RunLog::new())),
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
        };
        Ok(Self { settings, shared })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the settings between runs. A changed spectrum geometry
    /// re-creates (and thereby clears) the affected aggregates.
    pub fn set_settings(&mut self, settings: Settings) -> Result<(), EngineError> {
        validate_settings(&settings)?;
        let geometry_changed = {
            let old = &self.settings;
            old.spectrum_ab.channel_count != settings.spectrum_ab.channel_count
                || old.spectrum_ba.channel_count != settings.spectrum_ba.channel_count
                || old.spectrum_prompt.channel_count != settings.spectrum_prompt.channel_count
                || old.spectrum_merged.channel_count != settings.spectrum_merged.channel_count
                || old.rise_a.binning != settings.rise_a.binning
                || old.rise_b.binning != settings.rise_b.binning
        };
        if geometry_changed {
            *self.shared.aggregates.lock().expect("aggregates lock") =
                Aggregates::new(&settings);
            self.log("Spectrum geometry changed", "aggregates re-created");
        }
        self.settings = settings;
        Ok(())
    }

    /// Handle for the UI thread; valid across runs.
    pub fn monitor(&self) -> EngineMonitor {
        EngineMonitor {
            shared: self.shared.clone(),
        }
    }

    /// Drive acquisition until the source is exhausted or a monitor
    /// requests stop. Blocks the calling thread; spectra accumulate
    /// across consecutive runs.
    pub fn run(&mut self, source: &mut dyn PulseSource) -> Result<(), EngineError> {
        self.shared.running.store(true, Ordering::Release);
        self.shared.paused.store(false, Ordering::Release);
        self.shared.rates.lock().expect("rates lock").reset();
        self.log(
            "Run started",
            &format!(
                "{}, chunk size {}",
                if self.settings.single_threaded {
                    "single-threaded"
                } else {
                    "multi-threaded"
                },
                self.settings.chunk_size
            ),
        );

        let result = scheduler::run(&self.shared, &self.settings, source);

        self.shared.running.store(false, Ordering::Release);
        let pairs = self
            .shared
            .aggregates
            .lock()
            .expect("aggregates lock")
            .pairs_processed;
        self.log("Run stopped", &format!("{pairs} pairs processed"));
        result
    }

    /// Clear every spectrum and statistic; rate averaging is untouched
    /// (independent operations).
    pub fn reset_spectra(&mut self) {
        self.shared.aggregates.lock().expect("aggregates lock").reset();
        self.log("Spectra reset", "");
    }

    /// Install an envelope restored by the host (the envelope is
    /// persisted across runs by a collaborator).
    pub fn set_envelope(&mut self, ch: ChannelId, data: ShapeEnvelopeData) {
        let mut shape = self.shared.shape.lock().expect("shape lock");
        match ch {
            ChannelId::A => shape.envelope_a = Some(Arc::new(data)),
            ChannelId::B => shape.envelope_b = Some(Arc::new(data)),
        }
        shape.touch();
        drop(shape);
        self.log("Envelope installed", &format!("channel {ch}"));
    }

    pub fn run_log_text(&self) -> String {
        self.shared.run_log.lock().expect("run log lock").to_text()
    }

    pub fn run_log_json(&self) -> String {
        self.shared.run_log.lock().expect("run log lock").to_json()
    }

    fn log(&self, operation: &str, detail: &str) {
        self.shared
            .run_log
            .lock()
            .expect("run log lock")
            .add_entry(operation, detail);
    }
}

fn validate_settings(s: &Settings) -> Result<(), EngineError> {
    if s.stop_cell > TRACE_CELLS || s.start_cell >= s.stop_cell {
        return Err(EngineError::InvalidGeometry(format!(
            "ROI [{}, {}) outside the {TRACE_CELLS}-cell trace",
            s.start_cell, s.stop_cell
        )));
    }
    if s.cell_width() < 32 {
        return Err(EngineError::InvalidGeometry(
            "ROI narrower than 32 cells leaves no pre-pulse context".into(),
        ));
    }
    for (name, cfd) in [("A", s.cfd_a), ("B", s.cfd_b)] {
        if !(cfd > 0.0 && cfd < 1.0) {
            return Err(EngineError::InvalidGeometry(format!(
                "CFD fraction of channel {name} must lie in (0, 1), got {cfd}"
            )));
        }
    }
    if s.intra_render_points == 0 {
        return Err(EngineError::InvalidGeometry(
            "intra render points must be at least 1".into(),
        ));
    }
    if s.chunk_size == 0 {
        return Err(EngineError::InvalidGeometry("chunk size must be at least 1".into()));
    }
    for (name, geo) in [
        ("AB", &s.spectrum_ab),
        ("BA", &s.spectrum_ba),
        ("prompt", &s.spectrum_prompt),
        ("merged", &s.spectrum_merged),
    ] {
        if geo.channel_count == 0 || geo.scaler_ns <= 0.0 {
            return Err(EngineError::InvalidGeometry(format!(
                "spectrum {name}: channel count {} / scaler {} ns",
                geo.channel_count, geo.scaler_ns
            )));
        }
    }
    for (name, rise) in [("A", &s.rise_a), ("B", &s.rise_b)] {
        if rise.binning == 0 || rise.scale_ns <= 0.0 {
            return Err(EngineError::InvalidGeometry(format!(
                "rise-time spectrum {name}: {} bins / scale {} ns",
                rise.binning, rise.scale_ns
            )));
        }
    }
    Ok(())
}
