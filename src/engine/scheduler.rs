//! The producer loop: acquires pulse pairs, dispatches them (inline in
//! single-threaded mode, as chunks mapped over the worker pool in
//! multi-threaded mode) and folds results into the aggregates in a
//! strictly serial merge step.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;

use crate::data::settings::{ChunkSettings, Settings};
use crate::data::trace::RawPair;
use crate::engine::source::{AcquireError, PulseSource};
use crate::engine::{EngineError, EngineShared};
use crate::pipeline::pair::{process_pair, ChunkContext, PairOutput};
use crate::pipeline::shape::ShapeRecord;
use crate::pipeline::RejectReason;

/// Poll interval of the pause/availability handshakes.
const POLL_SLEEP: Duration = Duration::from_micros(200);

pub(crate) fn run(
    shared: &EngineShared,
    settings: &Settings,
    source: &mut dyn PulseSource,
) -> Result<(), EngineError> {
    source
        .start()
        .map_err(|e| EngineError::SourceUnavailable(e.to_string()))?;

    if settings.single_threaded {
        run_single_threaded(shared, settings, source)
    } else {
        run_multi_threaded(shared, settings, source)
    }
}

/// Outcome of one acquisition attempt.
enum Acquired {
    Pair,
    Dropped,
    Finished,
}

/// Block on the pause handshake and the source's availability poll.
/// Returns `false` when a stop was requested meanwhile.
fn wait_for_event(shared: &EngineShared, source: &mut dyn PulseSource) -> bool {
    loop {
        if !shared.running.load(Ordering::Acquire) {
            return false;
        }
        if shared.paused.load(Ordering::Acquire) {
            std::thread::sleep(POLL_SLEEP);
            continue;
        }
        if source.is_event_available() {
            return true;
        }
        std::thread::sleep(POLL_SLEEP);
    }
}

fn acquire(shared: &EngineShared, source: &mut dyn PulseSource, pair: &mut RawPair) -> Acquired {
    match source.receive_pair(pair) {
        Ok(()) => {
            let mut rates = shared.rates.lock().expect("rates lock");
            rates.count_pairs(1);
            if rates.maybe_roll() {
                let report = rates.report();
                log::debug!(
                    "pair rate {:.0} Hz (avg {:.0} Hz)",
                    report.pairs.current_hz,
                    report.pairs.avg_hz
                );
            }
            Acquired::Pair
        }
        Err(AcquireError::Exhausted) => Acquired::Finished,
        Err(AcquireError::Start(_)) => {
            unreachable!("AcquireError::Start is only produced by PulseSource::start")
        }
        Err(AcquireError::Transfer(e)) => {
            log::debug!("pair dropped: {e}");
            shared
                .aggregates
                .lock()
                .expect("aggregates lock")
                .rejects
                .record(RejectReason::Acquisition);
            Acquired::Dropped
        }
    }
}

/// Capture the per-chunk immutable settings view.
fn capture_snapshot(shared: &EngineShared, settings: &Settings) -> Arc<ChunkSettings> {
    let shape = shared.shape.lock().expect("shape lock");
    ChunkSettings::capture(
        settings,
        shape.envelope_a.clone(),
        shape.envelope_b.clone(),
        shape.recorder_a.is_recording(),
        shape.recorder_b.is_recording(),
    )
}

/// Serial merge of one result batch into the live aggregates.
fn merge_outputs(shared: &EngineShared, outputs: &[PairOutput]) {
    let (mut ab, mut ba, mut prompt, mut merged) = (0u64, 0u64, 0u64, 0u64);
    {
        let mut agg = shared.aggregates.lock().expect("aggregates lock");
        for out in outputs {
            agg.merge(out);
            ab += u64::from(out.ab.is_some());
            ba += u64::from(out.ba.is_some());
            prompt += u64::from(out.prompt.is_some());
            merged += u64::from(out.merged.is_some());
        }
    }
    shared
        .rates
        .lock()
        .expect("rates lock")
        .count_spectra(ab, ba, prompt, merged);

    absorb_shape_records(shared, outputs.iter().map(|o| (&o.shape_a, &o.shape_b)));
}

/// Feed captured envelope-learning records to the recorders; when a
/// recorder completes, publish the learned envelope.
fn absorb_shape_records<'a>(
    shared: &EngineShared,
    records: impl Iterator<Item = (&'a Option<ShapeRecord>, &'a Option<ShapeRecord>)>,
) {
    let mut completed_a = false;
    let mut completed_b = false;
    {
        let mut shape = shared.shape.lock().expect("shape lock");
        for (rec_a, rec_b) in records {
            if let Some(rec) = rec_a {
                if shape.recorder_a.absorb(rec) {
                    completed_a = true;
                }
            }
            if let Some(rec) = rec_b {
                if shape.recorder_b.absorb(rec) {
                    completed_b = true;
                }
            }
        }
        if completed_a {
            shape.envelope_a = shape.recorder_a.build_envelope().map(Arc::new);
            shape.touch();
        }
        if completed_b {
            shape.envelope_b = shape.recorder_b.build_envelope().map(Arc::new);
            shape.touch();
        }
    }
    if completed_a || completed_b {
        let mut log = shared.run_log.lock().expect("run log lock");
        if completed_a {
            log.add_entry("Envelope learned", "channel A");
        }
        if completed_b {
            log.add_entry("Envelope learned", "channel B");
        }
    }
}

/// Diagnostic mode: one pair at a time, pipeline inline, aggregates
/// mutated directly.
fn run_single_threaded(
    shared: &EngineShared,
    settings: &Settings,
    source: &mut dyn PulseSource,
) -> Result<(), EngineError> {
    let mut pair = RawPair::default();
    let mut ctx: Option<ChunkContext> = None;
    let mut ctx_version = u64::MAX;

    loop {
        if !wait_for_event(shared, source) {
            break;
        }
        match acquire(shared, source, &mut pair) {
            Acquired::Pair => {}
            Acquired::Dropped => continue,
            Acquired::Finished => break,
        }

        // the shape-filter state is the only input that can change
        // under a running producer; rebuild the context when it did
        let version = shared.shape.lock().expect("shape lock").version;
        if ctx.is_none() || ctx_version != version {
            ctx = Some(ChunkContext::new(capture_snapshot(shared, settings)));
            ctx_version = version;
        }

        let out = process_pair(&mut pair, ctx.as_ref().expect("context built"));
        merge_outputs(shared, std::slice::from_ref(&out));
    }
    Ok(())
}

/// Throughput mode: deep-copied pairs staged into chunks, one chunk in
/// flight on the worker pool, serial merge between chunks in submit
/// order.
fn run_multi_threaded(
    shared: &EngineShared,
    settings: &Settings,
    source: &mut dyn PulseSource,
) -> Result<(), EngineError> {
    let chunk_size = settings.chunk_size;
    let (tx, rx) = mpsc::channel::<Vec<PairOutput>>();

    let mut staging: Vec<RawPair> = Vec::with_capacity(chunk_size);
    let mut queued: VecDeque<Vec<RawPair>> = VecDeque::new();
    let mut in_flight = false;
    let mut exhausted = false;
    let mut pair = RawPair::default();

    loop {
        // harvest a completed chunk without blocking the producer
        if in_flight {
            if let Ok(outputs) = rx.try_recv() {
                merge_outputs(shared, &outputs);
                in_flight = false;
            }
        }
        // exactly one chunk in flight; submit in accumulation order
        if !in_flight {
            if let Some(chunk) = queued.pop_front() {
                submit_chunk(shared, settings, chunk, tx.clone());
                in_flight = true;
            }
        }

        if !wait_for_event(shared, source) {
            break;
        }
        match acquire(shared, source, &mut pair) {
            Acquired::Pair => {}
            Acquired::Dropped => continue,
            Acquired::Finished => {
                exhausted = true;
                break;
            }
        }

        staging.push(pair.clone());
        if staging.len() == chunk_size {
            queued.push_back(std::mem::replace(
                &mut staging,
                Vec::with_capacity(chunk_size),
            ));
        }
    }

    // never drop an in-flight chunk: await and merge it
    if in_flight {
        if let Ok(outputs) = rx.recv() {
            merge_outputs(shared, &outputs);
        }
    }

    if exhausted {
        // a drained source is a clean end of input, not a cancel:
        // everything acquired is still dispatched and merged, in order
        if !staging.is_empty() {
            queued.push_back(std::mem::take(&mut staging));
        }
        for chunk in queued.drain(..) {
            submit_chunk(shared, settings, chunk, tx.clone());
            if let Ok(outputs) = rx.recv() {
                merge_outputs(shared, &outputs);
            }
        }
    } else if !queued.is_empty() || !staging.is_empty() {
        // user stop: pairs never handed to the pool are discarded
        log::debug!(
            "discarding {} undispatched pairs at stop",
            queued.iter().map(Vec::len).sum::<usize>() + staging.len()
        );
    }
    Ok(())
}

fn submit_chunk(
    shared: &EngineShared,
    settings: &Settings,
    chunk: Vec<RawPair>,
    tx: mpsc::Sender<Vec<PairOutput>>,
) {
    let snapshot = capture_snapshot(shared, settings);
    rayon::spawn(move || {
        let ctx = ChunkContext::new(snapshot);
        let outputs: Vec<PairOutput> = chunk
            .into_par_iter()
            .map(|mut pair| process_pair(&mut pair, &ctx))
            .collect();
        // the producer may have gone away on stop; nothing to do then
        let _ = tx.send(outputs);
    });
}
