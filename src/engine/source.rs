//! Upstream pulse sources.
//!
//! The digitizer driver and the pulse generator are external
//! collaborators; the engine consumes them through this trait.

use thiserror::Error;

use crate::data::trace::RawPair;

#[derive(Error, Debug)]
pub enum AcquireError {
    /// The source could not be armed at run start; the run never
    /// begins.
    #[error("failed to start acquisition: {0}")]
    Start(String),
    /// Transient failure delivering one pair; the pair is dropped and
    /// acquisition continues.
    #[error("transfer failed: {0}")]
    Transfer(String),
    /// The source has no further pairs (stream sources); the run ends.
    #[error("source exhausted")]
    Exhausted,
}

/// A producer of trigger-aligned trace pairs.
pub trait PulseSource: Send {
    /// Arm the source at run start. Hardware sources start the sampling
    /// sweep here; generators have nothing to do.
    fn start(&mut self) -> Result<(), AcquireError> {
        Ok(())
    }

    /// Poll whether an event is ready to be fetched. The producer spins
    /// on this between pairs; hardware sources map it onto the board's
    /// event flag, generators simply return `true`.
    fn is_event_available(&mut self) -> bool {
        true
    }

    /// Fill `pair` with the next trace pair.
    fn receive_pair(&mut self, pair: &mut RawPair) -> Result<(), AcquireError>;
}

/// Replay a fixed corpus of pairs, then report exhaustion. Useful for
/// stream replay and deterministic tests.
pub struct VecSource {
    pairs: Vec<RawPair>,
    next: usize,
}

impl VecSource {
    pub fn new(pairs: Vec<RawPair>) -> Self {
        Self { pairs, next: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.pairs.len() - self.next
    }
}

impl PulseSource for VecSource {
    fn receive_pair(&mut self, pair: &mut RawPair) -> Result<(), AcquireError> {
        match self.pairs.get(self.next) {
            Some(p) => {
                pair.clone_from(p);
                self.next += 1;
                Ok(())
            }
            None => Err(AcquireError::Exhausted),
        }
    }
}
