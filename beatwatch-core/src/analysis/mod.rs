//! Analysis engine abstraction.
//!
//! `AnalysisEngine` is the extensibility point for tempo/onset/pitch
//! estimation: swap in [`EnergyEngine`] (default) or any DSP library binding
//! without touching the frame processor.
//!
//! Engines are only ever called from the transport's real-time thread: the
//! frame processor owns the engine and is moved into the transport at connect
//! time. Implementations must not allocate, lock or block per call.

pub mod energy;

pub use energy::EnergyEngine;

/// Result of one tempo-tracking step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TempoReading {
    /// A beat falls inside this block.
    pub is_beat: bool,
    /// Current tempo estimate (BPM), `0.0` until one exists.
    pub bpm: f32,
}

/// Per-block detection functions.
pub trait AnalysisEngine: Send + 'static {
    /// Advance the tempo tracker by one block.
    fn detect_tempo(&mut self, block: &[f32]) -> TempoReading;

    /// Whether an onset (transient) starts inside this block.
    fn detect_onset(&mut self, block: &[f32]) -> bool;

    /// Fundamental frequency in Hz, `0.0` when unvoiced or unmeasurable.
    fn detect_pitch(&mut self, block: &[f32]) -> f32;
}

impl<A: AnalysisEngine + ?Sized> AnalysisEngine for Box<A> {
    fn detect_tempo(&mut self, block: &[f32]) -> TempoReading {
        (**self).detect_tempo(block)
    }

    fn detect_onset(&mut self, block: &[f32]) -> bool {
        (**self).detect_onset(block)
    }

    fn detect_pitch(&mut self, block: &[f32]) -> f32 {
        (**self).detect_pitch(block)
    }
}
