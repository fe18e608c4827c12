//! Real-time callback body.
//!
//! Runs on the transport's RT thread once per delivered buffer. Everything it
//! touches was allocated before connect: the block scratch, the event queue
//! slots and the atomic counters. No locks, no logging, no allocation.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::analysis::AnalysisEngine;
use crate::audio::{mono_f32_bytes, BufferLease, BufferQueue, ProcessCallback, ViewError};
use crate::buffering::block::BlockAccumulator;
use crate::buffering::EventProducer;
use crate::engine::main_loop::EventSignal;
use crate::events::{Event, RunTotals};
use crate::shutdown::SharedFlags;

/// Buffers skipped by layout validation. Written by the RT thread, read by
/// the consumer, which does the logging.
#[derive(Debug, Default)]
pub struct RejectionStats {
    count: AtomicU64,
    last: AtomicU8,
}

impl RejectionStats {
    pub fn record(&self, error: ViewError) {
        self.last.store(error.code(), Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Release);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Most recent rejection reason.
    pub fn last(&self) -> Option<ViewError> {
        ViewError::from_code(self.last.load(Ordering::Relaxed))
    }
}

/// State shared between the RT callback and the consumer.
#[derive(Debug, Clone)]
pub struct ProcessShared {
    pub totals: Arc<RunTotals>,
    pub rejections: Arc<RejectionStats>,
    /// Origin of `Event::detected_ns`.
    pub clock: Instant,
}

impl ProcessShared {
    pub fn new(clock: Instant) -> Self {
        Self {
            totals: Arc::new(RunTotals::default()),
            rejections: Arc::new(RejectionStats::default()),
            clock,
        }
    }
}

/// Per-buffer analysis: validate, cut into blocks, detect, publish.
pub struct FrameProcessor<A: AnalysisEngine> {
    engine: A,
    blocks: BlockAccumulator,
    producer: EventProducer,
    signal: EventSignal,
    flags: SharedFlags,
    shared: ProcessShared,
    stride: usize,
    pitch: bool,
    last_bpm: f32,
}

impl<A: AnalysisEngine> FrameProcessor<A> {
    /// # Parameters
    /// - `block_size`: samples per analysis call.
    /// - `stride`: expected frame stride in bytes; mismatching buffers are
    ///   rejected.
    /// - `pitch`: run pitch detection on every block.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: A,
        block_size: usize,
        stride: usize,
        pitch: bool,
        producer: EventProducer,
        signal: EventSignal,
        flags: SharedFlags,
        shared: ProcessShared,
    ) -> Self {
        Self {
            engine,
            blocks: BlockAccumulator::new(block_size),
            producer,
            signal,
            flags,
            shared,
            stride,
            pitch,
            last_bpm: 0.0,
        }
    }
}

impl<A: AnalysisEngine> ProcessCallback for FrameProcessor<A> {
    fn process(&mut self, buffers: &mut dyn BufferQueue) {
        if self.flags.quit_requested() {
            return;
        }
        let Some(lease) = BufferLease::acquire(buffers) else {
            return;
        };

        let bytes = match mono_f32_bytes(lease.buffer(), self.stride) {
            Ok(bytes) => bytes,
            Err(rejected) => {
                self.shared.rejections.record(rejected);
                self.signal.signal();
                return;
            }
        };

        let Self {
            engine,
            blocks,
            producer,
            signal,
            shared,
            pitch,
            last_bpm,
            ..
        } = self;

        blocks.push_le_f32(bytes, |block| {
            let tempo = engine.detect_tempo(block);
            let is_onset = engine.detect_onset(block);
            let pitch_hz = if *pitch { engine.detect_pitch(block) } else { 0.0 };

            shared.totals.record(tempo.is_beat, is_onset);
            if tempo.is_beat {
                *last_bpm = tempo.bpm;
            }
            if !(tempo.is_beat || is_onset) {
                return;
            }

            let detected_ns = shared.clock.elapsed().as_nanos() as u64;
            let event = if tempo.is_beat {
                Event {
                    is_onset,
                    ..Event::beat(tempo.bpm, pitch_hz, detected_ns)
                }
            } else {
                Event::onset(*last_bpm, pitch_hz, detected_ns)
            };
            producer.push(event);
            signal.signal();
        });
        // `lease` drops here and hands the buffer back.
    }
}
