//! Consumer-side event handling.
//!
//! Each wake drains the whole queue backlog: timing is stamped, the BPM window
//! updated and every sink fed, in producer order.

use std::time::Duration;

use tracing::{debug, warn};

use crate::buffering::{BpmWindow, EventConsumer};
use crate::engine::process::ProcessShared;
use crate::events::{ProcessingStats, RunSummary};
use crate::sink::EventSink;

pub struct EventDispatcher {
    consumer: EventConsumer,
    shared: ProcessShared,
    sinks: Vec<Box<dyn EventSink>>,
    window: BpmWindow,
    processing_times_ms: Vec<f64>,
    rejections_seen: u64,
    sink_failures: u64,
}

impl EventDispatcher {
    pub fn new(consumer: EventConsumer, shared: ProcessShared, sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self {
            consumer,
            shared,
            sinks,
            window: BpmWindow::new(),
            processing_times_ms: Vec::new(),
            rejections_seen: 0,
            sink_failures: 0,
        }
    }

    /// Drain every pending event. Returns how many were delivered.
    pub fn dispatch(&mut self) -> usize {
        self.report_rejections();

        let Self {
            consumer,
            shared,
            sinks,
            window,
            processing_times_ms,
            sink_failures,
            ..
        } = self;

        let mut delivered = 0;
        for mut event in consumer.drain() {
            let now_ns = shared.clock.elapsed().as_nanos() as u64;
            event.process_ms = now_ns.saturating_sub(event.detected_ns) as f64 / 1_000_000.0;
            processing_times_ms.push(event.process_ms);

            if event.is_beat {
                window.record(event.bpm);
            }
            let average = window.average();

            for sink in sinks.iter_mut() {
                if let Err(e) = sink.handle(&event, average) {
                    *sink_failures += 1;
                    if *sink_failures == 1 {
                        warn!(error = %e, "event sink write failed");
                    }
                }
            }
            delivered += 1;
        }

        if delivered > 0 {
            debug!(delivered, "events dispatched");
        }
        delivered
    }

    /// Final drain plus sink flush; runs once when the loop exits.
    pub fn finish(&mut self) {
        self.dispatch();
        for sink in &mut self.sinks {
            if let Err(e) = sink.flush() {
                warn!(error = %e, "event sink flush failed");
            }
        }
        if self.sink_failures > 1 {
            warn!(failures = self.sink_failures, "event sink writes failed");
        }
    }

    pub fn average_bpm(&self) -> f32 {
        self.window.average()
    }

    pub fn window(&self) -> &BpmWindow {
        &self.window
    }

    pub fn processing_times_ms(&self) -> &[f64] {
        &self.processing_times_ms
    }

    pub fn summary(&self, runtime: Duration, stats_enabled: bool) -> RunSummary {
        RunSummary {
            runtime,
            total_beats: self.shared.totals.beats(),
            total_onsets: self.shared.totals.onsets(),
            processing: ProcessingStats::from_samples(&self.processing_times_ms),
            average_bpm: (!self.window.is_empty()).then(|| self.window.average()),
            rejected_buffers: self.shared.rejections.count(),
            dropped_events: self.consumer.dropped(),
            stats_enabled,
        }
    }

    fn report_rejections(&mut self) {
        let count = self.shared.rejections.count();
        if count == self.rejections_seen {
            return;
        }
        let reason = self
            .shared
            .rejections
            .last()
            .map_or_else(|| "unknown".to_owned(), |e| e.to_string());
        warn!(
            new = count - self.rejections_seen,
            total = count,
            reason = %reason,
            "buffer rejected"
        );
        self.rejections_seen = count;
    }
}
