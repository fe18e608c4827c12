//! Detection records and run-level accounting.
//!
//! | Type | Written by | Read by |
//! |------|------------|---------|
//! | [`Event`] | RT callback (built), consumer (`process_ms`) | sinks |
//! | [`RunTotals`] | RT callback | summary |
//! | [`RunSummary`] | consumer thread at teardown | binary / JSON |

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One detection (beat and/or onset) inside a processed block.
///
/// Built entirely on the real-time thread, copied into the event queue, read
/// exactly once by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub is_beat: bool,
    pub is_onset: bool,
    /// Tempo estimate. Only meaningful when `is_beat` is set; onsets carry
    /// the last known tempo.
    pub bpm: f32,
    /// Pitch in Hz, `0.0` when pitch detection is disabled or unmeasured.
    pub pitch_hz: f32,
    /// Run-clock nanoseconds at detection time.
    pub detected_ns: u64,
    /// Detection-to-delivery latency. Filled by the consumer after draining;
    /// always `0.0` on the producer side.
    pub process_ms: f64,
}

impl Event {
    pub fn beat(bpm: f32, pitch_hz: f32, detected_ns: u64) -> Self {
        Self {
            is_beat: true,
            bpm,
            pitch_hz,
            detected_ns,
            ..Self::default()
        }
    }

    pub fn onset(last_bpm: f32, pitch_hz: f32, detected_ns: u64) -> Self {
        Self {
            is_onset: true,
            bpm: last_bpm,
            pitch_hz,
            detected_ns,
            ..Self::default()
        }
    }

    /// BPM as written to the log: `0.0` unless this is a beat.
    pub fn logged_bpm(&self) -> f32 {
        if self.is_beat {
            self.bpm
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// Run totals
// ---------------------------------------------------------------------------

/// Monotonic detection counters, bumped from the RT thread with relaxed
/// atomics. They count every detection, including events later dropped by the
/// queue's overflow policy.
#[derive(Debug, Default)]
pub struct RunTotals {
    beats: AtomicU64,
    onsets: AtomicU64,
}

impl RunTotals {
    pub fn record(&self, is_beat: bool, is_onset: bool) {
        if is_beat {
            self.beats.fetch_add(1, Ordering::Relaxed);
        }
        if is_onset {
            self.onsets.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }

    pub fn onsets(&self) -> u64 {
        self.onsets.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Min / max / mean of the per-event processing times.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub average_ms: f64,
    pub max_ms: f64,
    pub min_ms: f64,
}

impl ProcessingStats {
    /// `None` for an empty sample set.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let (min, max) = samples
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let average = samples.iter().sum::<f64>() / samples.len() as f64;
        Some(Self {
            average_ms: average,
            max_ms: max,
            min_ms: min,
        })
    }
}

/// End-of-run statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    #[serde(rename = "runtimeSecs", serialize_with = "serialize_secs")]
    pub runtime: Duration,
    pub total_beats: u64,
    pub total_onsets: u64,
    pub processing: Option<ProcessingStats>,
    pub average_bpm: Option<f32>,
    pub rejected_buffers: u64,
    pub dropped_events: u64,
    /// Whether the beat/onset/runtime block is rendered by `Display`.
    #[serde(skip)]
    pub stats_enabled: bool,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Final Statistics:")?;
        if self.stats_enabled {
            writeln!(f, "\tTotal runtime: {} seconds", self.runtime.as_secs())?;
            writeln!(f, "\tTotal beats detected: {}", self.total_beats)?;
            writeln!(f, "\tTotal onsets detected: {}", self.total_onsets)?;
        }
        if let Some(p) = &self.processing {
            writeln!(f, "\tAverage processing time: {:.3} ms", p.average_ms)?;
            writeln!(f, "\tMax processing time: {:.3} ms", p.max_ms)?;
            writeln!(f, "\tMin processing time: {:.3} ms", p.min_ms)?;
        }
        if let Some(bpm) = self.average_bpm {
            writeln!(f, "\tFinal average BPM: {bpm:.1}")?;
        }
        if self.rejected_buffers > 0 {
            writeln!(f, "\tRejected buffers: {}", self.rejected_buffers)?;
        }
        if self.dropped_events > 0 {
            writeln!(f, "\tDropped events (queue overflow): {}", self.dropped_events)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onset_only_event_logs_zero_bpm() {
        let ev = Event::onset(128.0, 0.0, 10);
        assert!(!ev.is_beat);
        assert_eq!(ev.bpm, 128.0);
        assert_eq!(ev.logged_bpm(), 0.0);
    }

    #[test]
    fn totals_count_beats_and_onsets_independently() {
        let totals = RunTotals::default();
        totals.record(true, true);
        totals.record(false, true);
        totals.record(false, false);
        assert_eq!(totals.beats(), 1);
        assert_eq!(totals.onsets(), 2);
    }

    #[test]
    fn processing_stats_min_max_mean() {
        assert!(ProcessingStats::from_samples(&[]).is_none());
        let stats = ProcessingStats::from_samples(&[2.0, 1.0, 6.0]).expect("non-empty");
        assert_eq!(stats.min_ms, 1.0);
        assert_eq!(stats.max_ms, 6.0);
        assert!((stats.average_ms - 3.0).abs() < 1e-12);
    }

    #[test]
    fn summary_serializes_with_camel_case_fields() {
        let summary = RunSummary {
            runtime: Duration::from_millis(12_400),
            total_beats: 42,
            total_onsets: 57,
            processing: ProcessingStats::from_samples(&[0.5, 1.5]),
            average_bpm: Some(121.5),
            rejected_buffers: 0,
            dropped_events: 3,
            stats_enabled: true,
        };

        let json = serde_json::to_value(&summary).expect("serialize summary");
        assert_eq!(json["runtimeSecs"], 12);
        assert_eq!(json["totalBeats"], 42);
        assert_eq!(json["totalOnsets"], 57);
        assert_eq!(json["droppedEvents"], 3);
        assert_eq!(json["processing"]["maxMs"], 1.5);
        assert!(json.get("statsEnabled").is_none());
    }

    #[test]
    fn summary_display_hides_totals_when_stats_disabled() {
        let summary = RunSummary {
            runtime: Duration::from_secs(3),
            total_beats: 9,
            total_onsets: 9,
            processing: None,
            average_bpm: Some(90.0),
            rejected_buffers: 0,
            dropped_events: 0,
            stats_enabled: false,
        };
        let text = summary.to_string();
        assert!(!text.contains("Total beats"));
        assert!(text.contains("Final average BPM: 90.0"));
    }
}
