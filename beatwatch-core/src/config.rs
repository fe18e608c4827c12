//! Detector configuration.

use std::time::Duration;

use serde::Serialize;

use crate::buffering::EVENT_QUEUE_CAPACITY;
use crate::error::{BeatError, Result};

pub const DEFAULT_BUFFER_SIZE: u32 = 512;
pub const MIN_BUFFER_SIZE: u32 = 64;
pub const MAX_BUFFER_SIZE: u32 = 8192;
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Configuration for [`BeatDetector`](crate::BeatDetector).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorConfig {
    /// Analysis hop size in samples. Valid range [64, 8192]. Default: 512.
    pub buffer_size: u32,
    /// Capture rate requested from the transport (Hz). Default: 44100.
    pub sample_rate: u32,
    /// Capture channels. Only mono is analysed. Default: 1.
    pub channels: u16,
    /// Write beats/onsets to the log sink.
    pub logging: bool,
    /// Print the runtime/totals block of the final summary.
    pub stats: bool,
    /// Run pitch detection on every block.
    pub pitch: bool,
    /// Render the bar indicator instead of plain `BPM:` lines.
    pub visual: bool,
    /// Event queue slots. Default: 1024.
    pub queue_capacity: usize,
    /// Quit-monitor polling period. Default: 50 ms.
    #[serde(skip)]
    pub monitor_interval: Duration,
    /// How long a stop request waits for the transport to confirm `Paused`
    /// before the loop gives up. Default: 2 s.
    #[serde(skip)]
    pub shutdown_grace: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
            logging: true,
            stats: true,
            pitch: false,
            visual: true,
            queue_capacity: EVENT_QUEUE_CAPACITY,
            monitor_interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl DetectorConfig {
    /// FFT window handed to analysis backends: twice the hop size.
    pub fn fft_size(&self) -> u32 {
        self.buffer_size * 2
    }

    /// # Errors
    /// `BeatError::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(BeatError::InvalidConfig(format!(
                "buffer_size out of range [{MIN_BUFFER_SIZE}, {MAX_BUFFER_SIZE}]"
            )));
        }
        if self.sample_rate == 0 {
            return Err(BeatError::InvalidConfig("sample_rate must be non-zero".into()));
        }
        if self.channels != 1 {
            return Err(BeatError::InvalidConfig(format!(
                "only mono capture is supported (got {} channels)",
                self.channels
            )));
        }
        if self.queue_capacity == 0 {
            return Err(BeatError::InvalidConfig("queue_capacity must be non-zero".into()));
        }
        if self.monitor_interval.is_zero() {
            return Err(BeatError::InvalidConfig("monitor_interval must be non-zero".into()));
        }
        Ok(())
    }
}
