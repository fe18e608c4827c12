//! Level-based default backend.
//!
//! ## Algorithm
//!
//! 1. Block energy = mean square of the samples.
//! 2. A transient is a block whose energy exceeds both an absolute floor and
//!    `ratio` times the running (exponentially decayed) energy average, outside
//!    a short refractory window.
//! 3. Onsets are transients. Beats are transients spaced 0.3–1.5 s apart
//!    (40–200 BPM); the BPM estimate is a smoothed inverse of that spacing.
//! 4. Pitch is the rising zero-crossing rate, gated by the energy floor.
//!
//! Deliberately crude; it exists so the binary runs end-to-end without an
//! external DSP library.

use super::{AnalysisEngine, TempoReading};

const MIN_BEAT_INTERVAL_SECS: f64 = 0.3;
const MAX_BEAT_INTERVAL_SECS: f64 = 1.5;
const REFRACTORY_SECS: f32 = 0.1;
const AVERAGE_DECAY: f32 = 0.9;
const BPM_SMOOTHING: f32 = 0.2;

#[derive(Debug, Clone)]
struct TransientTracker {
    average: f32,
    cooldown: u32,
    refractory: u32,
}

impl TransientTracker {
    fn new(refractory: u32) -> Self {
        Self {
            average: 0.0,
            cooldown: 0,
            refractory,
        }
    }

    fn step(&mut self, energy: f32, ratio: f32, floor: f32) -> bool {
        let hit = self.cooldown == 0 && energy > floor && energy > self.average * ratio;
        self.average = self.average * AVERAGE_DECAY + energy * (1.0 - AVERAGE_DECAY);
        if hit {
            self.cooldown = self.refractory;
        } else {
            self.cooldown = self.cooldown.saturating_sub(1);
        }
        hit
    }
}

/// Energy-ratio transient detector with a tempo estimate on top.
#[derive(Debug, Clone)]
pub struct EnergyEngine {
    sample_rate: f32,
    block_secs: f64,
    /// Transient threshold relative to the running average.
    ratio: f32,
    /// Absolute energy floor (mean square) below which nothing fires.
    floor: f32,
    onset: TransientTracker,
    tempo: TransientTracker,
    /// Seconds of audio seen by the tempo tracker.
    clock_secs: f64,
    last_transient_secs: Option<f64>,
    bpm: f32,
}

impl EnergyEngine {
    /// # Parameters
    /// - `block_size`: samples per block (the analysis hop).
    /// - `sample_rate`: capture rate in Hz.
    pub fn new(block_size: u32, sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(1) as f32;
        let block_secs = f64::from(block_size.max(1)) / f64::from(sample_rate);
        let refractory = ((REFRACTORY_SECS as f64 / block_secs).ceil() as u32).max(1);
        Self {
            sample_rate,
            block_secs,
            ratio: 1.5,
            floor: 1e-4,
            onset: TransientTracker::new(refractory),
            tempo: TransientTracker::new(refractory),
            clock_secs: 0.0,
            last_transient_secs: None,
            bpm: 0.0,
        }
    }

    fn energy(block: &[f32]) -> f32 {
        if block.is_empty() {
            return 0.0;
        }
        block.iter().map(|s| s * s).sum::<f32>() / block.len() as f32
    }
}

impl AnalysisEngine for EnergyEngine {
    fn detect_tempo(&mut self, block: &[f32]) -> TempoReading {
        self.clock_secs += self.block_secs;
        let energy = Self::energy(block);
        if !self.tempo.step(energy, self.ratio, self.floor) {
            return TempoReading {
                is_beat: false,
                bpm: self.bpm,
            };
        }

        let now = self.clock_secs;
        let previous = self.last_transient_secs.replace(now);
        let Some(previous) = previous else {
            return TempoReading {
                is_beat: false,
                bpm: self.bpm,
            };
        };

        let interval = now - previous;
        if !(MIN_BEAT_INTERVAL_SECS..=MAX_BEAT_INTERVAL_SECS).contains(&interval) {
            return TempoReading {
                is_beat: false,
                bpm: self.bpm,
            };
        }

        let instant_bpm = (60.0 / interval) as f32;
        self.bpm = if self.bpm == 0.0 {
            instant_bpm
        } else {
            self.bpm * (1.0 - BPM_SMOOTHING) + instant_bpm * BPM_SMOOTHING
        };
        TempoReading {
            is_beat: true,
            bpm: self.bpm,
        }
    }

    fn detect_onset(&mut self, block: &[f32]) -> bool {
        let energy = Self::energy(block);
        self.onset.step(energy, self.ratio, self.floor)
    }

    fn detect_pitch(&mut self, block: &[f32]) -> f32 {
        if Self::energy(block) < self.floor {
            return 0.0;
        }

        let mut first = None;
        let mut last = 0usize;
        let mut crossings = 0u32;
        for (idx, pair) in block.windows(2).enumerate() {
            if pair[0] < 0.0 && pair[1] >= 0.0 {
                first.get_or_insert(idx);
                last = idx;
                crossings += 1;
            }
        }

        match first {
            Some(first) if crossings >= 2 && last > first => {
                let span_secs = (last - first) as f32 / self.sample_rate;
                (crossings - 1) as f32 / span_secs
            }
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 44_100;
    const BLOCK: u32 = 512;

    fn silence() -> Vec<f32> {
        vec![0.0; BLOCK as usize]
    }

    fn click() -> Vec<f32> {
        vec![0.8; BLOCK as usize]
    }

    fn sine(freq: f64) -> Vec<f32> {
        (0..BLOCK)
            .map(|n| {
                let t = f64::from(n) / f64::from(RATE);
                ((2.0 * std::f64::consts::PI * freq * t).sin() * 0.5) as f32
            })
            .collect()
    }

    #[test]
    fn silence_has_no_onsets_or_beats() {
        let mut engine = EnergyEngine::new(BLOCK, RATE);
        for _ in 0..100 {
            assert!(!engine.detect_onset(&silence()));
            assert!(!engine.detect_tempo(&silence()).is_beat);
        }
    }

    #[test]
    fn loud_block_after_silence_is_an_onset() {
        let mut engine = EnergyEngine::new(BLOCK, RATE);
        for _ in 0..10 {
            engine.detect_onset(&silence());
        }
        assert!(engine.detect_onset(&click()));
        // refractory: an immediate repeat does not fire again
        assert!(!engine.detect_onset(&click()));
    }

    #[test]
    fn periodic_clicks_converge_on_their_tempo() {
        let mut engine = EnergyEngine::new(BLOCK, RATE);
        // 43 blocks of 512 samples at 44.1 kHz ≈ 0.499 s ≈ 120 BPM
        let mut beats = Vec::new();
        for n in 0..(43 * 6) {
            let block = if n % 43 == 0 { click() } else { silence() };
            let reading = engine.detect_tempo(&block);
            if reading.is_beat {
                beats.push(reading.bpm);
            }
        }
        assert!(beats.len() >= 4, "beats={beats:?}");
        let last = *beats.last().expect("at least one beat");
        assert!((last - 120.0).abs() < 2.0, "bpm={last}");
    }

    #[test]
    fn pitch_of_a_sine_block() {
        let mut engine = EnergyEngine::new(BLOCK, RATE);
        let hz = engine.detect_pitch(&sine(441.0));
        assert!((hz - 441.0).abs() < 5.0, "hz={hz}");
        assert_eq!(engine.detect_pitch(&silence()), 0.0);
    }
}
