//! Rolling BPM window used for the moving average shown next to each beat.

/// Number of recent BPM samples kept.
pub const BPM_WINDOW: usize = 10;

/// Fixed-capacity circular buffer of the most recent BPM values.
///
/// Owned by the consumer thread; `record` is O(1) and overwrites the oldest
/// value once full.
#[derive(Debug, Clone, Default)]
pub struct BpmWindow {
    values: [f32; BPM_WINDOW],
    /// Valid entries, saturating at `BPM_WINDOW`.
    count: usize,
    /// Next write position.
    head: usize,
}

impl BpmWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, bpm: f32) {
        self.values[self.head] = bpm;
        self.head = (self.head + 1) % BPM_WINDOW;
        self.count = (self.count + 1).min(BPM_WINDOW);
    }

    /// Mean of the retained values, `0.0` when empty.
    pub fn average(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        self.iter().sum::<f32>() / self.count as f32
    }

    /// Retained values, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        let first = (self.head + BPM_WINDOW - self.count) % BPM_WINDOW;
        (0..self.count).map(move |i| self.values[(first + i) % BPM_WINDOW])
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
