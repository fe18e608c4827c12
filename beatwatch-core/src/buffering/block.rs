//! Fixed-size analysis blocks cut from transport buffers.

/// Bytes per mono `f32` sample.
pub const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Reassembles little-endian `f32` PCM bytes into blocks of exactly
/// `block_size` samples.
///
/// Transport buffers rarely line up with the analysis hop size, so samples
/// left over after the last full block are kept and completed by the next
/// buffer. The scratch block is allocated once; `push_le_f32` never allocates,
/// which keeps it usable from the RT callback.
#[derive(Debug, Clone)]
pub struct BlockAccumulator {
    block: Vec<f32>,
    filled: usize,
}

impl BlockAccumulator {
    pub fn new(block_size: usize) -> Self {
        Self {
            block: vec![0.0; block_size.max(1)],
            filled: 0,
        }
    }

    /// Samples waiting for the next full block.
    pub fn pending(&self) -> usize {
        self.filled
    }

    /// Feed raw sample bytes and call `on_block` once per completed block.
    /// Trailing bytes that do not form a whole sample are ignored; callers
    /// validate alignment first. Returns the number of blocks emitted.
    pub fn push_le_f32(&mut self, bytes: &[u8], mut on_block: impl FnMut(&[f32])) -> usize {
        let mut emitted = 0;
        for raw in bytes.chunks_exact(SAMPLE_BYTES) {
            self.block[self.filled] = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            self.filled += 1;
            if self.filled == self.block.len() {
                on_block(&self.block);
                self.filled = 0;
                emitted += 1;
            }
        }
        emitted
    }
}
