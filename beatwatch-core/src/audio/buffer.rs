//! Transport buffer handles and layout validation.
//!
//! The RT callback borrows buffers from the transport with
//! [`BufferLease::acquire`]; the lease hands the buffer back on drop, so every
//! exit path of the callback returns it.

pub use crate::buffering::block::SAMPLE_BYTES;

/// Transport-assigned buffer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferId(pub usize);

/// Location of the valid bytes inside a buffer's data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMeta {
    pub offset: usize,
    pub size: usize,
    pub stride: usize,
}

/// Borrowed view of one transport buffer. `data` is `None` when the transport
/// has no memory mapped for it.
#[derive(Debug, Clone, Copy)]
pub struct BufferRef<'a> {
    pub data: Option<&'a [u8]>,
    pub chunk: ChunkMeta,
}

/// Dequeue/requeue interface a transport exposes to the process callback.
pub trait BufferQueue {
    fn dequeue(&mut self) -> Option<BufferId>;
    fn buffer(&self, id: BufferId) -> BufferRef<'_>;
    fn requeue(&mut self, id: BufferId);
}

/// Scoped ownership of a dequeued buffer.
pub struct BufferLease<'q> {
    queue: &'q mut dyn BufferQueue,
    id: BufferId,
}

impl<'q> BufferLease<'q> {
    /// `None` when the transport has no buffer ready.
    pub fn acquire(queue: &'q mut dyn BufferQueue) -> Option<Self> {
        let id = queue.dequeue()?;
        Some(Self { queue, id })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn buffer(&self) -> BufferRef<'_> {
        self.queue.buffer(self.id)
    }
}

impl Drop for BufferLease<'_> {
    fn drop(&mut self) {
        self.queue.requeue(self.id);
    }
}

/// Reasons a buffer is skipped. Fieldless so the RT side can publish the
/// last one through an atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[repr(u8)]
pub enum ViewError {
    #[error("buffer has no data")]
    NullData = 1,
    #[error("chunk is empty")]
    Empty = 2,
    #[error("chunk exceeds buffer bounds")]
    OutOfBounds = 3,
    #[error("chunk size is not a multiple of the sample size")]
    Misaligned = 4,
    #[error("chunk stride does not match the negotiated format")]
    StrideMismatch = 5,
}

impl ViewError {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::NullData),
            2 => Some(Self::Empty),
            3 => Some(Self::OutOfBounds),
            4 => Some(Self::Misaligned),
            5 => Some(Self::StrideMismatch),
            _ => None,
        }
    }
}

/// Validate `buffer` as packed mono `f32` with `expected_stride` and return
/// the sample bytes.
pub fn mono_f32_bytes(buffer: BufferRef<'_>, expected_stride: usize) -> Result<&[u8], ViewError> {
    let data = buffer.data.ok_or(ViewError::NullData)?;
    let ChunkMeta {
        offset,
        size,
        stride,
    } = buffer.chunk;

    if size == 0 {
        return Err(ViewError::Empty);
    }
    let end = offset.checked_add(size).ok_or(ViewError::OutOfBounds)?;
    if end > data.len() {
        return Err(ViewError::OutOfBounds);
    }
    if size % SAMPLE_BYTES != 0 {
        return Err(ViewError::Misaligned);
    }
    if stride != expected_stride {
        return Err(ViewError::StrideMismatch);
    }
    Ok(&data[offset..end])
}

/// Queue over one borrowed byte slice, for transports that hand the callback
/// a plain slice (cpal) and for tests.
pub struct SingleBufferQueue<'a> {
    data: &'a [u8],
    stride: usize,
    outstanding: bool,
    served: bool,
    requeued: usize,
}

impl<'a> SingleBufferQueue<'a> {
    pub fn new(data: &'a [u8], stride: usize) -> Self {
        Self {
            data,
            stride,
            outstanding: false,
            served: false,
            requeued: 0,
        }
    }

    pub fn requeued(&self) -> usize {
        self.requeued
    }

    pub fn is_outstanding(&self) -> bool {
        self.outstanding
    }
}

impl BufferQueue for SingleBufferQueue<'_> {
    fn dequeue(&mut self) -> Option<BufferId> {
        if self.served {
            return None;
        }
        self.served = true;
        self.outstanding = true;
        Some(BufferId(0))
    }

    fn buffer(&self, _id: BufferId) -> BufferRef<'_> {
        BufferRef {
            data: Some(self.data),
            chunk: ChunkMeta {
                offset: 0,
                size: self.data.len(),
                stride: self.stride,
            },
        }
    }

    fn requeue(&mut self, _id: BufferId) {
        self.outstanding = false;
        self.requeued += 1;
    }
}
