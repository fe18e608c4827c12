//! Audio transport seam.
//!
//! # Design constraints
//!
//! A transport owns device negotiation and calls [`ProcessCallback::process`]
//! on its own real-time thread. That callback **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! Lifecycle operations ([`TransportStream::set_active`],
//! [`TransportStream::disconnect`]) are only ever issued from the consumer
//! thread that owns the stream. State changes travel the other way through
//! [`StreamNotifier`], which posts them onto the consumer's main loop.
//!
//! Backends:
//! - [`cpal_input`]: system default input device (feature `audio-cpal`).
//! - [`mock`]: scripted buffers replayed on a dedicated thread, for tests.

pub mod buffer;
#[cfg(feature = "audio-cpal")]
pub mod cpal_input;
pub mod mock;

use std::fmt;

use crate::engine::main_loop::{LoopCommand, LoopHandle};
use crate::error::Result;

pub use buffer::{
    mono_f32_bytes, BufferId, BufferLease, BufferQueue, BufferRef, ChunkMeta, SingleBufferQueue,
    ViewError, SAMPLE_BYTES,
};

/// Stream state as reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Unconnected,
    Connecting,
    Paused,
    Streaming,
    Error,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Paused => "paused",
            Self::Streaming => "streaming",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Requested capture format. Samples are always little-endian `f32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }

    /// Byte distance between consecutive frames.
    pub fn stride(&self) -> usize {
        usize::from(self.channels) * buffer::SAMPLE_BYTES
    }
}

/// Connection flags understood by transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFlags {
    /// Start scheduling the callback as soon as the stream is connected.
    /// When off, the stream stays idle in `Connecting` until
    /// [`TransportStream::set_active`]`(true)`.
    pub autoconnect: bool,
}

impl Default for StreamFlags {
    fn default() -> Self {
        Self { autoconnect: true }
    }
}

/// The per-buffer callback body. Moved into the transport at connect time.
pub trait ProcessCallback: Send + 'static {
    fn process(&mut self, buffers: &mut dyn BufferQueue);
}

/// Adapter through which a transport reports state changes. Delivery is
/// asynchronous: notifications are handled on the consumer thread.
#[derive(Clone)]
pub struct StreamNotifier {
    main_loop: LoopHandle,
}

impl StreamNotifier {
    pub fn new(main_loop: LoopHandle) -> Self {
        Self { main_loop }
    }

    pub fn state_changed(&self, old: TransportState, new: TransportState, error: Option<String>) {
        self.main_loop
            .post(LoopCommand::StreamState { old, new, error });
    }
}

/// Push-model audio source.
pub trait AudioTransport {
    type Stream: TransportStream;

    /// Negotiate `format`, create the stream and start scheduling `process`.
    ///
    /// # Errors
    /// `NoInputDevice`, `FormatNegotiation`, `StreamCreate` or `Connect`.
    fn connect(
        &mut self,
        format: AudioFormat,
        flags: StreamFlags,
        process: Box<dyn ProcessCallback>,
        notifier: StreamNotifier,
    ) -> Result<Self::Stream>;
}

/// A connected stream, owned by the consumer thread.
pub trait TransportStream {
    /// Start (`true`) or stop (`false`) scheduling the process callback.
    /// Completion is reported later as a `Streaming` / `Paused` notification.
    fn set_active(&mut self, active: bool) -> Result<()>;

    /// Tear the stream down. Only safe once the transport has confirmed
    /// `Paused`, i.e. the callback is no longer running.
    fn disconnect(&mut self) -> Result<()>;
}
