//! Buffers between the real-time callback and the consumer thread.
//!
//! - [`queue`]: lock-free SPSC event queue, RT producer → consumer.
//! - [`stats`]: rolling BPM window, consumer-owned.
//! - [`block`]: fixed-size analysis blocks, RT-owned.

pub mod block;
pub mod queue;
pub mod stats;

pub use queue::{event_queue, EventConsumer, EventProducer, EVENT_QUEUE_CAPACITY};
pub use stats::{BpmWindow, BPM_WINDOW};
