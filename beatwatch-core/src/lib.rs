//! # beatwatch-core
//!
//! Real-time beat / onset / pitch detection plumbing.
//!
//! ## Architecture
//!
//! ```text
//! AudioTransport (RT thread)
//!     └─► FrameProcessor ─► AnalysisEngine (tempo / onset / pitch per block)
//!             │
//!             └─► SPSC EventQueue ──EventSignal──► MainLoop (consumer thread)
//!                                                      │
//!                                   EventDispatcher ◄──┤──► StreamController
//!                                      │               │        (connect / pause / disconnect)
//!                                BpmWindow, sinks      │
//!                                                 QuitMonitor ◄── shutdown::signal()
//! ```
//!
//! The RT callback never allocates, locks or logs. Everything it touches is
//! built before the stream connects.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod analysis;
pub mod audio;
pub mod buffering;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod shutdown;
pub mod sink;

// Convenience re-exports for downstream crates
pub use analysis::{AnalysisEngine, EnergyEngine, TempoReading};
pub use config::DetectorConfig;
pub use engine::lifecycle::LifecycleState;
pub use engine::{BeatDetector, DetectorHandle};
pub use error::{BeatError, Result};
pub use events::{Event, RunSummary};
pub use shutdown::Shutdown;
pub use sink::{ConsoleRenderer, EventSink, LogSink};

#[cfg(feature = "audio-cpal")]
pub use audio::cpal_input::CpalTransport;
