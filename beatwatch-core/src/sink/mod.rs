//! Consumers of finished events.
//!
//! Sinks run on the consumer thread only, so they are free to do I/O.
//!
//! - [`LogSink`]: one CSV-ish line per beat/onset.
//! - [`ConsoleRenderer`]: BPM bar or plain `BPM:` lines on stdout.

pub mod console;
pub mod log;

use std::io;

use crate::events::Event;

pub use console::ConsoleRenderer;
pub use log::LogSink;

pub trait EventSink {
    /// `average_bpm` is the rolling average including this event.
    fn handle(&mut self, event: &Event, average_bpm: f32) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn handle(&mut self, event: &Event, average_bpm: f32) -> io::Result<()> {
        (**self).handle(event, average_bpm)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}
