//! Console BPM display.
//!
//! Visual mode redraws one line per beat:
//!
//! ```text
//! ♪██████░░░░ BPM: 121.4 | Avg 119.8
//! ```
//!
//! Plain mode prints ` BPM: 121.4` lines. Onset-only events render nothing.

use std::io::{self, Stdout, Write};

use super::EventSink;
use crate::events::Event;

pub const BAR_CELLS: usize = 10;

/// Filled cells for `bpm`: one per 20 BPM, clamped to the bar.
pub fn bar_level(bpm: f32) -> usize {
    if !bpm.is_finite() || bpm <= 0.0 {
        return 0;
    }
    ((bpm / 20.0).floor() as usize).min(BAR_CELLS)
}

pub struct ConsoleRenderer<W: Write> {
    out: W,
    visual: bool,
    /// A `\r` line is on screen without its newline.
    line_open: bool,
}

impl ConsoleRenderer<Stdout> {
    pub fn stdout(visual: bool) -> Self {
        Self::new(io::stdout(), visual)
    }
}

impl<W: Write> ConsoleRenderer<W> {
    pub fn new(out: W, visual: bool) -> Self {
        Self {
            out,
            visual,
            line_open: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EventSink for ConsoleRenderer<W> {
    fn handle(&mut self, event: &Event, average_bpm: f32) -> io::Result<()> {
        if !event.is_beat {
            return Ok(());
        }

        if self.visual {
            let level = bar_level(event.bpm);
            write!(
                self.out,
                "\r♪{}{} BPM: {:.1} | Avg {:.1}",
                "█".repeat(level),
                "░".repeat(BAR_CELLS - level),
                event.bpm,
                average_bpm
            )?;
            self.line_open = true;
            self.out.flush()
        } else {
            writeln!(self.out, " BPM: {:.1}", event.bpm)
        }
    }

    /// Terminate an open bar line so later output starts on a fresh line.
    fn flush(&mut self) -> io::Result<()> {
        if self.line_open {
            writeln!(self.out)?;
            self.line_open = false;
        }
        self.out.flush()
    }
}
