//! Beat log file.
//!
//! ```text
//! # Beat Detection Log - 2025-03-01 18:22:07
//! # Timestamp,BPM,Onset,Pitch(Hz),ProcessTime(ms)
//! 18:22:09.114,121.4,1,0.000,0.412
//! 18:22:09.371,0.0,1,0.000,0.388
//! ```
//!
//! Times are UTC. BPM is `0.0` on onset-only lines.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::EventSink;
use crate::error::{BeatError, Result};
use crate::events::Event;

pub const LOG_HEADER: &str = "# Timestamp,BPM,Onset,Pitch(Hz),ProcessTime(ms)";

pub struct LogSink<W: Write = BufWriter<File>> {
    out: W,
    path: Option<PathBuf>,
}

impl LogSink<BufWriter<File>> {
    /// `beat_log_<YYYYmmdd_HHMMSS>Z.txt` for a log opened at `now`.
    pub fn file_name(now: DateTime<Utc>) -> String {
        format!("beat_log_{}Z.txt", now.format("%Y%m%d_%H%M%S"))
    }

    /// Create (truncate) `path` and write the header.
    ///
    /// # Errors
    /// `BeatError::LogOpen` naming the path.
    pub fn create(path: impl AsRef<Path>, now: DateTime<Utc>) -> Result<Self> {
        let path = path.as_ref();
        let log_open = |source: io::Error| BeatError::LogOpen {
            path: path.to_path_buf(),
            source,
        };

        let file = File::create(path).map_err(log_open)?;
        let mut sink = Self::new(BufWriter::new(file), now).map_err(log_open)?;
        sink.path = Some(path.to_path_buf());
        Ok(sink)
    }
}

impl<W: Write> LogSink<W> {
    /// Wrap an arbitrary writer and write the header.
    pub fn new(mut out: W, now: DateTime<Utc>) -> io::Result<Self> {
        writeln!(out, "# Beat Detection Log - {}", now.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(out, "{LOG_HEADER}")?;
        Ok(Self { out, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn write_event(&mut self, event: &Event, at: DateTime<Utc>) -> io::Result<()> {
        writeln!(
            self.out,
            "{},{:.1},{},{:.3},{:.3}",
            at.format("%H:%M:%S%.3f"),
            event.logged_bpm(),
            u8::from(event.is_onset),
            event.pitch_hz,
            event.process_ms
        )
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EventSink for LogSink<W> {
    fn handle(&mut self, event: &Event, _average_bpm: f32) -> io::Result<()> {
        if !(event.is_beat || event.is_onset) {
            return Ok(());
        }
        self.write_event(event, Utc::now())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32, ms: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, s).unwrap()
            + chrono::Duration::milliseconds(i64::from(ms))
    }

    #[test]
    fn file_name_uses_utc_stamp() {
        assert_eq!(
            LogSink::file_name(at(18, 22, 7, 0)),
            "beat_log_20250301_182207Z.txt"
        );
    }

    #[test]
    fn header_and_event_lines() {
        let mut sink = LogSink::new(Vec::new(), at(18, 22, 7, 0)).expect("header");

        let mut beat = Event::beat(121.44, 0.0, 0);
        beat.is_onset = true;
        beat.process_ms = 0.4124;
        sink.write_event(&beat, at(18, 22, 9, 114)).expect("beat line");

        let onset = Event::onset(121.44, 220.5, 0);
        sink.write_event(&onset, at(18, 22, 9, 371)).expect("onset line");

        let text = String::from_utf8(sink.into_inner()).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# Beat Detection Log - 2025-03-01 18:22:07");
        assert_eq!(lines[1], LOG_HEADER);
        assert_eq!(lines[2], "18:22:09.114,121.4,1,0.000,0.412");
        assert_eq!(lines[3], "18:22:09.371,0.0,1,220.500,0.000");
    }

    #[test]
    fn create_writes_to_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(LogSink::file_name(at(0, 0, 0, 0)));

        let mut sink = LogSink::create(&path, at(0, 0, 0, 0)).expect("create");
        assert_eq!(sink.path(), Some(path.as_path()));
        sink.handle(&Event::beat(90.0, 0.0, 0), 90.0).expect("handle");
        sink.flush().expect("flush");

        let text = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().last().is_some_and(|l| l.contains(",90.0,0,")));
    }

    #[test]
    fn unopenable_path_is_a_log_open_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing").join("beat.txt");
        let err = LogSink::create(&path, Utc::now()).err().expect("must fail");
        assert!(matches!(err, BeatError::LogOpen { .. }));
    }
}
