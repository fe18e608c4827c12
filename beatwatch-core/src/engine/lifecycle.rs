//! Stream lifecycle state machine.
//!
//! ```text
//! Unconnected ─connect─► Connecting ─streaming─► Streaming ◄─┐
//!                             │                     │         │ streaming
//!                             │                  paused       │
//!                             │                     ▼         │
//!                             └──────paused────► Paused ──────┘
//!                                                   │ (stopping)
//!                                                   ▼
//!                                              Disconnected
//!
//! any non-terminal ─error─► Error
//! ```
//!
//! All methods run on the consumer thread. A stop never disconnects a stream
//! the transport may still be calling into: it deactivates first and waits
//! for the `Paused` confirmation.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::audio::{
    AudioFormat, AudioTransport, ProcessCallback, StreamFlags, StreamNotifier, TransportState,
    TransportStream,
};
use crate::engine::main_loop::LoopHandle;
use crate::error::{BeatError, Result};
use crate::shutdown::SharedFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unconnected,
    Connecting,
    Streaming,
    Paused,
    Disconnected,
    Error,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Paused => "paused",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Notification capability the transport adapter drives.
pub trait StreamEvents {
    fn state_changed(&mut self, old: TransportState, new: TransportState, error: Option<&str>);
}

/// Owns the stream handle and drives it through its lifecycle.
pub struct StreamController<S: TransportStream> {
    stream: Option<S>,
    state: LifecycleState,
    flags: SharedFlags,
    main_loop: LoopHandle,
    grace: Duration,
    stop_deadline: Option<Instant>,
    disconnected: bool,
    last_error: Option<String>,
}

impl<S: TransportStream> StreamController<S> {
    /// # Parameters
    /// - `grace`: how long a stop waits for `Paused` before the loop gives up.
    pub fn new(flags: SharedFlags, main_loop: LoopHandle, grace: Duration) -> Self {
        Self {
            stream: None,
            state: LifecycleState::Unconnected,
            flags,
            main_loop,
            grace,
            stop_deadline: None,
            disconnected: false,
            last_error: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Error text of the last transport failure, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// `Unconnected → Connecting`.
    ///
    /// # Errors
    /// `AlreadyRunning` outside `Unconnected`; otherwise whatever the
    /// transport reports. A failed connect leaves the state unchanged.
    pub fn connect<T>(
        &mut self,
        transport: &mut T,
        format: AudioFormat,
        flags: StreamFlags,
        process: Box<dyn ProcessCallback>,
    ) -> Result<()>
    where
        T: AudioTransport<Stream = S>,
    {
        if self.state != LifecycleState::Unconnected || self.stream.is_some() {
            return Err(BeatError::AlreadyRunning);
        }

        let notifier = StreamNotifier::new(self.main_loop.clone());
        let stream = transport.connect(format, flags, process, notifier)?;
        self.stream = Some(stream);
        self.state = LifecycleState::Connecting;
        debug!(sample_rate = format.sample_rate, "stream connecting");
        Ok(())
    }

    /// Request a graceful stop. Idempotent.
    pub fn stop(&mut self, now: Instant) {
        self.flags.request_quit();
        if !self.flags.begin_stopping() {
            debug!(state = %self.state, "stop already in progress");
            return;
        }

        match self.state {
            LifecycleState::Unconnected => {
                info!("stop before connect");
                self.enter_terminal(LifecycleState::Disconnected);
            }
            LifecycleState::Connecting | LifecycleState::Streaming => {
                info!(state = %self.state, "deactivating stream");
                let result = match self.stream.as_mut() {
                    Some(stream) => stream.set_active(false),
                    None => Ok(()),
                };
                match result {
                    Ok(()) => self.stop_deadline = Some(now + self.grace),
                    Err(e) => {
                        error!(error = %e, "failed to deactivate stream");
                        self.last_error = Some(e.to_string());
                        self.enter_terminal(LifecycleState::Error);
                    }
                }
            }
            // The callback is already idle.
            LifecycleState::Paused => self.disconnect(),
            LifecycleState::Disconnected | LifecycleState::Error => self.main_loop.quit(),
        }
    }

    /// Start a stream connected without `autoconnect`, or resume a paused
    /// one. Ignored once a stop is under way or the stream is terminal.
    ///
    /// # Errors
    /// Whatever the transport reports; the state is left unchanged.
    pub fn activate(&mut self) -> Result<()> {
        if self.flags.is_stopping() || self.state.is_terminal() {
            debug!(state = %self.state, "activate ignored");
            return Ok(());
        }
        match (self.state, self.stream.as_mut()) {
            (LifecycleState::Connecting | LifecycleState::Paused, Some(stream)) => {
                stream.set_active(true)
            }
            (LifecycleState::Streaming, Some(_)) => Ok(()),
            _ => Err(BeatError::NotInitialized),
        }
    }

    /// Give up on a stop the transport never confirmed.
    pub fn on_tick(&mut self, now: Instant) {
        let Some(deadline) = self.stop_deadline else {
            return;
        };
        if self.state.is_terminal() || now < deadline {
            return;
        }
        warn!(
            state = %self.state,
            grace_ms = self.grace.as_millis() as u64,
            "transport did not confirm pause; leaving the stream connected"
        );
        self.stop_deadline = None;
        self.main_loop.quit();
    }

    /// Release the stream handle for teardown.
    pub fn take_stream(&mut self) -> Option<S> {
        self.stream.take()
    }

    fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;
        self.stop_deadline = None;

        let result = match self.stream.as_mut() {
            Some(stream) => stream.disconnect(),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                info!("stream disconnected");
                self.enter_terminal(LifecycleState::Disconnected);
            }
            Err(e) => {
                error!(error = %e, "disconnect failed");
                self.last_error = Some(e.to_string());
                self.enter_terminal(LifecycleState::Error);
            }
        }
    }

    fn enter_terminal(&mut self, state: LifecycleState) {
        self.state = state;
        self.stop_deadline = None;
        self.main_loop.quit();
    }
}

impl<S: TransportStream> StreamEvents for StreamController<S> {
    fn state_changed(&mut self, old: TransportState, new: TransportState, error: Option<&str>) {
        info!(%old, %new, "stream state");
        if self.state.is_terminal() {
            debug!(state = %self.state, %new, "notification after terminal state ignored");
            return;
        }

        match new {
            TransportState::Connecting => self.state = LifecycleState::Connecting,
            TransportState::Streaming => self.state = LifecycleState::Streaming,
            TransportState::Paused => {
                self.state = LifecycleState::Paused;
                if self.flags.is_stopping() {
                    self.disconnect();
                }
            }
            TransportState::Error => {
                let message = error.unwrap_or("unknown");
                error!(error = message, "stream error");
                self.last_error = Some(message.to_owned());
                self.enter_terminal(LifecycleState::Error);
            }
            TransportState::Unconnected => {
                warn!("transport dropped the stream");
                self.disconnected = true;
                self.enter_terminal(LifecycleState::Disconnected);
            }
        }
    }
}
