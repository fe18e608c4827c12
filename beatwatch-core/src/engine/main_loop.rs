//! Consumer-thread event loop.
//!
//! ## Wake sources
//!
//! ```text
//! RT callback ──EventSignal::signal()──┐   (atomic flag + unpark, RT-safe)
//! transport adapter ──post(StreamState)─┤
//! DetectorHandle::stop ──post(Stop)─────┼──► MainLoop::run ──► LoopHandler
//! QuitMonitor ──post(Shutdown)──────────┤
//! periodic tick ────────────────────────┘
//! ```
//!
//! The loop parks its own thread between wakes. `Thread::unpark` is a single
//! atomic swap plus, at most, one futex wake, so the RT side can call it
//! without allocating or locking.
//!
//! `MainLoop` binds to the thread that creates it and must be run there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, trace};

use crate::audio::TransportState;
use crate::error::{BeatError, Result};

/// Upper bound between two `on_tick` calls.
pub const LOOP_TICK: Duration = Duration::from_millis(25);

/// Control messages delivered to the loop thread.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopCommand {
    /// Transport-reported stream state change.
    StreamState {
        old: TransportState,
        new: TransportState,
        error: Option<String>,
    },
    /// Explicit stop request from a [`DetectorHandle`](crate::DetectorHandle).
    Stop,
    /// The quit monitor observed the quit flag.
    Shutdown,
}

/// Callbacks run on the loop thread.
pub trait LoopHandler {
    /// New events were signalled by the RT side.
    fn on_events(&mut self, main_loop: &LoopHandle);

    fn on_command(&mut self, command: LoopCommand, main_loop: &LoopHandle);

    fn on_tick(&mut self, _now: Instant, _main_loop: &LoopHandle) {}

    /// Runs once after the loop stops; used for the final drain.
    fn on_exit(&mut self, _main_loop: &LoopHandle) {}
}

struct LoopShared {
    thread: Thread,
    quit: AtomicBool,
    event_pending: AtomicBool,
    commands: Sender<LoopCommand>,
}

impl LoopShared {
    fn wake(&self) {
        self.thread.unpark();
    }
}

/// The consumer-side event loop.
pub struct MainLoop {
    shared: Arc<LoopShared>,
    commands: Receiver<LoopCommand>,
    tick: Duration,
}

impl MainLoop {
    /// Create a loop bound to the calling thread.
    pub fn new() -> Self {
        Self::with_tick(LOOP_TICK)
    }

    pub fn with_tick(tick: Duration) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            shared: Arc::new(LoopShared {
                thread: thread::current(),
                quit: AtomicBool::new(false),
                event_pending: AtomicBool::new(false),
                commands: tx,
            }),
            commands: rx,
            tick,
        }
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// RT-safe wake source for the producer side.
    pub fn event_signal(&self) -> EventSignal {
        EventSignal {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Dispatch wakes to `handler` until [`LoopHandle::quit`] is called.
    ///
    /// # Errors
    /// Fails without running when called from a thread other than the one
    /// that created the loop; wakes would unpark the wrong thread.
    pub fn run<H: LoopHandler>(&self, handler: &mut H) -> Result<()> {
        if thread::current().id() != self.shared.thread.id() {
            return Err(BeatError::Other(anyhow::anyhow!(
                "main loop must run on the thread that created it"
            )));
        }

        let handle = self.handle();
        let mut next_tick = Instant::now() + self.tick;
        debug!("main loop running");

        loop {
            if self.shared.event_pending.swap(false, Ordering::AcqRel) {
                handler.on_events(&handle);
            }

            for command in self.commands.try_iter() {
                trace!(?command, "loop command");
                handler.on_command(command, &handle);
            }

            let now = Instant::now();
            if now >= next_tick {
                handler.on_tick(now, &handle);
                next_tick = now + self.tick;
            }

            if self.shared.quit.load(Ordering::Acquire) {
                break;
            }

            thread::park_timeout(next_tick.saturating_duration_since(Instant::now()));
        }

        handler.on_exit(&handle);
        debug!("main loop exited");
        Ok(())
    }
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Cross-thread control handle. Cheap to clone, `Send + Sync`.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl LoopHandle {
    /// Ask the loop to return after the current iteration. Sticky.
    pub fn quit(&self) {
        self.shared.quit.store(true, Ordering::Release);
        self.shared.wake();
    }

    pub fn is_quitting(&self) -> bool {
        self.shared.quit.load(Ordering::Acquire)
    }

    /// Queue a command for the loop thread. Not for the RT callback: the
    /// channel may allocate. Returns `false` once the loop has been dropped.
    pub fn post(&self, command: LoopCommand) -> bool {
        let sent = self.shared.commands.send(command).is_ok();
        self.shared.wake();
        sent
    }
}

/// Wake source for the RT producer: no allocation, no lock.
#[derive(Clone)]
pub struct EventSignal {
    shared: Arc<LoopShared>,
}

impl EventSignal {
    /// Mark events pending and wake the loop. Coalesces: repeated signals
    /// before the loop runs cost one atomic swap each.
    pub fn signal(&self) {
        if !self.shared.event_pending.swap(true, Ordering::AcqRel) {
            self.shared.wake();
        }
    }
}
