//! Shutdown coordination across the signal handler, a monitor thread and the
//! main loop.
//!
//! ## Flow
//!
//! ```text
//! SIGINT/SIGTERM ──► shutdown::signal()        relaxed store of `quit`, nothing else
//!                          │
//!        QuitMonitor (polls every monitor_interval)
//!                          │ observes `quit`
//!                          ▼
//!        LoopHandle::post(Shutdown) ──► StreamController::stop()
//!                                          ├─ stopping = true
//!                                          └─ set_active(false) ... Paused ─► disconnect ─► loop exits
//! ```
//!
//! The loop-exit path may allocate and lock, so the signal context never
//! touches it directly; the monitor thread is the indirection.
//!
//! ## Process-wide storage
//!
//! Signal handlers cannot carry context, so the flags a handler reaches live
//! in a `static`. At most one [`Shutdown`] may claim them at a time
//! ([`Shutdown::install`]); the claim is released when it is dropped.
//! [`Shutdown::detached`] creates private flags for embedders and tests that
//! never route OS signals.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::main_loop::{LoopCommand, LoopHandle};
use crate::error::{BeatError, Result};

/// Monotonic shutdown flags for one run.
#[derive(Debug, Default)]
pub struct ShutdownFlags {
    /// Total shutdown requested. Settable from a signal context.
    quit: AtomicBool,
    /// Graceful pause-before-disconnect in progress. Consumer thread only.
    stopping: AtomicBool,
}

impl ShutdownFlags {
    pub const fn new() -> Self {
        Self {
            quit: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        }
    }

    /// Async-signal-safe.
    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::Relaxed);
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }

    /// Returns `true` only for the call that flipped the flag.
    pub(crate) fn begin_stopping(&self) -> bool {
        !self.stopping.swap(true, Ordering::Relaxed)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.quit.store(false, Ordering::Relaxed);
        self.stopping.store(false, Ordering::Relaxed);
    }
}

static PROCESS_FLAGS: ShutdownFlags = ShutdownFlags::new();
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Signal-handler entry point: sets `quit` on the installed coordinator, if
/// any. Performs one relaxed load and at most one relaxed store.
pub fn signal() {
    if INSTALLED.load(Ordering::Relaxed) {
        PROCESS_FLAGS.request_quit();
    }
}

/// Shared reference to either the process-wide or a private flag set.
#[derive(Debug, Clone)]
pub enum SharedFlags {
    Process,
    Owned(Arc<ShutdownFlags>),
}

impl Deref for SharedFlags {
    type Target = ShutdownFlags;

    fn deref(&self) -> &ShutdownFlags {
        match self {
            Self::Process => &PROCESS_FLAGS,
            Self::Owned(flags) => flags,
        }
    }
}

/// Owner of one run's shutdown flags.
#[derive(Debug)]
pub struct Shutdown {
    flags: SharedFlags,
}

impl Shutdown {
    /// Claim the process-wide flags so [`signal`] reaches this run.
    ///
    /// # Errors
    /// `BeatError::ShutdownAlreadyInstalled` while another claim is live.
    pub fn install() -> Result<Self> {
        if INSTALLED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BeatError::ShutdownAlreadyInstalled);
        }
        PROCESS_FLAGS.reset();
        Ok(Self {
            flags: SharedFlags::Process,
        })
    }

    /// Private flags, unreachable from [`signal`].
    pub fn detached() -> Self {
        Self {
            flags: SharedFlags::Owned(Arc::new(ShutdownFlags::new())),
        }
    }

    pub fn flags(&self) -> SharedFlags {
        self.flags.clone()
    }

    pub fn is_process_wide(&self) -> bool {
        matches!(self.flags, SharedFlags::Process)
    }
}

impl Drop for Shutdown {
    fn drop(&mut self) {
        if self.is_process_wide() {
            INSTALLED.store(false, Ordering::Release);
        }
    }
}

/// Thread that turns an observed `quit` into a graceful loop shutdown.
pub struct QuitMonitor {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl QuitMonitor {
    /// # Errors
    /// `BeatError::Io` if the thread cannot be spawned.
    pub fn spawn(flags: SharedFlags, main_loop: LoopHandle, interval: Duration) -> Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);

        let thread = thread::Builder::new()
            .name("beatwatch-quit-monitor".into())
            .spawn(move || {
                while !thread_cancel.load(Ordering::Acquire) {
                    if flags.quit_requested() {
                        info!("quit requested, shutting down");
                        main_loop.post(LoopCommand::Shutdown);
                        return;
                    }
                    thread::park_timeout(interval);
                }
                debug!("quit monitor cancelled");
            })?;

        Ok(Self {
            cancel,
            thread: Some(thread),
        })
    }

    /// Stop the monitor and wait for it. Idempotent.
    pub fn cancel(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

impl Drop for QuitMonitor {
    fn drop(&mut self) {
        self.cancel();
    }
}
