//! `BeatDetector`: top-level run controller.
//!
//! ## Lifecycle
//!
//! ```text
//! BeatDetector::new()
//!     └─► initialize()   → config validated, queue built, stream connected
//!         └─► run()      → main loop until stop / signal / stream error
//!                          returns the RunSummary
//! ```
//!
//! ## Threading
//!
//! The detector binds to the thread that creates it: that thread owns the
//! stream handle and runs the main loop. The frame processor is moved into
//! the transport at connect time, so the analysis engine and the producer
//! half of the event queue live on the RT thread from then on.
//! [`DetectorHandle`] is the only piece meant to cross threads.

pub mod dispatch;
pub mod lifecycle;
pub mod main_loop;
pub mod process;

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::analysis::AnalysisEngine;
use crate::audio::{AudioFormat, AudioTransport, StreamFlags, TransportStream};
use crate::buffering::event_queue;
use crate::config::DetectorConfig;
use crate::error::{BeatError, Result};
use crate::events::RunSummary;
use crate::shutdown::{QuitMonitor, SharedFlags, Shutdown};
use crate::sink::EventSink;

use dispatch::EventDispatcher;
use lifecycle::{LifecycleState, StreamController, StreamEvents};
use main_loop::{LoopCommand, LoopHandle, LoopHandler, MainLoop};
use process::{FrameProcessor, ProcessShared};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Initialized,
    Finished,
}

pub struct BeatDetector<T: AudioTransport> {
    config: DetectorConfig,
    transport: T,
    engine: Option<Box<dyn AnalysisEngine>>,
    sinks: Vec<Box<dyn EventSink>>,
    shutdown: Shutdown,
    main_loop: MainLoop,
    controller: StreamController<T::Stream>,
    dispatcher: Option<EventDispatcher>,
    started: Instant,
    phase: Phase,
}

impl<T: AudioTransport> BeatDetector<T> {
    /// Nothing is opened until [`initialize`](Self::initialize).
    pub fn new(
        config: DetectorConfig,
        transport: T,
        engine: Box<dyn AnalysisEngine>,
        sinks: Vec<Box<dyn EventSink>>,
        shutdown: Shutdown,
    ) -> Self {
        let main_loop = MainLoop::new();
        let controller =
            StreamController::new(shutdown.flags(), main_loop.handle(), config.shutdown_grace);
        Self {
            config,
            transport,
            engine: Some(engine),
            sinks,
            shutdown,
            main_loop,
            controller,
            dispatcher: None,
            started: Instant::now(),
            phase: Phase::Created,
        }
    }

    /// Validate the configuration and connect the stream.
    ///
    /// # Errors
    /// `InvalidConfig`, `AlreadyRunning` on a second call, or the transport's
    /// initialization error. None of them are retried.
    pub fn initialize(&mut self) -> Result<()> {
        if self.phase != Phase::Created {
            return Err(BeatError::AlreadyRunning);
        }
        self.config.validate()?;
        let engine = self.engine.take().ok_or(BeatError::AlreadyRunning)?;

        let clock = Instant::now();
        let shared = ProcessShared::new(clock);
        let (producer, consumer) = event_queue(self.config.queue_capacity);
        let format = AudioFormat {
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
        };

        let processor = FrameProcessor::new(
            engine,
            self.config.buffer_size as usize,
            format.stride(),
            self.config.pitch,
            producer,
            self.main_loop.event_signal(),
            self.shutdown.flags(),
            shared.clone(),
        );
        self.controller.connect(
            &mut self.transport,
            format,
            StreamFlags::default(),
            Box::new(processor),
        )?;

        let sinks = std::mem::take(&mut self.sinks);
        self.dispatcher = Some(EventDispatcher::new(consumer, shared, sinks));
        self.started = clock;
        self.phase = Phase::Initialized;
        info!(
            buffer_size = self.config.buffer_size,
            fft_size = self.config.fft_size(),
            sample_rate = self.config.sample_rate,
            pitch = self.config.pitch,
            "detector initialized"
        );
        Ok(())
    }

    /// Run the main loop on the calling thread until the run ends.
    ///
    /// A stream error ends the run normally; the summary is still returned.
    ///
    /// # Errors
    /// `NotInitialized` before [`initialize`](Self::initialize),
    /// `AlreadyRunning` after a finished run, `Io` if the monitor thread
    /// cannot be spawned, or a main-loop failure.
    pub fn run(&mut self) -> Result<RunSummary> {
        match self.phase {
            Phase::Created => return Err(BeatError::NotInitialized),
            Phase::Finished => return Err(BeatError::AlreadyRunning),
            Phase::Initialized => {}
        }
        let dispatcher = self.dispatcher.as_mut().ok_or(BeatError::NotInitialized)?;

        let mut monitor = QuitMonitor::spawn(
            self.shutdown.flags(),
            self.main_loop.handle(),
            self.config.monitor_interval,
        )?;

        let mut session = Session {
            controller: &mut self.controller,
            dispatcher,
        };
        let looped = self.main_loop.run(&mut session);
        monitor.cancel();
        self.phase = Phase::Finished;

        // The callback is idle or the transport gave up; either way the
        // stream handle goes now.
        drop(self.controller.take_stream());
        looped?;

        match self.controller.state() {
            LifecycleState::Error => warn!(
                error = self.controller.last_error().unwrap_or("unknown"),
                "run ended on a stream error"
            ),
            state => debug!(%state, "run ended"),
        }

        let dispatcher = self.dispatcher.as_ref().ok_or(BeatError::NotInitialized)?;
        Ok(dispatcher.summary(self.started.elapsed(), self.config.stats))
    }

    pub fn handle(&self) -> DetectorHandle {
        DetectorHandle {
            flags: self.shutdown.flags(),
            main_loop: self.main_loop.handle(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.controller.state()
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

/// Thread-safe stop handle for a running detector.
#[derive(Clone)]
pub struct DetectorHandle {
    flags: SharedFlags,
    main_loop: LoopHandle,
}

impl DetectorHandle {
    /// Request a graceful stop. Returns at once; the run is over when
    /// [`BeatDetector::run`] returns.
    pub fn stop(&self) {
        self.flags.request_quit();
        self.main_loop.post(LoopCommand::Stop);
    }
}

/// Loop-thread glue between the controller and the dispatcher.
struct Session<'a, S: TransportStream> {
    controller: &'a mut StreamController<S>,
    dispatcher: &'a mut EventDispatcher,
}

impl<S: TransportStream> LoopHandler for Session<'_, S> {
    fn on_events(&mut self, _main_loop: &LoopHandle) {
        self.dispatcher.dispatch();
    }

    fn on_command(&mut self, command: LoopCommand, _main_loop: &LoopHandle) {
        match command {
            LoopCommand::StreamState { old, new, error } => {
                self.controller.state_changed(old, new, error.as_deref());
            }
            LoopCommand::Stop | LoopCommand::Shutdown => self.controller.stop(Instant::now()),
        }
    }

    fn on_tick(&mut self, now: Instant, _main_loop: &LoopHandle) {
        // Catches rejections and anything a coalesced wake left behind.
        self.dispatcher.dispatch();
        self.controller.on_tick(now);
    }

    fn on_exit(&mut self, _main_loop: &LoopHandle) {
        self.dispatcher.finish();
    }
}
