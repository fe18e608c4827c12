//! In-process transport that replays scripted buffers on its own thread.
//!
//! The replay thread plays the role of the transport's RT thread: it calls
//! the process callback once per `period` while the stream is active. A
//! deactivation is confirmed with `Paused` only after the thread has left
//! the callback, which is the guarantee a real transport gives.
//!
//! Every lifecycle call lands in a [`MockJournal`] so tests can assert on
//! ordering, e.g. that `Disconnect` never precedes `NotifiedPaused` and never
//! happens while the callback is running.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::{
    AudioFormat, AudioTransport, BufferId, BufferQueue, BufferRef, ChunkMeta, ProcessCallback,
    StreamFlags, StreamNotifier, TransportState, TransportStream,
};
use crate::error::{BeatError, Result};

/// One scripted transport buffer.
#[derive(Debug, Clone)]
pub struct MockBuffer {
    pub bytes: Vec<u8>,
    pub stride: usize,
    /// `false` simulates a buffer without mapped memory.
    pub mapped: bool,
}

impl MockBuffer {
    pub fn mono_f32(samples: &[f32]) -> Self {
        Self {
            bytes: samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
            stride: super::SAMPLE_BYTES,
            mapped: true,
        }
    }

    pub fn raw(bytes: Vec<u8>, stride: usize) -> Self {
        Self {
            bytes,
            stride,
            mapped: true,
        }
    }

    pub fn unmapped(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
            stride: super::SAMPLE_BYTES,
            mapped: false,
        }
    }
}

/// Replay behaviour of a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockScript {
    pub buffers: Vec<MockBuffer>,
    /// Delay between two callbacks.
    pub period: Duration,
    /// Cycle through `buffers` forever instead of once.
    pub repeat: bool,
    /// Extra delay before `Paused` is reported.
    pub pause_delay: Duration,
    /// Report `Paused` at all after a deactivation.
    pub confirm_pause: bool,
    pub fail_connect: bool,
    /// Report a stream error after this many callbacks.
    pub error_after: Option<usize>,
}

impl MockScript {
    pub fn repeating(buffers: Vec<MockBuffer>, period: Duration) -> Self {
        Self {
            buffers,
            period,
            repeat: true,
            pause_delay: Duration::ZERO,
            confirm_pause: true,
            fail_connect: false,
            error_after: None,
        }
    }

    pub fn once(buffers: Vec<MockBuffer>, period: Duration) -> Self {
        Self {
            repeat: false,
            ..Self::repeating(buffers, period)
        }
    }

    pub fn with_pause_delay(mut self, delay: Duration) -> Self {
        self.pause_delay = delay;
        self
    }

    pub fn never_confirm_pause(mut self) -> Self {
        self.confirm_pause = false;
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn error_after(mut self, callbacks: usize) -> Self {
        self.error_after = Some(callbacks);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockCall {
    Connect,
    SetActive(bool),
    NotifiedPaused,
    NotifiedError,
    Disconnect,
    /// `disconnect` was called while the callback was running.
    DisconnectDuringCallback,
}

/// Record of what the stream was asked to do.
#[derive(Debug, Default)]
pub struct MockJournal {
    calls: Mutex<Vec<MockCall>>,
    callbacks: AtomicUsize,
    dequeued: AtomicUsize,
    requeued: AtomicUsize,
    in_callback: AtomicBool,
}

impl MockJournal {
    fn push(&self, call: MockCall) {
        self.calls.lock().push(call);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: MockCall) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    /// Index of the first occurrence of `call`.
    pub fn position(&self, call: MockCall) -> Option<usize> {
        self.calls.lock().iter().position(|c| *c == call)
    }

    pub fn callbacks(&self) -> usize {
        self.callbacks.load(Ordering::Acquire)
    }

    pub fn dequeued(&self) -> usize {
        self.dequeued.load(Ordering::Acquire)
    }

    pub fn requeued(&self) -> usize {
        self.requeued.load(Ordering::Acquire)
    }
}

pub struct MockTransport {
    script: MockScript,
    journal: Arc<MockJournal>,
}

impl MockTransport {
    pub fn new(script: MockScript) -> Self {
        Self {
            script,
            journal: Arc::new(MockJournal::default()),
        }
    }

    pub fn journal(&self) -> Arc<MockJournal> {
        Arc::clone(&self.journal)
    }
}

struct ReplayControl {
    active: AtomicBool,
    pause_requested: AtomicBool,
    exit: AtomicBool,
}

impl AudioTransport for MockTransport {
    type Stream = MockStream;

    fn connect(
        &mut self,
        format: AudioFormat,
        flags: StreamFlags,
        mut process: Box<dyn ProcessCallback>,
        notifier: StreamNotifier,
    ) -> Result<MockStream> {
        if self.script.fail_connect {
            return Err(BeatError::Connect("mock transport refused the connection".into()));
        }
        self.journal.push(MockCall::Connect);
        notifier.state_changed(TransportState::Unconnected, TransportState::Connecting, None);

        let control = Arc::new(ReplayControl {
            active: AtomicBool::new(flags.autoconnect),
            pause_requested: AtomicBool::new(false),
            exit: AtomicBool::new(false),
        });
        if flags.autoconnect {
            notifier.state_changed(TransportState::Connecting, TransportState::Streaming, None);
        }

        let script = self.script.clone();
        let journal = Arc::clone(&self.journal);
        let thread_control = Arc::clone(&control);
        let thread_notifier = notifier.clone();
        let thread = thread::Builder::new()
            .name("beatwatch-mock-rt".into())
            .spawn(move || {
                replay(
                    &script,
                    &mut *process,
                    &thread_control,
                    &journal,
                    &thread_notifier,
                );
            })?;

        debug!(sample_rate = format.sample_rate, "mock stream connected");
        Ok(MockStream {
            control,
            journal: Arc::clone(&self.journal),
            notifier,
            thread: Some(thread),
        })
    }
}

fn replay(
    script: &MockScript,
    process: &mut dyn ProcessCallback,
    control: &ReplayControl,
    journal: &MockJournal,
    notifier: &StreamNotifier,
) {
    let mut next = 0usize;
    let mut delivered = 0usize;

    while !control.exit.load(Ordering::Acquire) {
        if control.active.load(Ordering::Acquire) {
            if script.error_after == Some(delivered) {
                control.active.store(false, Ordering::Release);
                journal.push(MockCall::NotifiedError);
                notifier.state_changed(
                    TransportState::Streaming,
                    TransportState::Error,
                    Some("mock stream failure".into()),
                );
                continue;
            }

            let exhausted = !script.repeat && next >= script.buffers.len();
            if !script.buffers.is_empty() && !exhausted {
                let buffer = &script.buffers[next % script.buffers.len()];
                let mut queue = MockQueue {
                    buffer,
                    journal,
                    served: false,
                };
                journal.in_callback.store(true, Ordering::Release);
                process.process(&mut queue);
                journal.in_callback.store(false, Ordering::Release);
                journal.callbacks.fetch_add(1, Ordering::AcqRel);
                next += 1;
                delivered += 1;
            }
        } else if control.pause_requested.swap(false, Ordering::AcqRel) {
            // The callback is not running: this branch is the only one that
            // calls it.
            if !script.pause_delay.is_zero() {
                thread::sleep(script.pause_delay);
            }
            if script.confirm_pause {
                journal.push(MockCall::NotifiedPaused);
                notifier.state_changed(TransportState::Streaming, TransportState::Paused, None);
            }
        }

        thread::park_timeout(script.period);
    }
}

struct MockQueue<'a> {
    buffer: &'a MockBuffer,
    journal: &'a MockJournal,
    served: bool,
}

impl BufferQueue for MockQueue<'_> {
    fn dequeue(&mut self) -> Option<BufferId> {
        if self.served {
            return None;
        }
        self.served = true;
        self.journal.dequeued.fetch_add(1, Ordering::AcqRel);
        Some(BufferId(0))
    }

    fn buffer(&self, _id: BufferId) -> BufferRef<'_> {
        BufferRef {
            data: self.buffer.mapped.then_some(self.buffer.bytes.as_slice()),
            chunk: ChunkMeta {
                offset: 0,
                size: self.buffer.bytes.len(),
                stride: self.buffer.stride,
            },
        }
    }

    fn requeue(&mut self, _id: BufferId) {
        self.journal.requeued.fetch_add(1, Ordering::AcqRel);
    }
}

pub struct MockStream {
    control: Arc<ReplayControl>,
    journal: Arc<MockJournal>,
    notifier: StreamNotifier,
    thread: Option<JoinHandle<()>>,
}

impl MockStream {
    fn wake(&self) {
        if let Some(thread) = &self.thread {
            thread.thread().unpark();
        }
    }

    fn join(&mut self) {
        self.control.exit.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

impl TransportStream for MockStream {
    fn set_active(&mut self, active: bool) -> Result<()> {
        self.journal.push(MockCall::SetActive(active));
        if self.thread.is_none() {
            return Err(BeatError::Transport("stream is disconnected".into()));
        }

        let was_active = self.control.active.swap(active, Ordering::AcqRel);
        if active && !was_active {
            self.notifier
                .state_changed(TransportState::Paused, TransportState::Streaming, None);
        } else if !active {
            self.control.pause_requested.store(true, Ordering::Release);
        }
        self.wake();
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.journal.in_callback.load(Ordering::Acquire) {
            self.journal.push(MockCall::DisconnectDuringCallback);
        }
        self.journal.push(MockCall::Disconnect);
        self.join();
        self.notifier
            .state_changed(TransportState::Paused, TransportState::Unconnected, None);
        Ok(())
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::main_loop::{LoopCommand, LoopHandle, LoopHandler, MainLoop};

    struct Counting {
        seen: Arc<AtomicUsize>,
    }

    impl ProcessCallback for Counting {
        fn process(&mut self, buffers: &mut dyn BufferQueue) {
            if let Some(id) = buffers.dequeue() {
                buffers.requeue(id);
                self.seen.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    /// Collects stream states until `Paused`.
    #[derive(Default)]
    struct StateLog {
        states: Vec<TransportState>,
    }

    impl LoopHandler for StateLog {
        fn on_events(&mut self, _main_loop: &LoopHandle) {}

        fn on_command(&mut self, command: LoopCommand, main_loop: &LoopHandle) {
            if let LoopCommand::StreamState { new, .. } = command {
                self.states.push(new);
                if new == TransportState::Paused || new == TransportState::Error {
                    main_loop.quit();
                }
            }
        }
    }

    fn samples() -> Vec<MockBuffer> {
        vec![MockBuffer::mono_f32(&[0.0; 64])]
    }

    #[test]
    fn replays_until_deactivated_then_confirms_pause() {
        let main_loop = MainLoop::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let mut transport =
            MockTransport::new(MockScript::repeating(samples(), Duration::from_millis(1)));
        let journal = transport.journal();

        let mut stream = transport
            .connect(
                AudioFormat::mono(44_100),
                StreamFlags::default(),
                Box::new(Counting {
                    seen: Arc::clone(&seen),
                }),
                StreamNotifier::new(main_loop.handle()),
            )
            .expect("connect");

        while seen.load(Ordering::Acquire) < 5 {
            thread::sleep(Duration::from_millis(1));
        }
        stream.set_active(false).expect("deactivate");

        let mut log = StateLog::default();
        main_loop.run(&mut log).expect("run");
        assert_eq!(
            log.states,
            vec![
                TransportState::Connecting,
                TransportState::Streaming,
                TransportState::Paused
            ]
        );

        stream.disconnect().expect("disconnect");
        assert_eq!(journal.dequeued(), journal.requeued());
        assert_eq!(journal.count(MockCall::DisconnectDuringCallback), 0);
        assert!(journal.position(MockCall::NotifiedPaused) < journal.position(MockCall::Disconnect));
    }

    #[test]
    fn idle_stream_waits_for_set_active() {
        let main_loop = MainLoop::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let mut transport =
            MockTransport::new(MockScript::repeating(samples(), Duration::from_millis(1)));

        let mut stream = transport
            .connect(
                AudioFormat::mono(44_100),
                StreamFlags { autoconnect: false },
                Box::new(Counting {
                    seen: Arc::clone(&seen),
                }),
                StreamNotifier::new(main_loop.handle()),
            )
            .expect("connect");

        thread::sleep(Duration::from_millis(20));
        assert_eq!(seen.load(Ordering::Acquire), 0);

        stream.set_active(true).expect("activate");
        while seen.load(Ordering::Acquire) < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        stream.set_active(false).expect("deactivate");

        let mut log = StateLog::default();
        main_loop.run(&mut log).expect("run");
        assert_eq!(
            log.states,
            vec![
                TransportState::Connecting,
                TransportState::Streaming,
                TransportState::Paused
            ]
        );
        stream.disconnect().expect("disconnect");
    }

    #[test]
    fn failing_connect_reports_connect_error() {
        let main_loop = MainLoop::new();
        let mut transport = MockTransport::new(
            MockScript::once(samples(), Duration::from_millis(1)).failing_connect(),
        );
        let result = transport.connect(
            AudioFormat::mono(44_100),
            StreamFlags::default(),
            Box::new(Counting {
                seen: Arc::new(AtomicUsize::new(0)),
            }),
            StreamNotifier::new(main_loop.handle()),
        );
        assert!(matches!(result, Err(BeatError::Connect(_))));
        assert!(transport.journal().calls().is_empty());
    }

    #[test]
    fn injected_error_is_reported() {
        let main_loop = MainLoop::new();
        let mut transport = MockTransport::new(
            MockScript::repeating(samples(), Duration::from_millis(1)).error_after(3),
        );
        let journal = transport.journal();
        let _stream = transport
            .connect(
                AudioFormat::mono(44_100),
                StreamFlags::default(),
                Box::new(Counting {
                    seen: Arc::new(AtomicUsize::new(0)),
                }),
                StreamNotifier::new(main_loop.handle()),
            )
            .expect("connect");

        let mut log = StateLog::default();
        main_loop.run(&mut log).expect("run");
        assert_eq!(log.states.last(), Some(&TransportState::Error));
        assert_eq!(journal.callbacks(), 3);
    }
}
