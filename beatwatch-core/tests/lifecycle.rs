use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use beatwatch_core::audio::mock::{MockBuffer, MockCall, MockJournal, MockScript, MockTransport};
use beatwatch_core::{
    AnalysisEngine, BeatDetector, BeatError, DetectorConfig, Event, EventSink, LifecycleState,
    Shutdown, TempoReading,
};

/// Beat on any block whose first sample is positive, onset on every block.
struct ClickEngine;

impl AnalysisEngine for ClickEngine {
    fn detect_tempo(&mut self, block: &[f32]) -> TempoReading {
        TempoReading {
            is_beat: block[0] > 0.0,
            bpm: 128.0,
        }
    }

    fn detect_onset(&mut self, _block: &[f32]) -> bool {
        true
    }

    fn detect_pitch(&mut self, _block: &[f32]) -> f32 {
        0.0
    }
}

#[derive(Clone, Default)]
struct Collected(Rc<RefCell<Vec<Event>>>);

impl EventSink for Collected {
    fn handle(&mut self, event: &Event, _average_bpm: f32) -> io::Result<()> {
        self.0.borrow_mut().push(*event);
        Ok(())
    }
}

fn config() -> DetectorConfig {
    DetectorConfig {
        buffer_size: 64,
        monitor_interval: Duration::from_millis(10),
        shutdown_grace: Duration::from_millis(300),
        ..DetectorConfig::default()
    }
}

fn clicks() -> Vec<MockBuffer> {
    vec![
        MockBuffer::mono_f32(&[1.0; 64]),
        MockBuffer::mono_f32(&[0.0; 64]),
    ]
}

fn detector(script: MockScript, sink: Collected) -> BeatDetector<MockTransport> {
    BeatDetector::new(
        config(),
        MockTransport::new(script),
        Box::new(ClickEngine),
        vec![Box::new(sink)],
        Shutdown::detached(),
    )
}

fn wait_for_callbacks(journal: &MockJournal, n: usize) {
    for _ in 0..2_000 {
        if journal.callbacks() >= n {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("transport never delivered {n} callbacks");
}

#[test]
fn stop_pauses_before_disconnecting_exactly_once() {
    let sink = Collected::default();
    let mut detector = detector(
        MockScript::repeating(clicks(), Duration::from_millis(1))
            .with_pause_delay(Duration::from_millis(20)),
        sink.clone(),
    );
    let journal = detector.transport().journal();
    detector.initialize().expect("initialize");

    let handle = detector.handle();
    let stopper_journal = journal.clone();
    let stopper = thread::spawn(move || {
        wait_for_callbacks(&stopper_journal, 10);
        handle.stop();
    });

    let summary = detector.run().expect("run");
    stopper.join().expect("stopper thread");

    assert_eq!(detector.state(), LifecycleState::Disconnected);
    assert_eq!(journal.count(MockCall::Disconnect), 1);
    assert_eq!(journal.count(MockCall::DisconnectDuringCallback), 0);

    let deactivate = journal.position(MockCall::SetActive(false)).expect("deactivated");
    let paused = journal.position(MockCall::NotifiedPaused).expect("pause confirmed");
    let disconnect = journal.position(MockCall::Disconnect).expect("disconnected");
    assert!(deactivate < paused && paused < disconnect);
    assert_eq!(journal.dequeued(), journal.requeued());

    let events = sink.0.borrow();
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.is_onset));
    assert!(events.windows(2).all(|w| w[0].detected_ns <= w[1].detected_ns));
    assert_eq!(summary.total_onsets, events.len() as u64);
    assert_eq!(summary.dropped_events, 0);
    assert_eq!(summary.average_bpm, Some(128.0));
}

#[test]
fn concurrent_stops_act_once() {
    let mut detector = detector(
        MockScript::repeating(clicks(), Duration::from_millis(1)),
        Collected::default(),
    );
    let journal = detector.transport().journal();
    detector.initialize().expect("initialize");

    let stoppers: Vec<_> = (0..4)
        .map(|_| {
            let handle = detector.handle();
            let journal = journal.clone();
            thread::spawn(move || {
                wait_for_callbacks(&journal, 5);
                handle.stop();
                handle.stop();
            })
        })
        .collect();

    detector.run().expect("run");
    for stopper in stoppers {
        stopper.join().expect("stopper thread");
    }

    assert_eq!(journal.count(MockCall::SetActive(false)), 1);
    assert_eq!(journal.count(MockCall::Disconnect), 1);
}

#[test]
fn stream_error_ends_the_run_without_disconnect() {
    let sink = Collected::default();
    let mut detector = detector(
        MockScript::repeating(clicks(), Duration::from_millis(1)).error_after(6),
        sink.clone(),
    );
    let journal = detector.transport().journal();
    detector.initialize().expect("initialize");

    let summary = detector.run().expect("a stream error is not a run failure");
    assert_eq!(detector.state(), LifecycleState::Error);
    assert_eq!(journal.count(MockCall::Disconnect), 0);
    assert_eq!(summary.total_beats, 3);
    assert_eq!(sink.0.borrow().len(), 6);
}

#[test]
fn unconfirmed_pause_gives_up_after_the_grace_period() {
    let mut detector = detector(
        MockScript::repeating(clicks(), Duration::from_millis(1)).never_confirm_pause(),
        Collected::default(),
    );
    let journal = detector.transport().journal();
    detector.initialize().expect("initialize");

    let handle = detector.handle();
    let stopper_journal = journal.clone();
    let stopper = thread::spawn(move || {
        wait_for_callbacks(&stopper_journal, 3);
        handle.stop();
    });

    detector.run().expect("run");
    stopper.join().expect("stopper thread");
    assert_eq!(journal.count(MockCall::Disconnect), 0);
    assert_ne!(detector.state(), LifecycleState::Disconnected);
}

#[test]
fn malformed_buffers_are_skipped_not_fatal() {
    let sink = Collected::default();
    let mut detector = detector(
        MockScript::once(
            vec![
                MockBuffer::unmapped(256),
                MockBuffer::raw(vec![0; 6], 4),
                MockBuffer::mono_f32(&[1.0; 64]),
            ],
            Duration::from_millis(1),
        ),
        sink.clone(),
    );
    let journal = detector.transport().journal();
    detector.initialize().expect("initialize");

    let handle = detector.handle();
    let stopper_journal = journal.clone();
    let stopper = thread::spawn(move || {
        wait_for_callbacks(&stopper_journal, 3);
        handle.stop();
    });

    let summary = detector.run().expect("run");
    stopper.join().expect("stopper thread");
    assert_eq!(summary.rejected_buffers, 2);
    assert_eq!(summary.total_beats, 1);
    assert_eq!(sink.0.borrow().len(), 1);
    assert_eq!(journal.dequeued(), 3);
    assert_eq!(journal.requeued(), 3);
}

#[test]
fn init_errors_are_reported() {
    let mut refused = detector(
        MockScript::once(clicks(), Duration::from_millis(1)).failing_connect(),
        Collected::default(),
    );
    assert!(matches!(refused.initialize(), Err(BeatError::Connect(_))));

    let mut invalid = BeatDetector::new(
        DetectorConfig {
            buffer_size: 32,
            ..config()
        },
        MockTransport::new(MockScript::once(clicks(), Duration::from_millis(1))),
        Box::new(ClickEngine),
        Vec::new(),
        Shutdown::detached(),
    );
    assert!(matches!(invalid.initialize(), Err(BeatError::InvalidConfig(_))));
    assert!(matches!(invalid.run(), Err(BeatError::NotInitialized)));
}
