use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use beatwatch_core::buffering::event_queue;
use beatwatch_core::Event;

const PUSHES: u64 = 200_000;

fn numbered(n: u64) -> Event {
    Event::beat(120.0, 0.0, n)
}

/// Producer pushes flat out while the consumer drains in bursts with pauses.
/// Every delivered event is accounted for exactly once, in order; everything
/// else was evicted by the overflow policy.
#[test]
fn concurrent_drain_preserves_order_without_duplicates() {
    let (mut producer, mut consumer) = event_queue(256);
    let done = Arc::new(AtomicBool::new(false));

    let producer_done = Arc::clone(&done);
    let producer_thread = thread::spawn(move || {
        for n in 0..PUSHES {
            producer.push(numbered(n));
            if n % 10_000 == 0 {
                thread::yield_now();
            }
        }
        producer_done.store(true, Ordering::Release);
        producer.pushed()
    });

    let mut delivered = Vec::new();
    let mut round = 0u32;
    loop {
        let finished = done.load(Ordering::Acquire);
        delivered.extend(consumer.drain().map(|e| e.detected_ns));
        if finished && consumer.is_empty() {
            break;
        }
        round += 1;
        if round % 3 == 0 {
            thread::sleep(Duration::from_micros(200));
        }
    }

    let pushed = producer_thread.join().expect("producer thread");
    assert_eq!(pushed, PUSHES);
    assert!(
        delivered.windows(2).all(|w| w[0] < w[1]),
        "out of order or duplicated delivery"
    );
    assert_eq!(delivered.len() as u64 + consumer.dropped(), PUSHES);
    assert_eq!(delivered.last(), Some(&(PUSHES - 1)));
}

/// A paused consumer never stalls the producer; on resume it sees exactly the
/// newest `capacity` events.
#[test]
fn producer_never_blocks_on_a_stalled_consumer() {
    let capacity = 1024;
    let (mut producer, mut consumer) = event_queue(capacity);

    let started = Instant::now();
    let producer_thread = thread::spawn(move || {
        for n in 0..PUSHES {
            producer.push(numbered(n));
        }
    });
    producer_thread.join().expect("producer thread");
    assert!(started.elapsed() < Duration::from_secs(5));

    let delivered: Vec<u64> = consumer.drain().map(|e| e.detected_ns).collect();
    let expected: Vec<u64> = (PUSHES - capacity as u64..PUSHES).collect();
    assert_eq!(delivered, expected);
    assert_eq!(consumer.dropped(), PUSHES - capacity as u64);
}
