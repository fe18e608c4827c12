//! Lock-free SPSC event queue with an overwrite-oldest overflow policy.
//!
//! ## Layout
//!
//! ```text
//!            tail (consumer, CAS)          head (producer only)
//!              │                              │
//!   slots: [ old │ e1 │ e2 │ ... │ eN-1 │ free ... ]   slot = index % capacity
//! ```
//!
//! `head` and `tail` are free-running counters; `head - tail` is the number of
//! unread events and never exceeds `capacity`. Only the producer stores
//! `head`. `tail` is advanced by the consumer after reading a slot, and by the
//! producer when the queue is full, both through compare-and-swap, so exactly
//! one side wins any given slot.
//!
//! Slots hold an [`Event`] packed into two `AtomicU64` words. A consumer that
//! reads a slot the producer is concurrently evicting loses the CAS on `tail`
//! and discards what it read; it never observes a half-written event.
//!
//! The producer path is a handful of atomic loads/stores plus a bounded CAS
//! loop: no allocation, no lock, no syscall.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::events::Event;

/// Default number of slots.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

const BEAT_BIT: u64 = 1 << 63;
const ONSET_BIT: u64 = 1 << 62;
const TIME_MASK: u64 = ONSET_BIT - 1;

#[derive(Default)]
struct Slot {
    /// `bpm` bits in the high half, `pitch_hz` bits in the low half.
    values: AtomicU64,
    /// Flag bits on top, `detected_ns` below.
    meta: AtomicU64,
}

impl Slot {
    fn store(&self, event: &Event) {
        let values = (u64::from(event.bpm.to_bits()) << 32) | u64::from(event.pitch_hz.to_bits());
        let mut meta = event.detected_ns & TIME_MASK;
        if event.is_beat {
            meta |= BEAT_BIT;
        }
        if event.is_onset {
            meta |= ONSET_BIT;
        }
        self.values.store(values, Ordering::Relaxed);
        self.meta.store(meta, Ordering::Relaxed);
    }

    fn load(&self) -> Event {
        let values = self.values.load(Ordering::Relaxed);
        let meta = self.meta.load(Ordering::Relaxed);
        Event {
            is_beat: meta & BEAT_BIT != 0,
            is_onset: meta & ONSET_BIT != 0,
            bpm: f32::from_bits((values >> 32) as u32),
            pitch_hz: f32::from_bits(values as u32),
            detected_ns: meta & TIME_MASK,
            process_ms: 0.0,
        }
    }
}

struct Shared {
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    slots: Box<[Slot]>,
    dropped: AtomicU64,
}

impl Shared {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, index: usize) -> &Slot {
        &self.slots[index % self.slots.len()]
    }
}

/// Write half. Owned by the real-time callback.
pub struct EventProducer {
    shared: Arc<Shared>,
    /// Local copy of `head`; this half is its only writer.
    head: usize,
    pushed: u64,
}

/// Read half. Owned by the consumer thread.
pub struct EventConsumer {
    shared: Arc<Shared>,
}

/// Create a matched producer/consumer pair with `capacity` slots
/// (at least one).
pub fn event_queue(capacity: usize) -> (EventProducer, EventConsumer) {
    let slots: Box<[Slot]> = (0..capacity.max(1)).map(|_| Slot::default()).collect();
    let shared = Arc::new(Shared {
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
        slots,
        dropped: AtomicU64::new(0),
    });

    (
        EventProducer {
            shared: Arc::clone(&shared),
            head: 0,
            pushed: 0,
        },
        EventConsumer { shared },
    )
}

impl EventProducer {
    /// Publish `event`. Never blocks and never fails: when `capacity` events
    /// are unread, the oldest one is evicted first.
    pub fn push(&mut self, event: Event) {
        let shared = &*self.shared;
        let head = self.head;

        let mut tail = shared.tail.load(Ordering::Acquire);
        while head.wrapping_sub(tail) >= shared.capacity() {
            match shared.tail.compare_exchange_weak(
                tail,
                tail.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    shared.dropped.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                // Either the consumer made room or the CAS failed spuriously.
                Err(current) => tail = current,
            }
        }

        shared.slot(head).store(&event);
        self.head = head.wrapping_add(1);
        shared.head.store(self.head, Ordering::Release);
        self.pushed += 1;
    }

    /// Total events pushed through this producer.
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

impl EventConsumer {
    /// Pop the oldest unread event, if any.
    pub fn pop(&mut self) -> Option<Event> {
        let shared = &*self.shared;
        loop {
            let tail = shared.tail.load(Ordering::Acquire);
            let head = shared.head.load(Ordering::Acquire);
            if head == tail {
                return None;
            }

            let event = shared.slot(tail).load();
            if shared
                .tail
                .compare_exchange(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return Some(event);
            }
            // Evicted by the producer while we were reading it; start over
            // from the new oldest slot.
        }
    }

    /// Lazily drain everything published so far. Returns immediately when the
    /// queue is empty; calling it again later yields newer events.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { consumer: self }
    }

    /// Unread events at the time of the call.
    pub fn len(&self) -> usize {
        let tail = self.shared.tail.load(Ordering::Acquire);
        let head = self.shared.head.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events evicted by the overflow policy so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

/// Iterator returned by [`EventConsumer::drain`].
pub struct Drain<'a> {
    consumer: &'a mut EventConsumer,
}

impl Iterator for Drain<'_> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        self.consumer.pop()
    }
}
