//! Virtual clock and timed event queue
//!
//! The simulator never reads wall-clock time. Periodic work and delayed
//! fills are queued here against a virtual millisecond clock and released
//! in due-time order, ties broken by scheduling order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

/// Work the simulator performs when an event comes due
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimEvent {
    PriceTick,
    SignalCheck,
    OrderFill { order_id: String },
}

#[derive(Debug, PartialEq, Eq)]
struct Scheduled {
    due_ms: u64,
    seq: u64,
    event: SimEvent,
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap yields the earliest event
        other
            .due_ms
            .cmp(&self.due_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Virtual clock measured in milliseconds from a fixed epoch
#[derive(Clone, Copy, Debug)]
pub struct SimClock {
    epoch_ms: u64,
    elapsed_ms: u64,
}

impl SimClock {
    pub fn starting_at(epoch_ms: u64) -> Self {
        Self { epoch_ms, elapsed_ms: 0 }
    }

    /// Clock anchored at the current wall-clock time
    pub fn from_now() -> Self {
        Self::starting_at(chrono::Utc::now().timestamp_millis().max(0) as u64)
    }

    /// Absolute timestamp in epoch milliseconds
    pub fn now(&self) -> u64 {
        self.epoch_ms + self.elapsed_ms
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Move the clock forward to `elapsed_ms`; earlier values are ignored
    pub fn advance_to(&mut self, elapsed_ms: u64) {
        self.elapsed_ms = self.elapsed_ms.max(elapsed_ms);
    }
}

/// Pending timed events
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Scheduled>,
    seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `event` at an absolute elapsed time
    pub fn schedule_at(&mut self, due_ms: u64, event: SimEvent) {
        self.seq += 1;
        self.heap.push(Scheduled {
            due_ms,
            seq: self.seq,
            event,
        });
    }

    /// Elapsed time of the earliest pending event
    pub fn next_due(&self) -> Option<u64> {
        self.heap.peek().map(|s| s.due_ms)
    }

    /// Pop the earliest event if it is due by `until_ms`, moving the clock to it
    pub fn pop_due(&mut self, until_ms: u64, clock: &mut SimClock) -> Option<SimEvent> {
        if self.heap.peek()?.due_ms > until_ms {
            return None;
        }
        let scheduled = self.heap.pop()?;
        clock.advance_to(scheduled.due_ms);
        Some(scheduled.event)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every pending event
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
