//! Delay-ordered queue with key deduplication.
//!
//! Both pipeline stages run on the same structure: a bounded min-heap
//! ordered by ready time, with a dedup set over item keys so a tag (or a
//! delivery batch) can be queued at most once at a time. A single consumer
//! takes items only once their delay has elapsed; producers that hit a full
//! queue retry with exponential backoff up to a bounded attempt count.

use std::collections::{BinaryHeap, HashSet};
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, sleep, sleep_until};

use crate::DispatchError;
use crate::backoff::Backoff;

/// Items that can be deduplicated by identity.
pub trait Keyed {
    type Key: Eq + Hash + Clone + Send;

    fn key(&self) -> Self::Key;
}

/// Outcome of a single insertion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// An item with the same key is already queued; the new one is dropped.
    AlreadyQueued,
    /// The queue is at capacity.
    Full,
}

struct Scheduled<T> {
    ready_at: Instant,
    // Tie-breaker so equal ready times release in insertion order.
    seq: u64,
    item: T,
}

impl<T> PartialEq for Scheduled<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<T> Eq for Scheduled<T> {}

impl<T> Ord for Scheduled<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed for min-heap behavior
        other
            .ready_at
            .cmp(&self.ready_at)
            .then(other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Scheduled<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct State<T: Keyed> {
    heap: BinaryHeap<Scheduled<T>>,
    keys: HashSet<T::Key>,
    next_seq: u64,
}

pub struct DelayQueue<T: Keyed> {
    state: Mutex<State<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T: Keyed> DelayQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                keys: HashSet::new(),
                next_seq: 0,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Insert an item that becomes takable after `delay`.
    pub fn enqueue(&self, item: T, delay: Duration) -> EnqueueOutcome {
        let mut state = self.state.lock().unwrap();

        if state.keys.contains(&item.key()) {
            return EnqueueOutcome::AlreadyQueued;
        }
        if state.heap.len() >= self.capacity {
            return EnqueueOutcome::Full;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.keys.insert(item.key());
        state.heap.push(Scheduled {
            ready_at: Instant::now() + delay,
            seq,
            item,
        });
        drop(state);

        self.notify.notify_one();
        EnqueueOutcome::Enqueued
    }

    /// Insert, retrying with exponential backoff while the queue is full.
    ///
    /// Waits `backoff.first()` after the first full queue, doubling each
    /// attempt, and gives up after `max_attempts` insertions.
    pub async fn enqueue_with_backoff(
        &self,
        item: T,
        delay: Duration,
        backoff: Backoff,
        max_attempts: u32,
    ) -> Result<EnqueueOutcome, DispatchError>
    where
        T: Clone,
    {
        let mut wait = backoff.first();

        for attempt in 1..=max_attempts {
            match self.enqueue(item.clone(), delay) {
                EnqueueOutcome::Full => {
                    tracing::warn!(
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "Queue full, backing off before retrying insertion"
                    );
                    sleep(wait).await;
                    wait = backoff.next(wait);
                }
                outcome => return Ok(outcome),
            }
        }

        Err(DispatchError::QueueFull {
            attempts: max_attempts,
        })
    }

    /// Remove and return the next ready item, waiting until its delay has
    /// elapsed. Blocks forever on an empty queue.
    pub async fn take(&self) -> T {
        loop {
            let next_ready = {
                let mut state = self.state.lock().unwrap();
                match state.heap.peek() {
                    Some(head) if head.ready_at <= Instant::now() => {
                        let scheduled = state.heap.pop().unwrap();
                        state.keys.remove(&scheduled.item.key());
                        return scheduled.item;
                    }
                    Some(head) => Some(head.ready_at),
                    None => None,
                }
            };

            match next_ready {
                // Head not ready yet: sleep until it is, or until a new
                // (possibly earlier) item arrives.
                Some(ready_at) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = sleep_until(ready_at) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
