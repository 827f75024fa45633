//! Persistent-friendly retry queue
//!
//! Bounded, deduplicated by uid, oldest-evicted on overflow. Items carry
//! an attempt count and a next-retry timestamp; rescheduling walks an
//! exponential backoff ladder and drops items at the attempt cap.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backoff ladder applied between attempts; the last rung repeats.
pub const BACKOFF_SCHEDULE: [Duration; 5] = [
    Duration::from_secs(5),
    Duration::from_secs(15),
    Duration::from_secs(45),
    Duration::from_secs(120),
    Duration::from_secs(300),
];

/// Attempts after which an item is dropped
pub const MAX_ATTEMPTS: u32 = 5;

/// Default queue capacity
pub const DEFAULT_CAPACITY: usize = 100;

/// Delay before attempt number `attempt` (0-based), capped at the ladder top.
pub fn backoff_delay(attempt: u32) -> Duration {
    let idx = (attempt as usize).min(BACKOFF_SCHEDULE.len() - 1);
    BACKOFF_SCHEDULE[idx]
}

/// A queued per-user sync retry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryItem {
    pub uid: String,
    pub attempts: u32,
    pub next_retry: DateTime<Utc>,
}

/// Bounded retry queue, front = oldest
#[derive(Debug)]
pub struct RetryQueue {
    items: VecDeque<RetryItem>,
    capacity: usize,
}

impl RetryQueue {
    pub fn new(capacity: usize) -> Self {
        RetryQueue {
            items: VecDeque::new(),
            capacity,
        }
    }

    /// Rebuild from persisted items, clamping to capacity.
    pub fn from_items(items: Vec<RetryItem>, capacity: usize) -> Self {
        let mut queue = RetryQueue::new(capacity);
        for item in items {
            if queue.contains(&item.uid) {
                continue;
            }
            if queue.items.len() == capacity {
                queue.items.pop_front();
            }
            queue.items.push_back(item);
        }
        queue
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.items.iter().any(|i| i.uid == uid)
    }

    /// Snapshot for persistence.
    pub fn items(&self) -> Vec<RetryItem> {
        self.items.iter().cloned().collect()
    }

    /// Enqueue a fresh retry for `uid`. A uid already queued is a no-op;
    /// at capacity the oldest item is evicted (the evicted request will
    /// recur if it still matters).
    pub fn enqueue(&mut self, uid: &str, now: DateTime<Utc>) -> bool {
        if self.contains(uid) {
            return false;
        }
        if self.items.len() == self.capacity {
            if let Some(evicted) = self.items.pop_front() {
                tracing::warn!(uid = %evicted.uid, "Retry queue full; evicting oldest item");
            }
        }
        self.items.push_back(RetryItem {
            uid: uid.to_string(),
            attempts: 0,
            next_retry: now + backoff_delay(0),
        });
        true
    }

    /// Split off every item whose next-retry time has arrived. Callers
    /// process the returned items without holding the queue lock.
    pub fn take_ready(&mut self, now: DateTime<Utc>) -> Vec<RetryItem> {
        let mut ready = Vec::new();
        let mut rest = VecDeque::new();
        for item in self.items.drain(..) {
            if item.next_retry <= now {
                ready.push(item);
            } else {
                rest.push_back(item);
            }
        }
        self.items = rest;
        ready
    }

    /// Put a failed item back with one more attempt on the clock, or
    /// drop it once the cap is reached. Returns false when dropped.
    pub fn reschedule(&mut self, mut item: RetryItem, now: DateTime<Utc>) -> bool {
        item.attempts += 1;
        if item.attempts >= MAX_ATTEMPTS {
            tracing::warn!(uid = %item.uid, attempts = item.attempts, "Retry attempts exhausted; dropping");
            return false;
        }
        if self.contains(&item.uid) {
            return false;
        }
        item.next_retry = now + backoff_delay(item.attempts);
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
        true
    }
}
