//! Cooperative timers and retry bookkeeping
//!
//! Timers are plain deadlines kept by the dispatch context; nothing fires on
//! its own. The dispatch loop asks for the next deadline, sleeps on its
//! queue until then, and pops expired keys one at a time in deadline order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use gcslibgs::PeerIdentity;

use crate::config::RetryPolicy;

/// What a timer guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
    /// A COMMAND_LONG awaiting its ack
    Command { peer: PeerIdentity, command: u16 },
    /// The current wait of a mission transfer session
    Transfer(PeerIdentity),
}

/// Deadline queue with replace and cancel by key
///
/// Rescheduling a key leaves the old heap entry behind; it is recognised as
/// stale by its generation and skipped.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, TimerKey)>>,
    armed: HashMap<TimerKey, u64>,
    generation: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `key` to expire at `deadline`, replacing any earlier deadline
    pub fn schedule(&mut self, key: TimerKey, deadline: Instant) {
        self.generation += 1;
        self.armed.insert(key, self.generation);
        self.heap.push(Reverse((deadline, self.generation, key)));
    }

    /// Disarm `key`; returns whether it was armed
    pub fn cancel(&mut self, key: TimerKey) -> bool {
        self.armed.remove(&key).is_some()
    }

    pub fn is_armed(&self, key: TimerKey) -> bool {
        self.armed.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    /// Earliest live deadline
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.discard_stale();
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    /// Remove and return the earliest key whose deadline is at or before `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerKey> {
        self.discard_stale();
        match self.heap.peek() {
            Some(Reverse((deadline, _, _))) if *deadline <= now => {}
            _ => return None,
        }
        let Reverse((_, _, key)) = self.heap.pop()?;
        self.armed.remove(&key);
        Some(key)
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse((_, generation, key))) = self.heap.peek() {
            if self.armed.get(key) == Some(generation) {
                break;
            }
            self.heap.pop();
        }
    }
}

/// Decision after a timer expired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Retransmit and wait again
    Retry,
    /// Give up
    Exhausted,
}

/// Send time and retry count of one outstanding request
#[derive(Debug, Clone, Copy)]
pub struct Attempts {
    policy: RetryPolicy,
    sent_at: Instant,
    retries: u32,
}

impl Attempts {
    pub fn new(policy: RetryPolicy, now: Instant) -> Self {
        Self {
            policy,
            sent_at: now,
            retries: 0,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.sent_at + self.policy.timeout
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn sent_at(&self) -> Instant {
        self.sent_at
    }

    /// The timer expired; consume a retry if one is left
    pub fn expire(&mut self, now: Instant) -> Expiry {
        if self.retries < self.policy.max_retries {
            self.retries += 1;
            self.sent_at = now;
            Expiry::Retry
        } else {
            Expiry::Exhausted
        }
    }

    /// The peer made progress; start a fresh wait with the full budget
    pub fn restart(&mut self, now: Instant) {
        self.sent_at = now;
        self.retries = 0;
    }
}
