//! Deadline-ordered timer set driven by the engine task.
//!
//! Timers never run on their own: the engine sleeps until
//! [`TimerQueue::next_deadline`] and then drains [`TimerQueue::pop_due`].
//! Cancelling a handle removes its entry, so a cancelled timer can never fire.
//! Timers sharing a deadline fire in the order they were scheduled.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Identifies one scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// Timers carrying a task of type `T`, ordered by deadline then schedule order.
#[derive(Debug)]
pub struct TimerQueue<T> {
    next_id: u64,
    entries: BTreeMap<(Instant, TimerHandle), T>,
    deadlines: HashMap<TimerHandle, Instant>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    /// An empty queue.
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    /// Arm a timer for `deadline`.
    pub fn schedule_at(&mut self, deadline: Instant, task: T) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;
        self.entries.insert((deadline, handle), task);
        self.deadlines.insert(handle, deadline);
        handle
    }

    /// Arm a timer `delay` from now.
    pub fn schedule_after(&mut self, delay: Duration, task: T) -> TimerHandle {
        self.schedule_at(Instant::now() + delay, task)
    }

    /// Revoke a timer. Returns its task if it had not fired yet.
    pub fn cancel(&mut self, handle: TimerHandle) -> Option<T> {
        let deadline = self.deadlines.remove(&handle)?;
        self.entries.remove(&(deadline, handle))
    }

    /// Whether `handle` is still armed.
    pub fn contains(&self, handle: TimerHandle) -> bool {
        self.deadlines.contains_key(&handle)
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return the earliest timer whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerHandle, T)> {
        let key = *self.entries.keys().next()?;
        if key.0 > now {
            return None;
        }
        let task = self.entries.remove(&key)?;
        self.deadlines.remove(&key.1);
        Some((key.1, task))
    }

    /// Number of armed timers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is armed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
